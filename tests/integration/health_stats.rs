use rocket::http::Status;

use crate::common::{pull_next, register_agent, send_signed, test_client};

#[test]
fn test_health() {
    let client = test_client();
    let res = client.get("/health").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "admp-hub");
}

#[test]
fn test_stats_counters() {
    let client = test_client();
    let alice = register_agent(&client, "alice");
    register_agent(&client, "bob");
    send_signed(&client, &alice, "bob", "one", serde_json::json!({}));
    send_signed(&client, &alice, "bob", "two", serde_json::json!({}));
    pull_next(&client, "bob");

    let res = client.get("/api/stats").dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["agents"]["total"], 2);
    assert_eq!(body["agents"]["online"], 2);
    assert_eq!(body["messages"]["queued"], 1);
    assert_eq!(body["messages"]["leased"], 1);
}

#[test]
fn test_unknown_route_is_json_404() {
    let client = test_client();
    let res = client.get("/api/not-a-thing").dispatch();
    assert_eq!(res.status(), Status::NotFound);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "NOT_FOUND");
}
