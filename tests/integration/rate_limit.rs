use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

use admp_hub::config::HubConfig;
use admp_hub::rate_limit::RateLimitConfig;

use crate::common::{make_envelope, register_agent, sign_envelope};

fn throttled_client(sends_max: usize, registrations_max: usize) -> Client {
    let rate = RateLimitConfig {
        sends_max,
        sends_window_secs: 60,
        registrations_max,
        registrations_window_secs: 3600,
    };
    let rocket = admp_hub::rocket_with_config(HubConfig::default(), rate);
    Client::tracked(rocket).expect("valid rocket instance")
}

#[test]
fn test_send_window_rejects_with_headers() {
    let client = throttled_client(2, 100);
    let alice = register_agent(&client, "alice");
    register_agent(&client, "bob");

    for i in 0..2 {
        let mut envelope = make_envelope("alice", "bob", &format!("ok {i}"), serde_json::json!({}));
        sign_envelope(&mut envelope, &alice.secret_key);
        let res = client
            .post("/api/agents/bob/messages")
            .header(ContentType::JSON)
            .body(envelope.to_string())
            .dispatch();
        assert_eq!(res.status(), Status::Created);
    }

    // Third send in the window is throttled before validation even runs
    let mut envelope = make_envelope("alice", "bob", "throttled", serde_json::json!({}));
    sign_envelope(&mut envelope, &alice.secret_key);
    let res = client
        .post("/api/agents/bob/messages")
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);
    assert_eq!(res.headers().get_one("X-RateLimit-Limit"), Some("2"));
    assert_eq!(res.headers().get_one("X-RateLimit-Remaining"), Some("0"));
    assert!(res.headers().get_one("Retry-After").is_some());
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["code"], "RATE_LIMITED");
    assert_eq!(body["limit"], 2);
}

#[test]
fn test_registration_window_is_independent_of_sends() {
    let client = throttled_client(100, 2);

    let a1 = register_agent(&client, "a1");
    register_agent(&client, "a2");

    let res = client
        .post("/api/agents/register")
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "a3"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::TooManyRequests);

    // Sends draw from their own window, so messaging still flows
    let mut envelope = make_envelope("a1", "a2", "still flows", serde_json::json!({}));
    sign_envelope(&mut envelope, &a1.secret_key);
    let res = client
        .post("/api/agents/a2/messages")
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);
}
