use rocket::http::{ContentType, Status};

use crate::common::{make_envelope, pull_next, register_agent, sign_envelope, test_client};

#[test]
fn test_ephemeral_body_purged_on_ack() {
    let client = test_client();
    let alice = register_agent(&client, "alice");
    register_agent(&client, "bob");

    let mut envelope = make_envelope("alice", "bob", "secret", serde_json::json!({"secret": "S"}));
    envelope["id"] = serde_json::json!("m2");
    envelope["ephemeral"] = serde_json::json!(true);
    sign_envelope(&mut envelope, &alice.secret_key);
    let res = client
        .post("/api/agents/bob/messages")
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);

    // The body is intact through pull
    let msg = pull_next(&client, "bob").unwrap();
    assert_eq!(msg["envelope"]["body"]["secret"], "S");

    // Ack purges in the same transition
    let res = client
        .post("/api/agents/bob/messages/m2/ack")
        .header(ContentType::JSON)
        .body("{}")
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "purged");

    // Status is a distinct gone signal with the restricted record
    let res = client.get("/api/messages/m2/status").dispatch();
    assert_eq!(res.status(), Status::Gone);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "purged");
    assert_eq!(body["purge_reason"], "acked");
    assert!(body["body"].is_null());
}

#[test]
fn test_expired_ephemeral_is_never_served() {
    let client = test_client();
    let alice = register_agent(&client, "alice");
    register_agent(&client, "bob");

    let mut envelope = make_envelope("alice", "bob", "hot", serde_json::json!({"k": "v"}));
    envelope["ephemeral_ttl_sec"] = serde_json::json!(1);
    sign_envelope(&mut envelope, &alice.secret_key);
    let res = client
        .post("/api/agents/bob/messages")
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);

    std::thread::sleep(std::time::Duration::from_millis(1_200));

    // The ephemeral window has passed; pull must not hand the body out even
    // though the sweeper has not purged it yet
    assert!(pull_next(&client, "bob").is_none());
}

#[test]
fn test_ephemeral_ttl_implies_ephemeral() {
    let client = test_client();
    let alice = register_agent(&client, "alice");
    register_agent(&client, "bob");

    let mut envelope = make_envelope("alice", "bob", "implicit", serde_json::json!({"x": 1}));
    envelope["ephemeral_ttl_sec"] = serde_json::json!(600);
    sign_envelope(&mut envelope, &alice.secret_key);
    client
        .post("/api/agents/bob/messages")
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();

    let msg = pull_next(&client, "bob").unwrap();
    assert_eq!(msg["ephemeral"], true);
    assert!(msg["expires_at_ms"].as_i64().unwrap() > 0);
    let mid = msg["id"].as_str().unwrap();

    let res = client
        .post(format!("/api/agents/bob/messages/{mid}/ack"))
        .header(ContentType::JSON)
        .body("{}")
        .dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["status"], "purged");
}
