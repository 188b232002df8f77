use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

use admp_hub::config::HubConfig;
use admp_hub::rate_limit::RateLimitConfig;

/// Generous limits so parallel tests never trip the per-IP windows.
pub fn test_rate_limits() -> RateLimitConfig {
    RateLimitConfig {
        sends_max: 100_000,
        sends_window_secs: 60,
        registrations_max: 100_000,
        registrations_window_secs: 3600,
    }
}

pub fn test_client() -> Client {
    let config = HubConfig::default();
    let rocket = admp_hub::rocket_with_config(config, test_rate_limits());
    Client::tracked(rocket).expect("valid rocket instance")
}

pub fn test_client_with_config(config: HubConfig) -> Client {
    let rocket = admp_hub::rocket_with_config(config, test_rate_limits());
    Client::tracked(rocket).expect("valid rocket instance")
}

pub struct TestAgent {
    pub agent_id: String,
    pub public_key: String,
    pub secret_key: String,
}

/// Register a legacy-mode agent and keep its one-time secret for signing.
pub fn register_agent(client: &Client, agent_id: &str) -> TestAgent {
    let res = client
        .post("/api/agents/register")
        .header(ContentType::JSON)
        .body(format!(r#"{{"agent_id": "{agent_id}"}}"#))
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let body: serde_json::Value = res.into_json().unwrap();
    TestAgent {
        agent_id: body["agent_id"].as_str().unwrap().to_string(),
        public_key: body["public_key"].as_str().unwrap().to_string(),
        secret_key: body["secret_key"].as_str().unwrap().to_string(),
    }
}

/// Envelope skeleton with a fresh timestamp; sign before sending.
pub fn make_envelope(
    from: &str,
    to: &str,
    subject: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "version": "1.0",
        "type": "task.request",
        "from": from,
        "to": to,
        "subject": subject,
        "body": body,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })
}

/// Sign the envelope in place with the agent's secret (the client half of
/// the protocol).
pub fn sign_envelope(envelope: &mut serde_json::Value, secret_b64: &str) {
    let timestamp = envelope["timestamp"].as_str().unwrap().to_string();
    let body = envelope
        .get("body")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let from = envelope["from"].as_str().unwrap().to_string();
    let to = envelope["to"].as_str().unwrap().to_string();
    let correlation_id = envelope
        .get("correlation_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let key = admp_hub::crypto::signing_key_from_secret(secret_b64).expect("valid secret key");
    let base = admp_hub::crypto::signing_base(
        &timestamp,
        &body,
        &from,
        &to,
        correlation_id.as_deref(),
    );
    let sig = admp_hub::crypto::sign_base(&key, &base);
    envelope["signature"] = serde_json::json!({"alg": "ed25519", "sig": sig});
}

/// Register, build, sign, send: the common send path in one call.
pub fn send_signed(
    client: &Client,
    from: &TestAgent,
    to: &str,
    subject: &str,
    body: serde_json::Value,
) -> serde_json::Value {
    let mut envelope = make_envelope(&from.agent_id, to, subject, body);
    sign_envelope(&mut envelope, &from.secret_key);
    let res = client
        .post(format!("/api/agents/{to}/messages"))
        .header(ContentType::JSON)
        .body(envelope.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    res.into_json().unwrap()
}

/// Pull the next message; None on an empty inbox (204).
pub fn pull_next(client: &Client, agent_id: &str) -> Option<serde_json::Value> {
    let res = client
        .post(format!("/api/agents/{agent_id}/inbox/pull"))
        .header(ContentType::JSON)
        .body("{}")
        .dispatch();
    let status = res.status();
    if status == Status::Ok {
        Some(res.into_json().unwrap())
    } else if status == Status::NoContent {
        None
    } else {
        panic!("unexpected pull status {status}")
    }
}
