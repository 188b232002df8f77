use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

use crate::common::{pull_next, register_agent, test_client};

fn open_round_table(client: &Client) -> serde_json::Value {
    register_agent(client, "fac");
    register_agent(client, "p1");
    register_agent(client, "p2");
    let res = client
        .post("/api/round-tables")
        .header(ContentType::JSON)
        .body(
            r#"{"topic": "Ship date", "goal": "pick one", "facilitator": "fac",
                "participants": ["p1", "p2"]}"#,
        )
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    res.into_json().unwrap()
}

#[test]
fn test_create_invites_participants() {
    let client = test_client();
    let rt = open_round_table(&client);

    assert!(rt["rt_id"].as_str().unwrap().starts_with("rt_"));
    assert_eq!(rt["status"], "open");
    assert_eq!(rt["facilitator"], "fac");
    assert!(rt["group_id"].as_str().unwrap().starts_with("group://"));

    // Every participant finds a work order in their inbox
    for p in ["p1", "p2"] {
        let msg = pull_next(&client, p).expect("work order delivered");
        assert_eq!(msg["envelope"]["type"], "work_order");
        assert_eq!(msg["envelope"]["body"]["round_table_id"], rt["rt_id"]);
    }
    // The facilitator does not invite themselves
    assert!(pull_next(&client, "fac").is_none());
}

#[test]
fn test_get_requires_seat_at_the_table() {
    let client = test_client();
    let rt = open_round_table(&client);
    let rt_id = rt["rt_id"].as_str().unwrap();
    register_agent(&client, "lurker");

    let res = client
        .get(format!("/api/round-tables/{rt_id}?caller=p1"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = client
        .get(format!("/api/round-tables/{rt_id}?caller=lurker"))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_speak_appends_and_multicasts() {
    let client = test_client();
    let rt = open_round_table(&client);
    let rt_id = rt["rt_id"].as_str().unwrap();

    // Drain the invitations first
    pull_next(&client, "p1");
    pull_next(&client, "p2");

    let res = client
        .post(format!("/api/round-tables/{rt_id}/speak"))
        .header(ContentType::JSON)
        .body(r#"{"from": "p1", "message": "I vote Friday"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let updated: serde_json::Value = res.into_json().unwrap();
    assert_eq!(updated["thread"].as_array().unwrap().len(), 1);
    assert_eq!(updated["thread"][0]["from"], "p1");
    assert_eq!(updated["thread"][0]["message"], "I vote Friday");

    // Multicast lands in the other seats' inboxes via the backing group
    let msg = pull_next(&client, "p2").expect("multicast to p2");
    assert_eq!(msg["envelope"]["type"], "round_table.message");
    assert_eq!(msg["envelope"]["body"]["message"], "I vote Friday");
    let msg = pull_next(&client, "fac").expect("multicast to facilitator");
    assert_eq!(msg["envelope"]["type"], "round_table.message");
    // The speaker does not hear themselves
    assert!(pull_next(&client, "p1").is_none());
}

#[test]
fn test_speak_requires_participation() {
    let client = test_client();
    let rt = open_round_table(&client);
    let rt_id = rt["rt_id"].as_str().unwrap();
    register_agent(&client, "heckler");

    let res = client
        .post(format!("/api/round-tables/{rt_id}/speak"))
        .header(ContentType::JSON)
        .body(r#"{"from": "heckler", "message": "boo"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_resolve_closes_session_and_backing_group() {
    let client = test_client();
    let rt = open_round_table(&client);
    let rt_id = rt["rt_id"].as_str().unwrap();
    let group_id = rt["group_id"].as_str().unwrap().to_string();
    let bare = group_id.strip_prefix("group://").unwrap();

    // Only the facilitator may resolve
    let res = client
        .post(format!("/api/round-tables/{rt_id}/resolve"))
        .header(ContentType::JSON)
        .body(r#"{"facilitator": "p1", "outcome": "no"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .post(format!("/api/round-tables/{rt_id}/resolve"))
        .header(ContentType::JSON)
        .body(r#"{"facilitator": "fac", "outcome": "Friday", "decision": "ship it"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let resolved: serde_json::Value = res.into_json().unwrap();
    assert_eq!(resolved["status"], "resolved");
    assert_eq!(resolved["outcome"], "Friday");
    assert!(resolved.get("group_id").is_none());

    // Backing group is gone
    let res = client.get(format!("/api/groups/{bare}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);

    // Closed sessions take no further traffic
    let res = client
        .post(format!("/api/round-tables/{rt_id}/speak"))
        .header(ContentType::JSON)
        .body(r#"{"from": "p1", "message": "too late"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);

    let res = client
        .post(format!("/api/round-tables/{rt_id}/resolve"))
        .header(ContentType::JSON)
        .body(r#"{"facilitator": "fac", "outcome": "again"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn test_expiry_bounds() {
    let client = test_client();
    register_agent(&client, "fac");
    register_agent(&client, "p1");

    for bad in [30, 700_000] {
        let res = client
            .post("/api/round-tables")
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "topic": "t", "facilitator": "fac",
                    "participants": ["p1"], "expires_in_sec": bad,
                })
                .to_string(),
            )
            .dispatch();
        assert_eq!(res.status(), Status::BadRequest, "expiry {bad} should fail");
    }
}

#[test]
fn test_participant_cap() {
    let client = test_client();
    register_agent(&client, "fac");
    let mut participants = Vec::new();
    for i in 0..21 {
        let id = format!("seat{i}");
        register_agent(&client, &id);
        participants.push(id);
    }
    let res = client
        .post("/api/round-tables")
        .header(ContentType::JSON)
        .body(
            serde_json::json!({
                "topic": "crowded", "facilitator": "fac", "participants": participants,
            })
            .to_string(),
        )
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_unknown_participant_rejected() {
    let client = test_client();
    register_agent(&client, "fac");
    let res = client
        .post("/api/round-tables")
        .header(ContentType::JSON)
        .body(r#"{"topic": "t", "facilitator": "fac", "participants": ["ghost"]}"#)
        .dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
