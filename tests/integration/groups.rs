use rocket::http::{ContentType, Status};
use rocket::local::blocking::Client;

use crate::common::{pull_next, register_agent, test_client};

fn create_group(client: &Client, body: &str) -> serde_json::Value {
    let res = client
        .post("/api/groups")
        .header(ContentType::JSON)
        .body(body.to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    res.into_json().unwrap()
}

#[test]
fn test_create_group_defaults() {
    let client = test_client();
    register_agent(&client, "owner");
    let group = create_group(&client, r#"{"name": "Build Crew", "created_by": "owner"}"#);

    let gid = group["group_id"].as_str().unwrap();
    assert!(gid.starts_with("group://build-crew-"));
    assert_eq!(group["access"], "invite-only");
    assert_eq!(group["members"][0]["agent_id"], "owner");
    assert_eq!(group["members"][0]["role"], "owner");
    assert!(group.get("join_key_hash").is_none());
}

#[test]
fn test_group_name_validation() {
    let client = test_client();
    register_agent(&client, "owner");
    for bad in ["", "bad/name", &"x".repeat(101)] {
        let res = client
            .post("/api/groups")
            .header(ContentType::JSON)
            .body(serde_json::json!({"name": bad, "created_by": "owner"}).to_string())
            .dispatch();
        assert_eq!(res.status(), Status::BadRequest, "name {bad:?} should fail");
    }
}

#[test]
fn test_fanout_and_dedup() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "a");
    register_agent(&client, "b");

    let group = create_group(
        &client,
        r#"{"name": "tick group", "created_by": "owner", "access": "open", "max_members": 3}"#,
    );
    let gid = group["group_id"].as_str().unwrap().to_string();
    let bare = gid.strip_prefix("group://").unwrap();

    for agent in ["a", "b"] {
        let res = client
            .post(format!("/api/groups/{bare}/join"))
            .header(ContentType::JSON)
            .body(format!(r#"{{"agent_id": "{agent}"}}"#))
            .dispatch();
        assert_eq!(res.status(), Status::Ok);
    }

    // Group is at max_members: the next join is rejected
    register_agent(&client, "c");
    let res = client
        .post(format!("/api/groups/{bare}/join"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "c"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Conflict);

    // Owner posts once
    let res = client
        .post(format!("/api/groups/{bare}/messages"))
        .header(ContentType::JSON)
        .body(r#"{"from": "owner", "subject": "tick", "body": {"n": 1}}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Created);
    let post: serde_json::Value = res.into_json().unwrap();
    let gmid = post["group_message_id"].as_str().unwrap().to_string();
    assert_eq!(post["delivered"].as_array().unwrap().len(), 2);
    assert_eq!(post["failed"].as_array().unwrap().len(), 0);

    // Each member got one copy sharing the group_message_id; the sender none
    let msg_a = pull_next(&client, "a").expect("a's copy");
    let msg_b = pull_next(&client, "b").expect("b's copy");
    assert_eq!(msg_a["group_message_id"].as_str().unwrap(), gmid);
    assert_eq!(msg_b["group_message_id"].as_str().unwrap(), gmid);
    assert_ne!(msg_a["id"], msg_b["id"]);
    assert!(pull_next(&client, "owner").is_none());

    // History collapses the fanout copies to one entry
    let res = client
        .get(format!("/api/groups/{bare}/messages?agent_id=owner"))
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let history: serde_json::Value = res.into_json().unwrap();
    assert_eq!(history["count"], 1);
    assert_eq!(history["messages"][0]["group_message_id"].as_str().unwrap(), gmid);
}

#[test]
fn test_post_requires_membership() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "outsider");
    let group = create_group(&client, r#"{"name": "private", "created_by": "owner"}"#);
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();

    let res = client
        .post(format!("/api/groups/{bare}/messages"))
        .header(ContentType::JSON)
        .body(r#"{"from": "outsider", "subject": "hi", "body": {}}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_invite_only_join_rejected() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "wannabe");
    let group = create_group(&client, r#"{"name": "closed", "created_by": "owner"}"#);
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();

    let res = client
        .post(format!("/api/groups/{bare}/join"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "wannabe"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_key_protected_join() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "knower");
    register_agent(&client, "guesser");
    let group = create_group(
        &client,
        r#"{"name": "vault", "created_by": "owner", "access": "key-protected", "join_key": "open sesame"}"#,
    );
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();

    let res = client
        .post(format!("/api/groups/{bare}/join"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "guesser", "join_key": "wrong"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .post(format!("/api/groups/{bare}/join"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "knower", "join_key": "open sesame"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
}

#[test]
fn test_owner_cannot_leave_or_be_removed() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "admin");
    let group = create_group(&client, r#"{"name": "anchored", "created_by": "owner"}"#);
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();

    client
        .post(format!("/api/groups/{bare}/members"))
        .header(ContentType::JSON)
        .body(r#"{"actor": "owner", "agent_id": "admin", "role": "admin"}"#)
        .dispatch();

    let res = client
        .post(format!("/api/groups/{bare}/leave"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "owner"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client
        .delete(format!("/api/groups/{bare}/members/owner?actor=admin"))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_member_management_requires_privilege() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "pleb");
    register_agent(&client, "target");
    let group = create_group(
        &client,
        r#"{"name": "ranks", "created_by": "owner", "access": "open"}"#,
    );
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();

    client
        .post(format!("/api/groups/{bare}/join"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "pleb"}"#)
        .dispatch();

    // A plain member cannot add others
    let res = client
        .post(format!("/api/groups/{bare}/members"))
        .header(ContentType::JSON)
        .body(r#"{"actor": "pleb", "agent_id": "target"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    // The owner can
    let res = client
        .post(format!("/api/groups/{bare}/members"))
        .header(ContentType::JSON)
        .body(r#"{"actor": "owner", "agent_id": "target"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::Ok);

    // A second owner is impossible
    register_agent(&client, "pretender");
    let res = client
        .post(format!("/api/groups/{bare}/members"))
        .header(ContentType::JSON)
        .body(r#"{"actor": "owner", "agent_id": "pretender", "role": "owner"}"#)
        .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn test_history_visibility_setting() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "member");
    let group = create_group(
        &client,
        r#"{"name": "no peeking", "created_by": "owner", "access": "open", "history_visible": false}"#,
    );
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();
    client
        .post(format!("/api/groups/{bare}/join"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "member"}"#)
        .dispatch();

    let res = client
        .get(format!("/api/groups/{bare}/messages?agent_id=member"))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_history_requires_membership() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "stranger");
    let group = create_group(&client, r#"{"name": "walled", "created_by": "owner"}"#);
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();

    let res = client
        .get(format!("/api/groups/{bare}/messages?agent_id=stranger"))
        .dispatch();
    assert_eq!(res.status(), Status::Forbidden);
}

#[test]
fn test_delete_group_owner_only() {
    let client = test_client();
    register_agent(&client, "owner");
    register_agent(&client, "member");
    let group = create_group(
        &client,
        r#"{"name": "doomed", "created_by": "owner", "access": "open"}"#,
    );
    let bare = group["group_id"].as_str().unwrap().strip_prefix("group://").unwrap().to_string();
    client
        .post(format!("/api/groups/{bare}/join"))
        .header(ContentType::JSON)
        .body(r#"{"agent_id": "member"}"#)
        .dispatch();

    let res = client.delete(format!("/api/groups/{bare}?actor=member")).dispatch();
    assert_eq!(res.status(), Status::Forbidden);

    let res = client.delete(format!("/api/groups/{bare}?actor=owner")).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let res = client.get(format!("/api/groups/{bare}")).dispatch();
    assert_eq!(res.status(), Status::NotFound);
}
