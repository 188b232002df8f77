use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};

use super::{ApiFailure, Authed};
use crate::errors::ApiError;
use crate::groups::GroupService;
use crate::models::{
    CreateGroupRequest, GroupMemberRequest, GroupPostRequest, JoinGroupRequest, LeaveGroupRequest,
};

/// Group IDs carry a `group://` prefix that does not survive a URL path
/// segment; accept the bare `<slug>-<hex>` form and normalize.
fn full_group_id(raw: &str) -> String {
    if raw.starts_with("group://") {
        raw.to_string()
    } else {
        format!("group://{raw}")
    }
}

#[post("/api/groups", format = "json", data = "<body>")]
pub async fn create_group(
    groups: &State<GroupService>,
    _auth: Authed,
    body: Json<CreateGroupRequest>,
) -> Result<(Status, Json<serde_json::Value>), ApiFailure> {
    let group = groups.create(body.into_inner()).await?;
    Ok((Status::Created, Json(group.public_view())))
}

#[get("/api/groups?<member>")]
pub async fn list_groups(
    groups: &State<GroupService>,
    _auth: Authed,
    member: Option<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let list = groups.list(member).await?;
    let views: Vec<serde_json::Value> = list.iter().map(|g| g.public_view()).collect();
    Ok(Json(serde_json::json!({
        "groups": views,
        "count": views.len(),
    })))
}

#[get("/api/groups/<id>")]
pub async fn get_group(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    Ok(Json(groups.get(&full_group_id(id)).await?.public_view()))
}

#[delete("/api/groups/<id>?<actor>")]
pub async fn delete_group(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
    actor: Option<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let actor =
        actor.ok_or_else(|| ApiError::MissingField("actor query param is required".to_string()))?;
    let group_id = full_group_id(id);
    groups.delete(&group_id, &actor).await?;
    Ok(Json(
        serde_json::json!({"deleted": true, "group_id": group_id}),
    ))
}

#[post("/api/groups/<id>/join", format = "json", data = "<body>")]
pub async fn join_group(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
    body: Json<JoinGroupRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let group = groups.join(&full_group_id(id), body.into_inner()).await?;
    Ok(Json(group.public_view()))
}

#[post("/api/groups/<id>/leave", format = "json", data = "<body>")]
pub async fn leave_group(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
    body: Json<LeaveGroupRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let group_id = full_group_id(id);
    groups.leave(&group_id, &body.agent_id).await?;
    Ok(Json(
        serde_json::json!({"left": true, "group_id": group_id, "agent_id": body.agent_id}),
    ))
}

#[get("/api/groups/<id>/members")]
pub async fn group_members(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let group_id = full_group_id(id);
    let members = groups.members(&group_id).await?;
    Ok(Json(serde_json::json!({
        "group_id": group_id,
        "members": members,
        "count": members.len(),
    })))
}

#[post("/api/groups/<id>/members", format = "json", data = "<body>")]
pub async fn add_group_member(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
    body: Json<GroupMemberRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let group = groups
        .add_member(&full_group_id(id), body.into_inner())
        .await?;
    Ok(Json(group.public_view()))
}

#[delete("/api/groups/<id>/members/<agent_id>?<actor>")]
pub async fn remove_group_member(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
    agent_id: &str,
    actor: Option<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let actor =
        actor.ok_or_else(|| ApiError::MissingField("actor query param is required".to_string()))?;
    let group_id = full_group_id(id);
    groups.remove_member(&group_id, &actor, agent_id).await?;
    Ok(Json(
        serde_json::json!({"removed": true, "group_id": group_id, "agent_id": agent_id}),
    ))
}

/// Post to the group: one envelope per member, shared `group_message_id`,
/// partial failure reported per recipient.
#[post("/api/groups/<id>/messages", format = "json", data = "<body>")]
pub async fn post_group_message(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
    body: Json<GroupPostRequest>,
) -> Result<(Status, Json<serde_json::Value>), ApiFailure> {
    let out = groups.post(&full_group_id(id), body.into_inner()).await?;
    Ok((Status::Created, Json(out)))
}

#[get("/api/groups/<id>/messages?<agent_id>&<limit>")]
pub async fn group_history(
    groups: &State<GroupService>,
    _auth: Authed,
    id: &str,
    agent_id: Option<String>,
    limit: Option<usize>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let caller = agent_id
        .ok_or_else(|| ApiError::MissingField("agent_id query param is required".to_string()))?;
    let group_id = full_group_id(id);
    let history = groups.history(&group_id, &caller, limit).await?;
    Ok(Json(serde_json::json!({
        "group_id": group_id,
        "messages": history,
        "count": history.len(),
    })))
}
