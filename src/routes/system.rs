use rocket::serde::json::Json;
use rocket::{State, catch, get};

use super::{ApiFailure, Authed};
use crate::models::{AGENT_STATUS_ONLINE, RT_STATUS_OPEN};
use crate::storage::{AgentFilter, DynStorage, GroupFilter, RoundTableFilter};

#[get("/health")]
pub fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "admp-hub",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[get("/api/stats")]
pub async fn stats(
    storage: &State<DynStorage>,
    _auth: Authed,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let agents = storage.list_agents(AgentFilter::default()).await?;
    let online = agents
        .iter()
        .filter(|a| a.status == AGENT_STATUS_ONLINE)
        .count();

    // Inbox totals summed per agent; purged/terminal records still in
    // retention are counted under their status.
    let mut queued = 0;
    let mut leased = 0;
    let mut acked = 0;
    let mut expired = 0;
    let mut purged = 0;
    for agent in &agents {
        let s = storage.get_inbox_stats(&agent.agent_id).await?;
        queued += s.queued;
        leased += s.leased;
        acked += s.acked;
        expired += s.expired;
        purged += s.purged;
    }

    let groups = storage
        .list_groups(GroupFilter {
            include_hidden: true,
            member: None,
        })
        .await?;
    let round_tables = storage
        .list_round_tables(RoundTableFilter::default())
        .await?;
    let open_round_tables = round_tables
        .iter()
        .filter(|rt| rt.status == RT_STATUS_OPEN)
        .count();

    Ok(Json(serde_json::json!({
        "agents": { "total": agents.len(), "online": online },
        "messages": {
            "queued": queued,
            "leased": leased,
            "acked": acked,
            "expired": expired,
            "purged": purged,
        },
        "groups": groups.len(),
        "round_tables": { "total": round_tables.len(), "open": open_round_tables },
    })))
}

// --- Catchers ---

#[catch(404)]
pub fn not_found() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "Not found",
        "code": "NOT_FOUND",
        "message": "Not found"
    }))
}

#[catch(401)]
pub fn unauthorized() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "Missing or invalid API credentials",
        "code": "UNAUTHORIZED",
        "message": "Missing or invalid API credentials"
    }))
}

#[catch(422)]
pub fn unprocessable() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "Malformed request body",
        "code": "INVALID_REQUEST",
        "message": "Malformed request body"
    }))
}

#[catch(429)]
pub fn too_many_requests() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "error": "Too many requests",
        "code": "RATE_LIMITED",
        "message": "Too many requests"
    }))
}
