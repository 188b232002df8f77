use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, get, post};

use super::{ApiFailure, Authed, ClientIp, HttpSig};
use crate::agents::AgentService;
use crate::errors::ApiError;
use crate::models::{RegisterRequest, RotateKeyRequest, TrustRequest, WebhookConfigRequest};
use crate::rate_limit::{Action, RateLimitConfig, RateLimiter};
use crate::storage::AgentFilter;

#[post("/api/agents/register", format = "json", data = "<body>")]
pub async fn register(
    agents: &State<AgentService>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    _auth: Authed,
    body: Json<RegisterRequest>,
) -> Result<(Status, Json<serde_json::Value>), ApiFailure> {
    rate_limiter
        .check(Action::Register, &ip.0, rate_config)
        .map_err(ApiFailure::Rate)?;

    let out = agents.register(body.into_inner()).await?;
    Ok((Status::Created, Json(out)))
}

#[get("/api/agents?<status>&<agent_type>")]
pub async fn list_agents(
    agents: &State<AgentService>,
    _auth: Authed,
    status: Option<String>,
    agent_type: Option<String>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let list = agents.list(AgentFilter { status, agent_type }).await?;
    let views: Vec<serde_json::Value> = list.iter().map(|a| a.public_view()).collect();
    Ok(Json(serde_json::json!({
        "agents": views,
        "count": views.len(),
    })))
}

#[get("/api/agents/<id>")]
pub async fn get_agent(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    Ok(Json(agents.get(id).await?.public_view()))
}

#[delete("/api/agents/<id>")]
pub async fn delete_agent(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    agents.deregister(id).await?;
    Ok(Json(serde_json::json!({"deleted": true, "agent_id": id})))
}

#[post("/api/agents/<id>/heartbeat")]
pub async fn heartbeat(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let agent = agents.heartbeat(id).await?;
    Ok(Json(serde_json::json!({
        "agent_id": agent.agent_id,
        "status": agent.status,
        "last_heartbeat_ms": agent.last_heartbeat_ms,
    })))
}

/// Key rotation rides on an HTTP signature from one of the agent's current
/// keys; the handler takes the raw body so the digest is bit-exact.
#[post("/api/agents/<id>/rotate-key", format = "json", data = "<body>")]
pub async fn rotate_key(
    agents: &State<AgentService>,
    _auth: Authed,
    sig: HttpSig,
    id: &str,
    body: String,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let agent = agents.get(id).await?;
    sig.verify(&agent, body.as_bytes())?;
    let req: RotateKeyRequest = serde_json::from_str(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid rotate-key body: {e}")))?;
    Ok(Json(agents.rotate_key(id, req).await?))
}

// --- Trust list ---

#[get("/api/agents/<id>/trusted")]
pub async fn get_trusted(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let trusted = agents.trusted_agents(id).await?;
    Ok(Json(
        serde_json::json!({"agent_id": id, "trusted_agents": trusted}),
    ))
}

#[post("/api/agents/<id>/trusted", format = "json", data = "<body>")]
pub async fn add_trusted(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
    body: Json<TrustRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let trusted = agents.add_trusted(id, &body.agent_id).await?;
    Ok(Json(
        serde_json::json!({"agent_id": id, "trusted_agents": trusted}),
    ))
}

#[delete("/api/agents/<id>/trusted/<trusted>")]
pub async fn remove_trusted(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
    trusted: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let list = agents.remove_trusted(id, trusted).await?;
    Ok(Json(
        serde_json::json!({"agent_id": id, "trusted_agents": list}),
    ))
}

// --- Webhook config ---

#[get("/api/agents/<id>/webhook")]
pub async fn get_webhook(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    Ok(Json(agents.webhook_config(id).await?))
}

#[post("/api/agents/<id>/webhook", format = "json", data = "<body>")]
pub async fn set_webhook(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
    body: Json<WebhookConfigRequest>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    Ok(Json(agents.set_webhook(id, body.into_inner()).await?))
}

#[delete("/api/agents/<id>/webhook")]
pub async fn delete_webhook(
    agents: &State<AgentService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    agents.delete_webhook(id).await?;
    Ok(Json(serde_json::json!({"deleted": true, "agent_id": id})))
}
