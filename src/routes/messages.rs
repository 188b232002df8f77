use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, get, post};

use super::{ApiFailure, Authed, ClientIp};
use crate::errors::ApiError;
use crate::ident;
use crate::inbox::InboxService;
use crate::models::{AckRequest, Envelope, NackRequest, PullRequest, ReplyRequest, StoredMessage};
use crate::rate_limit::{Action, RateLimitConfig, RateLimiter};

#[derive(rocket::Responder)]
pub enum PullOutcome {
    #[response(status = 200)]
    Message(Json<StoredMessage>),
    Empty(Status),
}

/// Send a signed envelope to the recipient's inbox. The body is parsed by
/// hand so a missing field surfaces as the protocol's own error shape.
#[post("/api/agents/<to>/messages", format = "json", data = "<body>")]
pub async fn send_message(
    inbox: &State<InboxService>,
    rate_limiter: &State<RateLimiter>,
    rate_config: &State<RateLimitConfig>,
    ip: ClientIp,
    _auth: Authed,
    to: &str,
    body: Json<serde_json::Value>,
) -> Result<(Status, Json<serde_json::Value>), ApiFailure> {
    rate_limiter
        .check(Action::Send, &ip.0, rate_config)
        .map_err(ApiFailure::Rate)?;

    let envelope: Envelope = serde_json::from_value(body.into_inner())
        .map_err(|e| ApiError::MissingField(format!("Invalid envelope: {e}")))?;

    // The path names the recipient; the signed envelope is authoritative but
    // must agree with it (DID references are resolved by the engine).
    if !ident::is_did(&envelope.to) && ident::canonical_agent_ref(&envelope.to) != to {
        return Err(ApiError::Validation(format!(
            "Envelope 'to' ({}) does not match the path recipient ({to})",
            envelope.to
        ))
        .into());
    }

    let out = inbox.send(envelope).await?;
    Ok((Status::Created, Json(out)))
}

#[post("/api/agents/<id>/inbox/pull", format = "json", data = "<body>")]
pub async fn pull_message(
    inbox: &State<InboxService>,
    _auth: Authed,
    id: &str,
    body: Option<Json<PullRequest>>,
) -> Result<PullOutcome, ApiFailure> {
    let visibility_timeout = body.and_then(|b| b.visibility_timeout);
    match inbox.pull(id, visibility_timeout).await? {
        Some(message) => Ok(PullOutcome::Message(Json(message))),
        None => Ok(PullOutcome::Empty(Status::NoContent)),
    }
}

#[get("/api/agents/<id>/inbox/stats")]
pub async fn inbox_stats(
    inbox: &State<InboxService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let stats = inbox.stats(id).await?;
    Ok(Json(serde_json::json!({
        "agent_id": id,
        "stats": stats,
    })))
}

/// Force-run lease reclamation instead of waiting for the next sweep.
#[post("/api/agents/<id>/inbox/reclaim")]
pub async fn reclaim_inbox(
    inbox: &State<InboxService>,
    _auth: Authed,
    id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    // Reclamation is global; the agent path keeps it inbox-scoped for callers.
    inbox.stats(id).await?;
    let reclaimed = inbox.reclaim().await?;
    Ok(Json(serde_json::json!({"reclaimed": reclaimed})))
}

#[post("/api/agents/<id>/messages/<mid>/ack", format = "json", data = "<body>")]
pub async fn ack_message(
    inbox: &State<InboxService>,
    _auth: Authed,
    id: &str,
    mid: &str,
    body: Option<Json<AckRequest>>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let req = body.map(|b| b.into_inner()).unwrap_or(AckRequest { result: None });
    let message = inbox.ack(id, mid, req).await?;
    Ok(Json(serde_json::json!({
        "message_id": message.id,
        "status": message.status,
        "acked_at_ms": message.acked_at_ms,
    })))
}

#[post("/api/agents/<id>/messages/<mid>/nack", format = "json", data = "<body>")]
pub async fn nack_message(
    inbox: &State<InboxService>,
    _auth: Authed,
    id: &str,
    mid: &str,
    body: Option<Json<NackRequest>>,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    let req = body.map(|b| b.into_inner()).unwrap_or(NackRequest {
        extend_sec: None,
        requeue: None,
    });
    let message = inbox.nack(id, mid, req).await?;
    Ok(Json(serde_json::json!({
        "message_id": message.id,
        "status": message.status,
        "lease_until_ms": message.lease_until_ms,
    })))
}

#[post("/api/agents/<id>/messages/<mid>/reply", format = "json", data = "<body>")]
pub async fn reply_message(
    inbox: &State<InboxService>,
    _auth: Authed,
    id: &str,
    mid: &str,
    body: Json<ReplyRequest>,
) -> Result<(Status, Json<serde_json::Value>), ApiFailure> {
    let out = inbox.reply(id, mid, body.into_inner()).await?;
    Ok((Status::Created, Json(out)))
}

/// 410 Gone with the restricted record once the body has been purged.
#[get("/api/messages/<mid>/status")]
pub async fn message_status(
    inbox: &State<InboxService>,
    _auth: Authed,
    mid: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    Ok(Json(inbox.status(mid).await?))
}
