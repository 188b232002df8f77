use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::{State, delete, post};

use super::{ApiFailure, MasterKey};
use crate::crypto;
use crate::errors::ApiError;
use crate::ident;
use crate::models::{IssueKeyRequest, IssuedKey, now_ms};
use crate::storage::DynStorage;

/// Issue an API key. The raw key is returned exactly once; only its SHA-256
/// is stored, alongside the hash-index entry that makes verification O(1).
#[post("/api/keys", format = "json", data = "<body>")]
pub async fn issue_key(
    storage: &State<DynStorage>,
    _master: MasterKey,
    body: Option<Json<IssueKeyRequest>>,
) -> Result<(Status, Json<serde_json::Value>), ApiFailure> {
    let req = body.map(|b| b.into_inner()).unwrap_or(IssueKeyRequest {
        scope: None,
        single_use: None,
        expires_in_sec: None,
    });

    let raw_key = ident::generate_api_key();
    let now = now_ms();
    let key = IssuedKey {
        key_id: uuid::Uuid::new_v4().to_string(),
        key_hash: crypto::sha256_hex(raw_key.as_bytes()),
        scope: req.scope.unwrap_or_else(|| "api".to_string()),
        single_use: req.single_use.unwrap_or(false),
        revoked: false,
        used_at_ms: None,
        created_at_ms: now,
        expires_at_ms: req.expires_in_sec.map(|s| now + s.max(0) * 1000),
    };
    let created = storage.create_issued_key(key).await?;

    Ok((
        Status::Created,
        Json(serde_json::json!({
            "key_id": created.key_id,
            "api_key": raw_key,
            "scope": created.scope,
            "single_use": created.single_use,
            "expires_at_ms": created.expires_at_ms,
        })),
    ))
}

#[delete("/api/keys/<key_id>")]
pub async fn revoke_key(
    storage: &State<DynStorage>,
    _master: MasterKey,
    key_id: &str,
) -> Result<Json<serde_json::Value>, ApiFailure> {
    if !storage.revoke_issued_key(key_id).await? {
        return Err(ApiError::NotFound(format!("Key '{key_id}' not found")).into());
    }
    Ok(Json(serde_json::json!({"revoked": true, "key_id": key_id})))
}
