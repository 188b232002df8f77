// Route module decomposition — each domain area in its own file.
// Shared types (request guards, failure responder) live here; route
// functions in submodules.

mod agents;
mod groups;
mod keys;
mod messages;
mod roundtables;
mod system;

// --- Re-exports (all route functions used by lib.rs mount) ---

pub use agents::{
    add_trusted, delete_agent, delete_webhook, get_agent, get_trusted, get_webhook, heartbeat,
    list_agents, register, remove_trusted, rotate_key, set_webhook,
};
pub use groups::{
    add_group_member, create_group, delete_group, get_group, group_history, group_members,
    join_group, leave_group, list_groups, post_group_message, remove_group_member,
};
pub use keys::{issue_key, revoke_key};
pub use messages::{
    ack_message, inbox_stats, message_status, nack_message, pull_message, reclaim_inbox,
    reply_message, send_message,
};
pub use roundtables::{
    create_round_table, get_round_table, list_round_tables, resolve_round_table, speak_round_table,
};
pub use system::{health, not_found, stats, too_many_requests, unauthorized, unprocessable};

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

use crate::config::HubConfig;
use crate::crypto;
use crate::errors::ApiError;
use crate::models::{Agent, now_ms};
use crate::rate_limit::RateLimitedError;
use crate::storage::DynStorage;

/// One failure type per handler: either a mapped hub error or a rate-limit
/// rejection with its headers.
#[derive(rocket::Responder)]
pub enum ApiFailure {
    Api(ApiError),
    Rate(RateLimitedError),
}

impl From<ApiError> for ApiFailure {
    fn from(e: ApiError) -> Self {
        ApiFailure::Api(e)
    }
}

impl From<crate::errors::StorageError> for ApiFailure {
    fn from(e: crate::errors::StorageError) -> Self {
        ApiFailure::Api(e.into())
    }
}

// --- Shared request guards ---

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// Boundary auth: when `API_KEY_REQUIRED` is set, every `/api` route wants
/// the master key or a live issued key (`X-Api-Key` or bearer). Single-use
/// issued keys are burned atomically on their first successful use.
pub struct Authed;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Authed {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<HubConfig>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        if !config.api_key_required {
            return Outcome::Success(Authed);
        }

        let presented = req.headers().get_one("X-Api-Key").or_else(|| {
            req.headers()
                .get_one("Authorization")
                .and_then(|a| a.strip_prefix("Bearer "))
        });
        let Some(presented) = presented else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        if config.master_api_key.as_deref() == Some(presented) {
            return Outcome::Success(Authed);
        }

        let Some(storage) = req.rocket().state::<DynStorage>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let hash = crypto::sha256_hex(presented.as_bytes());
        let key = match storage.find_issued_key_by_hash(&hash).await {
            Ok(Some(key)) => key,
            _ => return Outcome::Error((Status::Unauthorized, ())),
        };
        if key.revoked || key.expires_at_ms.is_some_and(|t| t < now_ms()) {
            return Outcome::Error((Status::Unauthorized, ()));
        }
        if key.single_use {
            match storage.burn_single_use_key(&key.key_id).await {
                Ok(true) => {}
                _ => return Outcome::Error((Status::Unauthorized, ())),
            }
        }
        Outcome::Success(Authed)
    }
}

/// Master key only; gates issued-key management.
pub struct MasterKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for MasterKey {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(config) = req.rocket().state::<HubConfig>() else {
            return Outcome::Error((Status::InternalServerError, ()));
        };
        let Some(master) = config.master_api_key.as_deref() else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let presented = req.headers().get_one("X-Api-Key").or_else(|| {
            req.headers()
                .get_one("Authorization")
                .and_then(|a| a.strip_prefix("Bearer "))
        });
        if presented == Some(master) {
            Outcome::Success(MasterKey)
        } else {
            Outcome::Error((Status::Unauthorized, ()))
        }
    }
}

/// HTTP Signature header material for agent-scoped state-changing requests.
/// The guard only collects; verification happens in the handler, which has
/// the raw body for the digest.
pub struct HttpSig {
    pub key_id: String,
    pub algorithm: String,
    pub signed_headers: Vec<String>,
    pub signature: String,
    pub date: String,
    pub digest: Option<String>,
    pub method: String,
    pub path: String,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for HttpSig {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let Some(header) = req.headers().get_one("Signature") else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let Some(date) = req.headers().get_one("Date") else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        let mut key_id = None;
        let mut algorithm = None;
        let mut signed_headers = Vec::new();
        let mut signature = None;
        for part in header.split(',') {
            let Some((k, v)) = part.trim().split_once('=') else {
                continue;
            };
            let v = v.trim_matches('"');
            match k {
                "keyId" => key_id = Some(v.to_string()),
                "algorithm" => algorithm = Some(v.to_string()),
                "headers" => {
                    signed_headers = v.split_whitespace().map(str::to_string).collect();
                }
                "signature" => signature = Some(v.to_string()),
                _ => {}
            }
        }
        let (Some(key_id), Some(signature)) = (key_id, signature) else {
            return Outcome::Error((Status::Unauthorized, ()));
        };

        Outcome::Success(HttpSig {
            key_id,
            algorithm: algorithm.unwrap_or_else(|| "ed25519".to_string()),
            signed_headers,
            signature,
            date: date.to_string(),
            digest: req.headers().get_one("Digest").map(str::to_string),
            method: req.method().as_str().to_string(),
            path: req.uri().path().to_string(),
        })
    }
}

impl HttpSig {
    /// Verify the signature over `(request-target)`, `date` and the body
    /// digest against the agent's live keys.
    pub fn verify(&self, agent: &Agent, body: &[u8]) -> Result<(), ApiError> {
        if self.algorithm != "ed25519" {
            return Err(ApiError::InvalidSignature(format!(
                "Unsupported signature algorithm '{}'",
                self.algorithm
            )));
        }
        if !self.signed_headers.iter().any(|h| h == "(request-target)") {
            return Err(ApiError::InvalidSignature(
                "(request-target) must be in the signed header list".to_string(),
            ));
        }
        crypto::check_date_skew(&self.date, now_ms()).map_err(ApiError::InvalidTimestamp)?;

        let computed = crypto::body_digest_header(body);
        if let Some(digest) = &self.digest
            && digest != &computed
        {
            return Err(ApiError::InvalidSignature(
                "Digest header does not match the request body".to_string(),
            ));
        }

        let signing = crypto::http_signing_string(&self.method, &self.path, &self.date, &computed);
        let keys: Vec<_> = agent
            .verification_keys(now_ms())
            .into_iter()
            .filter_map(|e| crypto::decode_public_key(&e.key))
            .collect();
        if keys
            .iter()
            .any(|k| crypto::verify_base(k, &signing, &self.signature))
        {
            Ok(())
        } else {
            Err(ApiError::InvalidSignature(
                "HTTP signature verification failed".to_string(),
            ))
        }
    }
}
