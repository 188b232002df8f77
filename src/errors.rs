use rocket::http::{ContentType, Status};
use rocket::request::Request;
use rocket::response::{self, Responder, Response};
use std::io::Cursor;

/// Every failure a hub operation can surface, mapped centrally to an HTTP
/// status and a machine-readable code. Background tasks log instead of
/// propagating.
#[derive(Debug, Clone)]
pub enum ApiError {
    MissingField(String),
    UnsupportedVersion(String),
    InvalidAgentId(String),
    InvalidTimestamp(String),
    InvalidTtl(String),
    Validation(String),
    BodyTooLarge(String),
    Unauthorized(String),
    InvalidSignature(String),
    UntrustedSender(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    /// Purged message status; carries the restricted record.
    Gone(serde_json::Value),
    RateLimited(String),
    Storage(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingField(_) => "MISSING_FIELD",
            ApiError::UnsupportedVersion(_) => "UNSUPPORTED_VERSION",
            ApiError::InvalidAgentId(_) => "INVALID_AGENT_ID",
            ApiError::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            ApiError::InvalidTtl(_) => "INVALID_TTL",
            ApiError::Validation(_) => "INVALID_REQUEST",
            ApiError::BodyTooLarge(_) => "BODY_TOO_LARGE",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::InvalidSignature(_) => "INVALID_SIGNATURE",
            ApiError::UntrustedSender(_) => "UNTRUSTED_SENDER",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Gone(_) => "GONE",
            ApiError::RateLimited(_) => "RATE_LIMITED",
            ApiError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn status(&self) -> Status {
        match self {
            ApiError::MissingField(_)
            | ApiError::UnsupportedVersion(_)
            | ApiError::InvalidAgentId(_)
            | ApiError::InvalidTimestamp(_)
            | ApiError::InvalidTtl(_)
            | ApiError::UntrustedSender(_)
            | ApiError::Validation(_) => Status::BadRequest,
            ApiError::Unauthorized(_) | ApiError::InvalidSignature(_) => Status::Unauthorized,
            ApiError::Forbidden(_) => Status::Forbidden,
            ApiError::NotFound(_) => Status::NotFound,
            ApiError::Conflict(_) => Status::Conflict,
            ApiError::Gone(_) => Status::Gone,
            ApiError::BodyTooLarge(_) => Status::PayloadTooLarge,
            ApiError::RateLimited(_) => Status::TooManyRequests,
            ApiError::Storage(_) => Status::BadGateway,
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::MissingField(m)
            | ApiError::UnsupportedVersion(m)
            | ApiError::InvalidAgentId(m)
            | ApiError::InvalidTimestamp(m)
            | ApiError::InvalidTtl(m)
            | ApiError::Validation(m)
            | ApiError::BodyTooLarge(m)
            | ApiError::Unauthorized(m)
            | ApiError::InvalidSignature(m)
            | ApiError::UntrustedSender(m)
            | ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::Conflict(m)
            | ApiError::RateLimited(m)
            | ApiError::Storage(m) => m.clone(),
            ApiError::Gone(_) => "Message body has been purged".to_string(),
        }
    }

    fn body_json(&self) -> serde_json::Value {
        match self {
            // 410 carries the restricted status record alongside the error code
            ApiError::Gone(record) => {
                let mut body = serde_json::json!({
                    "error": self.message(),
                    "code": self.code(),
                    "message": self.message(),
                });
                if let (Some(obj), Some(rec)) = (body.as_object_mut(), record.as_object()) {
                    for (k, v) in rec {
                        obj.insert(k.clone(), v.clone());
                    }
                }
                body
            }
            _ => serde_json::json!({
                "error": self.message(),
                "code": self.code(),
                "message": self.message(),
            }),
        }
    }
}

impl<'r> Responder<'r, 'static> for ApiError {
    fn respond_to(self, _req: &'r Request<'_>) -> response::Result<'static> {
        let body = self.body_json().to_string();
        Response::build()
            .status(self.status())
            .header(ContentType::JSON)
            .sized_body(body.len(), Cursor::new(body))
            .ok()
    }
}

/// Failures inside a storage backend. Transient remote I/O surfaces to the
/// caller as a 502; callers decide whether to retry.
#[derive(Debug, Clone)]
pub enum StorageError {
    AlreadyExists(String),
    InvalidId(String),
    Io(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            StorageError::InvalidId(id) => write!(f, "invalid id: {id}"),
            StorageError::Io(e) => write!(f, "storage i/o: {e}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::AlreadyExists(id) => ApiError::Conflict(format!("'{id}' already exists")),
            StorageError::InvalidId(id) => ApiError::InvalidAgentId(format!("Invalid id: {id}")),
            StorageError::Io(e) => ApiError::Storage(e),
        }
    }
}
