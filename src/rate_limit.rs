use std::collections::{HashMap, VecDeque};
use std::env;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rocket::Request;
use rocket::http::Header;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;

/// The rate-limited actions the hub exposes. The limiter keys its windows
/// and picks its bounds from this, not from caller-assembled strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Message sends, per IP, per minute.
    Send,
    /// Agent registrations, per IP, per hour.
    Register,
}

impl Action {
    fn key(&self) -> &'static str {
        match self {
            Action::Send => "send",
            Action::Register => "register",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Action::Send => "sends",
            Action::Register => "registrations",
        }
    }
}

/// Configurable rate limit values. All read from environment variables with
/// sensible defaults.
///
/// Environment variables:
/// - `RATE_LIMIT_SENDS` — Max message sends per minute per IP (default: 120)
/// - `RATE_LIMIT_REGISTRATIONS` — Max registrations per hour per IP (default: 30)
pub struct RateLimitConfig {
    /// Sends per minute per IP
    pub sends_max: usize,
    pub sends_window_secs: u64,
    /// Registrations per hour per IP
    pub registrations_max: usize,
    pub registrations_window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            sends_max: 120,
            sends_window_secs: 60,
            registrations_max: 30,
            registrations_window_secs: 3600,
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RATE_LIMIT_SENDS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.sends_max = n;
        }
        if let Ok(val) = env::var("RATE_LIMIT_REGISTRATIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.registrations_max = n;
        }

        config
    }

    fn bounds(&self, action: Action) -> (usize, Duration) {
        match action {
            Action::Send => (self.sends_max, Duration::from_secs(self.sends_window_secs)),
            Action::Register => (
                self.registrations_max,
                Duration::from_secs(self.registrations_window_secs),
            ),
        }
    }

    fn describe(&self, action: Action) -> String {
        let (max, window) = self.bounds(action);
        let period = match window.as_secs() {
            60 => "minute".to_string(),
            3600 => "hour".to_string(),
            secs => format!("{secs}s"),
        };
        format!("Rate limited: max {max} {} per {period}", action.noun())
    }
}

/// Rate limit status for a granted request, for response headers.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    pub limit: usize,
    pub remaining: usize,
}

/// Sliding-window limiter. Each (action, ip) pair keeps a queue of hit
/// timestamps ordered oldest-first, so aging out is popping from the front
/// and the retry hint is just the front entry's remaining lifetime.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        RateLimiter {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit or reject one hit for `action` from `ip`. A rejection carries
    /// the ready-to-serve 429 responder.
    pub fn check(
        &self,
        action: Action,
        ip: &str,
        config: &RateLimitConfig,
    ) -> Result<RateLimitInfo, RateLimitedError> {
        let (max, window) = config.bounds(action);
        let now = Instant::now();

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        let hits = windows
            .entry(format!("{}:{ip}", action.key()))
            .or_default();

        while hits
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            hits.pop_front();
        }

        if hits.len() < max {
            hits.push_back(now);
            return Ok(RateLimitInfo {
                limit: max,
                remaining: max - hits.len(),
            });
        }

        // Full window: a slot opens when the oldest hit ages out
        let retry_after_secs = hits
            .front()
            .map(|oldest| {
                window
                    .saturating_sub(now.duration_since(*oldest))
                    .as_secs()
                    + 1
            })
            .unwrap_or(1);

        Err(RateLimitedError {
            message: config.describe(action),
            limit: max,
            retry_after_secs,
        })
    }
}

/// 429 responder with the standard rate limit headers.
pub struct RateLimitedError {
    pub message: String,
    pub limit: usize,
    pub retry_after_secs: u64,
}

impl<'r, 'o: 'r> Responder<'r, 'o> for RateLimitedError {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        let body = Json(serde_json::json!({
            "error": self.message,
            "code": "RATE_LIMITED",
            "message": self.message,
            "retry_after_secs": self.retry_after_secs,
            "limit": self.limit,
            "remaining": 0
        }));

        Response::build_from(body.respond_to(req)?)
            .status(rocket::http::Status::TooManyRequests)
            .header(Header::new("X-RateLimit-Limit", self.limit.to_string()))
            .header(Header::new("X-RateLimit-Remaining", "0".to_string()))
            .header(Header::new(
                "X-RateLimit-Reset",
                self.retry_after_secs.to_string(),
            ))
            .header(Header::new(
                "Retry-After",
                self.retry_after_secs.to_string(),
            ))
            .ok()
    }
}
