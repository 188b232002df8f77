use std::env;

/// Hub configuration. All values read from environment variables with
/// defaults matching the reference deployment.
///
/// Environment variables:
/// - `PORT` — listen port (overrides Rocket's own config when set)
/// - `NODE_ENV` — deployment environment label, `development` by default
/// - `STORAGE_BACKEND` — `memory` or `remote` (default: memory)
/// - `HEARTBEAT_INTERVAL_MS` — advisory client heartbeat cadence (default: 60000)
/// - `HEARTBEAT_TIMEOUT_MS` — silence before an agent is marked offline (default: 300000)
/// - `MESSAGE_TTL_SEC` — default envelope TTL (default: 86400)
/// - `MAX_MESSAGE_SIZE_KB` — body size ceiling (default: 1024)
/// - `MAX_MESSAGES_PER_AGENT` — non-terminal inbox cap (default: 10000)
/// - `CLEANUP_INTERVAL_MS` — sweeper pass interval (default: 60000)
/// - `TERMINAL_RETENTION_MS` — acked/expired retention window (default: 3600000)
/// - `API_KEY_REQUIRED` / `MASTER_API_KEY` — boundary auth
/// - `CORS_ORIGIN` — allowed origin (default: any)
/// - `REMOTE_BASE_URL`, `REMOTE_APP_ID`, `REMOTE_API_KEY` — remote backend
#[derive(Debug, Clone)]
pub struct HubConfig {
    pub port: Option<u16>,
    pub environment: String,
    pub storage_backend: String,
    pub heartbeat_interval_ms: i64,
    pub heartbeat_timeout_ms: i64,
    pub message_ttl_sec: i64,
    pub max_message_size_kb: usize,
    pub max_messages_per_agent: i64,
    pub cleanup_interval_ms: u64,
    pub terminal_retention_ms: i64,
    pub api_key_required: bool,
    pub master_api_key: Option<String>,
    pub cors_origin: Option<String>,
    pub remote_base_url: Option<String>,
    pub remote_app_id: Option<String>,
    pub remote_api_key: Option<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            port: None,
            environment: "development".to_string(),
            storage_backend: "memory".to_string(),
            heartbeat_interval_ms: 60_000,
            heartbeat_timeout_ms: 300_000,
            message_ttl_sec: 86_400,
            max_message_size_kb: 1024,
            max_messages_per_agent: 10_000,
            cleanup_interval_ms: 60_000,
            terminal_retention_ms: 3_600_000,
            api_key_required: false,
            master_api_key: None,
            cors_origin: None,
            remote_base_url: None,
            remote_app_id: None,
            remote_api_key: None,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("PORT")
            && let Ok(n) = val.parse::<u16>()
        {
            config.port = Some(n);
        }
        if let Ok(val) = env::var("NODE_ENV")
            && !val.is_empty()
        {
            config.environment = val;
        }
        if let Ok(val) = env::var("STORAGE_BACKEND") {
            config.storage_backend = val;
        }
        if let Ok(val) = env::var("HEARTBEAT_INTERVAL_MS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.heartbeat_interval_ms = n;
        }
        if let Ok(val) = env::var("HEARTBEAT_TIMEOUT_MS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.heartbeat_timeout_ms = n;
        }
        if let Ok(val) = env::var("MESSAGE_TTL_SEC")
            && let Ok(n) = val.parse::<i64>()
        {
            config.message_ttl_sec = n;
        }
        if let Ok(val) = env::var("MAX_MESSAGE_SIZE_KB")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_message_size_kb = n;
        }
        if let Ok(val) = env::var("MAX_MESSAGES_PER_AGENT")
            && let Ok(n) = val.parse::<i64>()
        {
            config.max_messages_per_agent = n;
        }
        if let Ok(val) = env::var("CLEANUP_INTERVAL_MS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.cleanup_interval_ms = n;
        }
        if let Ok(val) = env::var("TERMINAL_RETENTION_MS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.terminal_retention_ms = n;
        }
        if let Ok(val) = env::var("API_KEY_REQUIRED") {
            config.api_key_required = val == "1" || val.to_lowercase() == "true";
        }
        if let Ok(val) = env::var("MASTER_API_KEY")
            && !val.is_empty()
        {
            config.master_api_key = Some(val);
        }
        if let Ok(val) = env::var("CORS_ORIGIN")
            && !val.is_empty()
        {
            config.cors_origin = Some(val);
        }
        if let Ok(val) = env::var("REMOTE_BASE_URL") {
            config.remote_base_url = Some(val);
        }
        if let Ok(val) = env::var("REMOTE_APP_ID") {
            config.remote_app_id = Some(val);
        }
        if let Ok(val) = env::var("REMOTE_API_KEY") {
            config.remote_api_key = Some(val);
        }

        config
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_message_size_kb * 1024
    }
}
