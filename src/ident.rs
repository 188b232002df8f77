use crate::models::MAX_AGENT_ID_LEN;

/// Character set a bare agent ID may use: `[A-Za-z0-9._:/-]`, length 1–255.
pub fn is_valid_agent_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_AGENT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '/' | '-'))
}

/// Prefixes a registered agent ID may not claim.
pub fn has_reserved_prefix(id: &str) -> bool {
    id.starts_with("agent://") || id.starts_with("did:") || id.starts_with("group://")
}

/// Strip the legacy `agent://` wrapper; bare IDs pass through unchanged.
/// DIDs are resolved separately against the registry.
pub fn canonical_agent_ref(raw: &str) -> &str {
    raw.strip_prefix("agent://").unwrap_or(raw)
}

pub fn is_did(raw: &str) -> bool {
    raw.starts_with("did:seed:") || raw.starts_with("did:web:")
}

/// Generate an agent ID when registration omits one: `agent-<12 hex>`.
pub fn generate_agent_id() -> String {
    format!("agent-{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Generate a group ID: `group://<slug>-<8 hex>`.
pub fn generate_group_id(name: &str) -> String {
    format!(
        "group://{}-{}",
        slugify(name),
        &uuid::Uuid::new_v4().simple().to_string()[..8]
    )
}

/// Generate a round-table ID: `rt_<12 hex>`.
pub fn generate_round_table_id() -> String {
    format!("rt_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Generate a webhook secret: `whs_<32 hex chars>`.
pub fn generate_webhook_secret() -> String {
    format!("whs_{:032x}", uuid::Uuid::new_v4().as_u128())
}

/// Generate a raw issued API key: `adk_<32 hex chars>`.
pub fn generate_api_key() -> String {
    format!("adk_{:032x}", uuid::Uuid::new_v4().as_u128())
}

/// Lowercase, alphanumeric runs joined by single hyphens.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("group");
    }
    slug
}

/// Group name rule: 1–100 chars, alphanumeric plus spaces, hyphens,
/// underscores and periods.
pub fn is_valid_group_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= crate::models::MAX_GROUP_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
}
