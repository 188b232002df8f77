use serde::{Deserialize, Serialize};

pub const ENVELOPE_VERSION: &str = "1.0";

/// Default message TTL (24 h) and the hard ceiling (7 d).
pub const DEFAULT_TTL_SEC: i64 = 86_400;
pub const MAX_TTL_SEC: i64 = 604_800;

pub const MAX_SUBJECT_LEN: usize = 255;
pub const MAX_GROUP_SUBJECT_LEN: usize = 200;
pub const MAX_AGENT_ID_LEN: usize = 255;
pub const MAX_GROUP_NAME_LEN: usize = 100;
pub const MAX_THREAD_ENTRIES: usize = 200;
pub const MAX_ROUND_TABLE_PARTICIPANTS: usize = 20;

/// Accepted clock skew between envelope timestamp and ingress time.
pub const MAX_TIMESTAMP_SKEW_SEC: i64 = 300;

/// Milliseconds since the Unix epoch, the clock all server-side fields use.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// --- Agents ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PublicKeyEntry {
    /// Base64-encoded 32-byte Ed25519 public key.
    pub key: String,
    pub active: bool,
    /// Grace deadline after rotation; the key still verifies until this passes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivate_at_ms: Option<i64>,
    pub added_at_ms: i64,
}

pub const AGENT_STATUS_ONLINE: &str = "online";
pub const AGENT_STATUS_OFFLINE: &str = "offline";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Agent {
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub did: Option<String>,
    /// Primary public key (base64). Kept in sync with the newest active entry
    /// in `public_keys`.
    pub public_key: String,
    pub public_keys: Vec<PublicKeyEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Empty list means any registered sender is accepted.
    #[serde(default)]
    pub trusted_agents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_ms: Option<i64>,
    pub status: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Agent {
    /// Public record as returned by the API. Never includes the webhook secret.
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "agent_id": self.agent_id,
            "did": self.did,
            "public_key": self.public_key,
            "public_keys": self.public_keys,
            "agent_type": self.agent_type,
            "metadata": self.metadata,
            "trusted_agents": self.trusted_agents,
            "webhook_url": self.webhook_url,
            "last_heartbeat_ms": self.last_heartbeat_ms,
            "status": self.status,
            "created_at_ms": self.created_at_ms,
            "updated_at_ms": self.updated_at_ms,
        })
    }

    /// Keys an incoming envelope may verify against: active keys plus rotated
    /// keys still inside their grace window.
    pub fn verification_keys(&self, now_ms: i64) -> Vec<&PublicKeyEntry> {
        self.public_keys
            .iter()
            .filter(|k| k.active || k.deactivate_at_ms.is_some_and(|t| t > now_ms))
            .collect()
    }
}

// --- Messages ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignatureBlock {
    pub alg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Base64-encoded Ed25519 signature over the canonical signing base.
    pub sig: String,
}

/// The signed wire envelope. Immutable after ingress; the optional
/// `ephemeral`/`ephemeral_ttl_sec` hints ride alongside but are not part of
/// the signing base.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Envelope {
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: serde_json::Value,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_sec: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_ttl_sec: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureBlock>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Leased,
    Acked,
    Expired,
    Purged,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Queued => "queued",
            MessageStatus::Leased => "leased",
            MessageStatus::Acked => "acked",
            MessageStatus::Expired => "expired",
            MessageStatus::Purged => "purged",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MessageStatus::Acked
                | MessageStatus::Expired
                | MessageStatus::Purged
                | MessageStatus::Failed
        )
    }
}

pub const PURGE_REASON_ACKED: &str = "acked";
pub const PURGE_REASON_TTL: &str = "ttl_expired";

/// A message as the hub stores it: the ingress envelope plus server lifecycle
/// fields.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoredMessage {
    pub id: String,
    pub from_agent_id: String,
    pub to_agent_id: String,
    pub envelope: Envelope,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_until_ms: Option<i64>,
    pub attempts: i64,
    pub ttl_sec: i64,
    pub ephemeral: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral_ttl_sec: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acked_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook_delivered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purged_at_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purge_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Shared across every fanout copy of one group post.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_message_id: Option<String>,
}

impl StoredMessage {
    /// Public status record. Purged messages keep metadata but never a body.
    pub fn status_view(&self) -> serde_json::Value {
        if self.status == MessageStatus::Purged {
            serde_json::json!({
                "id": self.id,
                "from": self.from_agent_id,
                "to": self.to_agent_id,
                "subject": self.envelope.subject,
                "status": self.status,
                "body": serde_json::Value::Null,
                "purged_at_ms": self.purged_at_ms,
                "purge_reason": self.purge_reason,
            })
        } else {
            serde_json::json!({
                "id": self.id,
                "from": self.from_agent_id,
                "to": self.to_agent_id,
                "subject": self.envelope.subject,
                "type": self.envelope.message_type,
                "status": self.status,
                "attempts": self.attempts,
                "lease_until_ms": self.lease_until_ms,
                "created_at_ms": self.created_at_ms,
                "updated_at_ms": self.updated_at_ms,
                "acked_at_ms": self.acked_at_ms,
                "webhook_delivered": self.webhook_delivered,
                "correlation_id": self.envelope.correlation_id,
            })
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct InboxStats {
    pub queued: i64,
    pub leased: i64,
    pub acked: i64,
    pub expired: i64,
    pub purged: i64,
    pub failed: i64,
    pub total: i64,
}

// --- Groups ---

pub const GROUP_ACCESS_OPEN: &str = "open";
pub const GROUP_ACCESS_KEY: &str = "key-protected";
pub const GROUP_ACCESS_INVITE: &str = "invite-only";

pub const ROLE_OWNER: &str = "owner";
pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_MEMBER: &str = "member";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GroupMember {
    pub agent_id: String,
    pub role: String,
    pub joined_at_ms: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GroupSettings {
    pub history_visible: bool,
    pub max_members: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_ttl_sec: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Group {
    /// `group://<slug>-<8 hex>`
    pub group_id: String,
    pub name: String,
    pub created_by: String,
    pub access: String,
    /// SHA-256 hex of the join key for key-protected groups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_key_hash: Option<String>,
    pub settings: GroupSettings,
    pub members: Vec<GroupMember>,
    /// Round-table backing groups are hidden from listings.
    #[serde(default)]
    pub hidden: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Group {
    pub fn member(&self, agent_id: &str) -> Option<&GroupMember> {
        self.members.iter().find(|m| m.agent_id == agent_id)
    }

    pub fn role_of(&self, agent_id: &str) -> Option<&str> {
        self.member(agent_id).map(|m| m.role.as_str())
    }

    /// Group record as returned by the API; the join-key hash stays private.
    pub fn public_view(&self) -> serde_json::Value {
        serde_json::json!({
            "group_id": self.group_id,
            "name": self.name,
            "created_by": self.created_by,
            "access": self.access,
            "settings": self.settings,
            "members": self.members,
            "member_count": self.members.len(),
            "created_at_ms": self.created_at_ms,
            "updated_at_ms": self.updated_at_ms,
        })
    }
}

// --- Round tables ---

pub const RT_STATUS_OPEN: &str = "open";
pub const RT_STATUS_RESOLVED: &str = "resolved";
pub const RT_STATUS_EXPIRED: &str = "expired";

pub const RT_DEFAULT_EXPIRY_SEC: i64 = 1_800;
pub const RT_MIN_EXPIRY_SEC: i64 = 60;
pub const RT_MAX_EXPIRY_SEC: i64 = 604_800;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ThreadEntry {
    pub id: String,
    pub from: String,
    pub message: String,
    pub ts: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RoundTable {
    /// `rt_<12 hex>`
    pub rt_id: String,
    pub topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    pub facilitator: String,
    pub participants: Vec<String>,
    /// Backing group; cleared once the session closes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub status: String,
    pub thread: Vec<ThreadEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
}

// --- Issued API keys ---

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IssuedKey {
    pub key_id: String,
    /// SHA-256 hex of the raw key; the raw key itself is never stored.
    pub key_hash: String,
    pub scope: String,
    pub single_use: bool,
    pub revoked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at_ms: Option<i64>,
    pub created_at_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<i64>,
}

// --- Request bodies ---

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub agent_id: Option<String>,
    /// Base64-encoded 32-byte Ed25519 seed; enables `did:seed:` mode.
    #[serde(default)]
    pub seed: Option<String>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequest {
    #[serde(default)]
    pub visibility_timeout: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AckRequest {
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct NackRequest {
    #[serde(default)]
    pub extend_sec: Option<i64>,
    #[serde(default)]
    pub requeue: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    pub timestamp: String,
    pub signature: SignatureBlock,
}

#[derive(Debug, Deserialize)]
pub struct TrustRequest {
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookConfigRequest {
    pub url: String,
    #[serde(default)]
    pub secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RotateKeyRequest {
    /// Base64-encoded replacement public key. Absent: the hub generates a
    /// fresh keypair and returns the secret once.
    #[serde(default)]
    pub new_public_key: Option<String>,
    /// Keep the previous key verifying for this many seconds.
    #[serde(default)]
    pub grace_sec: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateGroupRequest {
    pub name: String,
    pub created_by: String,
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub join_key: Option<String>,
    #[serde(default)]
    pub history_visible: Option<bool>,
    #[serde(default)]
    pub max_members: Option<usize>,
    #[serde(default)]
    pub message_ttl_sec: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct JoinGroupRequest {
    pub agent_id: String,
    #[serde(default)]
    pub join_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LeaveGroupRequest {
    pub agent_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GroupMemberRequest {
    pub actor: String,
    pub agent_id: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GroupPostRequest {
    pub from: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: serde_json::Value,
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoundTableRequest {
    pub topic: String,
    #[serde(default)]
    pub goal: Option<String>,
    pub facilitator: String,
    pub participants: Vec<String>,
    #[serde(default)]
    pub expires_in_sec: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SpeakRequest {
    pub from: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub facilitator: String,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub decision: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IssueKeyRequest {
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub single_use: Option<bool>,
    #[serde(default)]
    pub expires_in_sec: Option<i64>,
}
