pub mod memory;
pub mod remote;

use std::sync::Arc;

use crate::config::HubConfig;
use crate::errors::StorageError;
use crate::models::{
    Agent, Group, GroupMember, GroupSettings, InboxStats, IssuedKey, MessageStatus, PublicKeyEntry,
    RoundTable, StoredMessage, ThreadEntry,
};

pub type DynStorage = Arc<dyn Storage>;

/// Partial agent update. Unset fields are left untouched; `clear_webhook`
/// removes the webhook config entirely.
#[derive(Debug, Default, Clone)]
pub struct AgentPatch {
    pub agent_type: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub trusted_agents: Option<Vec<String>>,
    pub set_webhook: Option<(String, String)>,
    pub clear_webhook: bool,
    pub last_heartbeat_ms: Option<i64>,
    pub status: Option<String>,
    pub public_key: Option<String>,
    pub public_keys: Option<Vec<PublicKeyEntry>>,
}

/// Last-write-wins message patch for non-transition fields. Lifecycle
/// transitions go through the dedicated atomic operations below.
#[derive(Debug, Default, Clone)]
pub struct MessagePatch {
    pub status: Option<MessageStatus>,
    pub result: Option<serde_json::Value>,
    pub webhook_delivered: Option<bool>,
}

#[derive(Debug, Default, Clone)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub settings: Option<GroupSettings>,
    pub members: Option<Vec<GroupMember>>,
}

#[derive(Debug, Default, Clone)]
pub struct RoundTablePatch {
    pub status: Option<String>,
    pub thread: Option<Vec<ThreadEntry>>,
    pub outcome: Option<String>,
    pub decision: Option<String>,
    pub clear_group: bool,
    pub expires_at_ms: Option<i64>,
}

#[derive(Debug, Default, Clone)]
pub struct AgentFilter {
    pub status: Option<String>,
    pub agent_type: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct GroupFilter {
    pub include_hidden: bool,
    pub member: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct RoundTableFilter {
    pub status: Option<String>,
    pub participant: Option<String>,
}

/// The persistence contract every backend implements identically. All
/// operations may suspend on I/O. `lease_message`, `ack_message`,
/// `requeue_message`, `extend_lease` and `burn_single_use_key` are the atomic
/// per-record transitions; two concurrent pulls for the same recipient must
/// never both lease the same message.
#[rocket::async_trait]
pub trait Storage: Send + Sync {
    // Agents
    async fn create_agent(&self, agent: Agent) -> Result<Agent, StorageError>;
    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StorageError>;
    async fn get_agent_by_did(&self, did: &str) -> Result<Option<Agent>, StorageError>;
    async fn update_agent(&self, id: &str, patch: AgentPatch)
    -> Result<Option<Agent>, StorageError>;
    /// Deletes the agent and every message in its inbox.
    async fn delete_agent(&self, id: &str) -> Result<bool, StorageError>;
    async fn list_agents(&self, filter: AgentFilter) -> Result<Vec<Agent>, StorageError>;

    // Messages
    async fn create_message(&self, msg: StoredMessage) -> Result<StoredMessage, StorageError>;
    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError>;
    async fn update_message(
        &self,
        id: &str,
        patch: MessagePatch,
    ) -> Result<Option<StoredMessage>, StorageError>;
    async fn delete_message(&self, id: &str) -> Result<bool, StorageError>;
    /// Unordered; the inbox engine sorts by `created_at_ms`.
    async fn get_inbox(
        &self,
        agent_id: &str,
        status: Option<MessageStatus>,
    ) -> Result<Vec<StoredMessage>, StorageError>;
    async fn get_inbox_stats(&self, agent_id: &str) -> Result<InboxStats, StorageError>;

    /// Atomic queued→leased; bumps `attempts`, sets `lease_until_ms`.
    /// Returns None when the message is no longer queued.
    async fn lease_message(
        &self,
        id: &str,
        lease_until_ms: i64,
    ) -> Result<Option<StoredMessage>, StorageError>;
    /// Atomic leased→acked (or leased→purged with the body stripped when the
    /// message is ephemeral). Returns None when the message is not leased.
    async fn ack_message(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<Option<StoredMessage>, StorageError>;
    /// Atomic leased→queued; clears the lease.
    async fn requeue_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError>;
    /// Extends `lease_until_ms` on a leased message.
    async fn extend_lease(
        &self,
        id: &str,
        lease_until_ms: i64,
    ) -> Result<Option<StoredMessage>, StorageError>;

    // Sweeps
    /// Requeues every leased message whose lease has lapsed. Returns the count.
    async fn expire_leases(&self, now_ms: i64) -> Result<u64, StorageError>;
    /// Transitions queued/leased messages past their TTL to `expired`.
    async fn expire_messages(&self, now_ms: i64) -> Result<u64, StorageError>;
    /// Deletes acked/expired records older than the retention window.
    async fn cleanup_terminal_messages(
        &self,
        now_ms: i64,
        retention_ms: i64,
    ) -> Result<u64, StorageError>;
    /// Purges ephemeral messages whose `expires_at_ms` has passed: body
    /// stripped, `purge_reason = ttl_expired`.
    async fn purge_expired_ephemeral(&self, now_ms: i64) -> Result<u64, StorageError>;

    // Groups
    async fn create_group(&self, group: Group) -> Result<Group, StorageError>;
    async fn get_group(&self, id: &str) -> Result<Option<Group>, StorageError>;
    async fn update_group(&self, id: &str, patch: GroupPatch)
    -> Result<Option<Group>, StorageError>;
    async fn delete_group(&self, id: &str) -> Result<bool, StorageError>;
    async fn list_groups(&self, filter: GroupFilter) -> Result<Vec<Group>, StorageError>;
    async fn add_group_member(
        &self,
        id: &str,
        member: GroupMember,
    ) -> Result<Option<Group>, StorageError>;
    async fn remove_group_member(&self, id: &str, agent_id: &str) -> Result<bool, StorageError>;
    async fn get_group_members(&self, id: &str) -> Result<Option<Vec<GroupMember>>, StorageError>;
    async fn is_group_member(&self, id: &str, agent_id: &str) -> Result<bool, StorageError>;
    /// Newest first, deduplicated by `group_message_id`.
    async fn get_group_messages(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError>;

    // Round tables
    async fn create_round_table(&self, rt: RoundTable) -> Result<RoundTable, StorageError>;
    async fn get_round_table(&self, id: &str) -> Result<Option<RoundTable>, StorageError>;
    async fn update_round_table(
        &self,
        id: &str,
        patch: RoundTablePatch,
    ) -> Result<Option<RoundTable>, StorageError>;
    async fn list_round_tables(
        &self,
        filter: RoundTableFilter,
    ) -> Result<Vec<RoundTable>, StorageError>;

    // Issued API keys
    async fn create_issued_key(&self, key: IssuedKey) -> Result<IssuedKey, StorageError>;
    async fn get_issued_key(&self, key_id: &str) -> Result<Option<IssuedKey>, StorageError>;
    /// O(1) lookup through the hash-index collection.
    async fn find_issued_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<IssuedKey>, StorageError>;
    async fn revoke_issued_key(&self, key_id: &str) -> Result<bool, StorageError>;
    /// Atomically sets `used_at_ms` only if currently unset. Returns true for
    /// exactly one caller across any concurrent invocation set.
    async fn burn_single_use_key(&self, key_id: &str) -> Result<bool, StorageError>;
}

/// Dedup fanout copies for history: prefer the envelope field, fall back to
/// the server field, and finally to the message id (migration compatibility).
pub fn group_dedup_key(msg: &StoredMessage) -> String {
    msg.envelope
        .group_message_id
        .clone()
        .or_else(|| msg.group_message_id.clone())
        .unwrap_or_else(|| msg.id.clone())
}

/// Newest first, one entry per `group_message_id`, bounded by `limit`.
pub(crate) fn dedup_group_history(
    mut msgs: Vec<StoredMessage>,
    limit: usize,
) -> Vec<StoredMessage> {
    msgs.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for msg in msgs {
        if seen.insert(group_dedup_key(&msg)) {
            out.push(msg);
            if out.len() >= limit {
                break;
            }
        }
    }
    out
}

pub(crate) fn apply_agent_patch(agent: &mut Agent, patch: AgentPatch) {
    if let Some(agent_type) = patch.agent_type {
        agent.agent_type = Some(agent_type);
    }
    if let Some(metadata) = patch.metadata {
        agent.metadata = metadata;
    }
    if let Some(trusted) = patch.trusted_agents {
        agent.trusted_agents = trusted;
    }
    if let Some((url, secret)) = patch.set_webhook {
        agent.webhook_url = Some(url);
        agent.webhook_secret = Some(secret);
    }
    if patch.clear_webhook {
        agent.webhook_url = None;
        agent.webhook_secret = None;
    }
    if let Some(hb) = patch.last_heartbeat_ms {
        agent.last_heartbeat_ms = Some(hb);
    }
    if let Some(status) = patch.status {
        agent.status = status;
    }
    if let Some(pk) = patch.public_key {
        agent.public_key = pk;
    }
    if let Some(pks) = patch.public_keys {
        agent.public_keys = pks;
    }
    agent.updated_at_ms = crate::models::now_ms();
}

pub(crate) fn apply_message_patch(msg: &mut StoredMessage, patch: MessagePatch) {
    if let Some(status) = patch.status {
        msg.status = status;
    }
    if let Some(result) = patch.result {
        msg.result = Some(result);
    }
    if let Some(delivered) = patch.webhook_delivered {
        msg.webhook_delivered = Some(delivered);
    }
    msg.updated_at_ms = crate::models::now_ms();
}

pub(crate) fn apply_group_patch(group: &mut Group, patch: GroupPatch) {
    if let Some(name) = patch.name {
        group.name = name;
    }
    if let Some(settings) = patch.settings {
        group.settings = settings;
    }
    if let Some(members) = patch.members {
        group.members = members;
    }
    group.updated_at_ms = crate::models::now_ms();
}

pub(crate) fn apply_round_table_patch(rt: &mut RoundTable, patch: RoundTablePatch) {
    if let Some(status) = patch.status {
        rt.status = status;
    }
    if let Some(thread) = patch.thread {
        rt.thread = thread;
    }
    if let Some(outcome) = patch.outcome {
        rt.outcome = Some(outcome);
    }
    if let Some(decision) = patch.decision {
        rt.decision = Some(decision);
    }
    if patch.clear_group {
        rt.group_id = None;
    }
    if let Some(expires) = patch.expires_at_ms {
        rt.expires_at_ms = expires;
    }
}

/// Terminal purge transition: metadata survives, the body does not.
pub(crate) fn purge_in_place(msg: &mut StoredMessage, reason: &str, at_ms: i64) {
    msg.envelope.body = serde_json::Value::Null;
    msg.status = MessageStatus::Purged;
    msg.purge_reason = Some(reason.to_string());
    msg.purged_at_ms = Some(at_ms);
    msg.lease_until_ms = None;
    msg.updated_at_ms = at_ms;
}

/// Build the configured backend. `memory` is the default; `remote` requires
/// the connection parameters to be present.
pub fn build_storage(config: &HubConfig) -> Result<DynStorage, String> {
    match config.storage_backend.as_str() {
        "memory" => Ok(Arc::new(memory::MemoryStorage::new())),
        "remote" => {
            let base_url = config
                .remote_base_url
                .clone()
                .ok_or("REMOTE_BASE_URL is required for the remote backend")?;
            let app_id = config
                .remote_app_id
                .clone()
                .ok_or("REMOTE_APP_ID is required for the remote backend")?;
            Ok(Arc::new(remote::RemoteStorage::new(
                base_url,
                app_id,
                config.remote_api_key.clone(),
            )))
        }
        other => Err(format!("Unknown STORAGE_BACKEND '{other}'")),
    }
}
