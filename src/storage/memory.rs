use std::collections::HashMap;

use tokio::sync::RwLock;

use super::{
    AgentFilter, AgentPatch, GroupFilter, GroupPatch, MessagePatch, RoundTableFilter,
    RoundTablePatch, Storage, apply_agent_patch, apply_group_patch, apply_message_patch,
    apply_round_table_patch, dedup_group_history, purge_in_place,
};
use crate::errors::StorageError;
use crate::ident;
use crate::models::{
    Agent, Group, GroupMember, InboxStats, IssuedKey, MessageStatus, PURGE_REASON_TTL, RoundTable,
    StoredMessage, now_ms,
};

/// In-process backend: one map per collection, each behind its own lock.
/// Fast and non-durable; the reference backend for tests and single-node dev.
/// Compound transitions hold the collection's write lock for their whole
/// read-check-write, which is what makes them atomic to concurrent callers.
pub struct MemoryStorage {
    agents: RwLock<HashMap<String, Agent>>,
    messages: RwLock<HashMap<String, StoredMessage>>,
    groups: RwLock<HashMap<String, Group>>,
    round_tables: RwLock<HashMap<String, RoundTable>>,
    issued_keys: RwLock<HashMap<String, IssuedKey>>,
    /// SHA-256(raw key) → key_id, mirroring the remote backend's index
    /// collection.
    key_hashes: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
            groups: RwLock::new(HashMap::new()),
            round_tables: RwLock::new(HashMap::new()),
            issued_keys: RwLock::new(HashMap::new()),
            key_hashes: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[rocket::async_trait]
impl Storage for MemoryStorage {
    async fn create_agent(&self, agent: Agent) -> Result<Agent, StorageError> {
        if !ident::is_valid_agent_id(&agent.agent_id) {
            return Err(StorageError::InvalidId(agent.agent_id));
        }
        let mut agents = self.agents.write().await;
        if agents.contains_key(&agent.agent_id) {
            return Err(StorageError::AlreadyExists(agent.agent_id));
        }
        agents.insert(agent.agent_id.clone(), agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StorageError> {
        Ok(self.agents.read().await.get(id).cloned())
    }

    async fn get_agent_by_did(&self, did: &str) -> Result<Option<Agent>, StorageError> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .find(|a| a.did.as_deref() == Some(did))
            .cloned())
    }

    async fn update_agent(
        &self,
        id: &str,
        patch: AgentPatch,
    ) -> Result<Option<Agent>, StorageError> {
        let mut agents = self.agents.write().await;
        match agents.get_mut(id) {
            Some(agent) => {
                apply_agent_patch(agent, patch);
                Ok(Some(agent.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_agent(&self, id: &str) -> Result<bool, StorageError> {
        let removed = self.agents.write().await.remove(id).is_some();
        if removed {
            self.messages
                .write()
                .await
                .retain(|_, m| m.to_agent_id != id);
        }
        Ok(removed)
    }

    async fn list_agents(&self, filter: AgentFilter) -> Result<Vec<Agent>, StorageError> {
        let agents = self.agents.read().await;
        let mut out: Vec<Agent> = agents
            .values()
            .filter(|a| filter.status.as_deref().is_none_or(|s| a.status == s))
            .filter(|a| {
                filter
                    .agent_type
                    .as_deref()
                    .is_none_or(|t| a.agent_type.as_deref() == Some(t))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(out)
    }

    async fn create_message(&self, msg: StoredMessage) -> Result<StoredMessage, StorageError> {
        let mut messages = self.messages.write().await;
        if messages.contains_key(&msg.id) {
            return Err(StorageError::AlreadyExists(msg.id));
        }
        messages.insert(msg.id.clone(), msg.clone());
        Ok(msg)
    }

    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError> {
        Ok(self.messages.read().await.get(id).cloned())
    }

    async fn update_message(
        &self,
        id: &str,
        patch: MessagePatch,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(id) {
            Some(msg) => {
                apply_message_patch(msg, patch);
                Ok(Some(msg.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_message(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.messages.write().await.remove(id).is_some())
    }

    async fn get_inbox(
        &self,
        agent_id: &str,
        status: Option<MessageStatus>,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        Ok(self
            .messages
            .read()
            .await
            .values()
            .filter(|m| m.to_agent_id == agent_id)
            .filter(|m| status.is_none_or(|s| m.status == s))
            .cloned()
            .collect())
    }

    async fn get_inbox_stats(&self, agent_id: &str) -> Result<InboxStats, StorageError> {
        let messages = self.messages.read().await;
        let mut stats = InboxStats::default();
        for m in messages.values().filter(|m| m.to_agent_id == agent_id) {
            stats.total += 1;
            match m.status {
                MessageStatus::Queued => stats.queued += 1,
                MessageStatus::Leased => stats.leased += 1,
                MessageStatus::Acked => stats.acked += 1,
                MessageStatus::Expired => stats.expired += 1,
                MessageStatus::Purged => stats.purged += 1,
                MessageStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn lease_message(
        &self,
        id: &str,
        lease_until_ms: i64,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(id) {
            Some(msg) if msg.status == MessageStatus::Queued => {
                msg.status = MessageStatus::Leased;
                msg.lease_until_ms = Some(lease_until_ms);
                msg.attempts += 1;
                msg.updated_at_ms = now_ms();
                Ok(Some(msg.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn ack_message(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(id) {
            Some(msg) if msg.status == MessageStatus::Leased => {
                let at = now_ms();
                msg.acked_at_ms = Some(at);
                msg.result = result;
                msg.lease_until_ms = None;
                if msg.ephemeral {
                    purge_in_place(msg, crate::models::PURGE_REASON_ACKED, at);
                } else {
                    msg.status = MessageStatus::Acked;
                    msg.updated_at_ms = at;
                }
                Ok(Some(msg.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn requeue_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(id) {
            Some(msg) if msg.status == MessageStatus::Leased => {
                msg.status = MessageStatus::Queued;
                msg.lease_until_ms = None;
                msg.updated_at_ms = now_ms();
                Ok(Some(msg.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn extend_lease(
        &self,
        id: &str,
        lease_until_ms: i64,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let mut messages = self.messages.write().await;
        match messages.get_mut(id) {
            Some(msg) if msg.status == MessageStatus::Leased => {
                msg.lease_until_ms = Some(lease_until_ms);
                msg.updated_at_ms = now_ms();
                Ok(Some(msg.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expire_leases(&self, now_ms_: i64) -> Result<u64, StorageError> {
        let mut messages = self.messages.write().await;
        let mut count = 0;
        for msg in messages.values_mut() {
            if msg.status == MessageStatus::Leased
                && msg.lease_until_ms.is_some_and(|t| t < now_ms_)
            {
                msg.status = MessageStatus::Queued;
                msg.lease_until_ms = None;
                msg.updated_at_ms = now_ms_;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn expire_messages(&self, now_ms_: i64) -> Result<u64, StorageError> {
        let mut messages = self.messages.write().await;
        let mut count = 0;
        for msg in messages.values_mut() {
            if matches!(msg.status, MessageStatus::Queued | MessageStatus::Leased)
                && now_ms_ - msg.created_at_ms > msg.ttl_sec * 1000
            {
                msg.status = MessageStatus::Expired;
                msg.lease_until_ms = None;
                msg.updated_at_ms = now_ms_;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup_terminal_messages(
        &self,
        now_ms_: i64,
        retention_ms: i64,
    ) -> Result<u64, StorageError> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|_, m| {
            !(matches!(m.status, MessageStatus::Acked | MessageStatus::Expired)
                && now_ms_ - m.updated_at_ms > retention_ms)
        });
        Ok((before - messages.len()) as u64)
    }

    async fn purge_expired_ephemeral(&self, now_ms_: i64) -> Result<u64, StorageError> {
        let mut messages = self.messages.write().await;
        let mut count = 0;
        for msg in messages.values_mut() {
            if msg.status != MessageStatus::Purged
                && msg.expires_at_ms.is_some_and(|t| t < now_ms_)
            {
                purge_in_place(msg, PURGE_REASON_TTL, now_ms_);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn create_group(&self, group: Group) -> Result<Group, StorageError> {
        let mut groups = self.groups.write().await;
        if groups.contains_key(&group.group_id) {
            return Err(StorageError::AlreadyExists(group.group_id));
        }
        groups.insert(group.group_id.clone(), group.clone());
        Ok(group)
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StorageError> {
        Ok(self.groups.read().await.get(id).cloned())
    }

    async fn update_group(
        &self,
        id: &str,
        patch: GroupPatch,
    ) -> Result<Option<Group>, StorageError> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(id) {
            Some(group) => {
                apply_group_patch(group, patch);
                Ok(Some(group.clone()))
            }
            None => Ok(None),
        }
    }

    async fn delete_group(&self, id: &str) -> Result<bool, StorageError> {
        Ok(self.groups.write().await.remove(id).is_some())
    }

    async fn list_groups(&self, filter: GroupFilter) -> Result<Vec<Group>, StorageError> {
        let groups = self.groups.read().await;
        let mut out: Vec<Group> = groups
            .values()
            .filter(|g| filter.include_hidden || !g.hidden)
            .filter(|g| {
                filter
                    .member
                    .as_deref()
                    .is_none_or(|m| g.member(m).is_some())
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        Ok(out)
    }

    async fn add_group_member(
        &self,
        id: &str,
        member: GroupMember,
    ) -> Result<Option<Group>, StorageError> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(id) {
            Some(group) => {
                if group.member(&member.agent_id).is_some() {
                    return Err(StorageError::AlreadyExists(member.agent_id));
                }
                group.members.push(member);
                group.updated_at_ms = now_ms();
                Ok(Some(group.clone()))
            }
            None => Ok(None),
        }
    }

    async fn remove_group_member(&self, id: &str, agent_id: &str) -> Result<bool, StorageError> {
        let mut groups = self.groups.write().await;
        match groups.get_mut(id) {
            Some(group) => {
                let before = group.members.len();
                group.members.retain(|m| m.agent_id != agent_id);
                let removed = group.members.len() < before;
                if removed {
                    group.updated_at_ms = now_ms();
                }
                Ok(removed)
            }
            None => Ok(false),
        }
    }

    async fn get_group_members(&self, id: &str) -> Result<Option<Vec<GroupMember>>, StorageError> {
        Ok(self.groups.read().await.get(id).map(|g| g.members.clone()))
    }

    async fn is_group_member(&self, id: &str, agent_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .groups
            .read()
            .await
            .get(id)
            .is_some_and(|g| g.member(agent_id).is_some()))
    }

    async fn get_group_messages(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let messages = self.messages.read().await;
        let group_msgs: Vec<StoredMessage> = messages
            .values()
            .filter(|m| m.group_id.as_deref() == Some(id))
            .cloned()
            .collect();
        Ok(dedup_group_history(group_msgs, limit))
    }

    async fn create_round_table(&self, rt: RoundTable) -> Result<RoundTable, StorageError> {
        let mut round_tables = self.round_tables.write().await;
        if round_tables.contains_key(&rt.rt_id) {
            return Err(StorageError::AlreadyExists(rt.rt_id));
        }
        round_tables.insert(rt.rt_id.clone(), rt.clone());
        Ok(rt)
    }

    async fn get_round_table(&self, id: &str) -> Result<Option<RoundTable>, StorageError> {
        Ok(self.round_tables.read().await.get(id).cloned())
    }

    async fn update_round_table(
        &self,
        id: &str,
        patch: RoundTablePatch,
    ) -> Result<Option<RoundTable>, StorageError> {
        let mut round_tables = self.round_tables.write().await;
        match round_tables.get_mut(id) {
            Some(rt) => {
                apply_round_table_patch(rt, patch);
                Ok(Some(rt.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_round_tables(
        &self,
        filter: RoundTableFilter,
    ) -> Result<Vec<RoundTable>, StorageError> {
        let round_tables = self.round_tables.read().await;
        let mut out: Vec<RoundTable> = round_tables
            .values()
            .filter(|rt| filter.status.as_deref().is_none_or(|s| rt.status == s))
            .filter(|rt| {
                filter
                    .participant
                    .as_deref()
                    .is_none_or(|p| rt.facilitator == p || rt.participants.iter().any(|x| x == p))
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        Ok(out)
    }

    async fn create_issued_key(&self, key: IssuedKey) -> Result<IssuedKey, StorageError> {
        let mut issued = self.issued_keys.write().await;
        if issued.contains_key(&key.key_id) {
            return Err(StorageError::AlreadyExists(key.key_id));
        }
        self.key_hashes
            .write()
            .await
            .insert(key.key_hash.clone(), key.key_id.clone());
        issued.insert(key.key_id.clone(), key.clone());
        Ok(key)
    }

    async fn get_issued_key(&self, key_id: &str) -> Result<Option<IssuedKey>, StorageError> {
        Ok(self.issued_keys.read().await.get(key_id).cloned())
    }

    async fn find_issued_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<IssuedKey>, StorageError> {
        let key_id = match self.key_hashes.read().await.get(key_hash) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.issued_keys.read().await.get(&key_id).cloned())
    }

    async fn revoke_issued_key(&self, key_id: &str) -> Result<bool, StorageError> {
        let mut issued = self.issued_keys.write().await;
        match issued.get_mut(key_id) {
            Some(key) => {
                key.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn burn_single_use_key(&self, key_id: &str) -> Result<bool, StorageError> {
        let mut issued = self.issued_keys.write().await;
        match issued.get_mut(key_id) {
            Some(key) if key.used_at_ms.is_none() => {
                key.used_at_ms = Some(now_ms());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
