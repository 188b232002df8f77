use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

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

const COLL_AGENTS: &str = "agents";
const COLL_MESSAGES: &str = "messages";
const COLL_GROUPS: &str = "groups";
const COLL_ROUND_TABLES: &str = "round_tables";
const COLL_ISSUED_KEYS: &str = "issued_api_keys";
const COLL_KEY_HASHES: &str = "issued_api_key_hashes";

/// Hash-index document: SHA-256(raw key) → key_id, so key verification stays
/// O(1) instead of scanning the key collection.
#[derive(Debug, Serialize, Deserialize)]
struct KeyHashDoc {
    key_id: String,
}

#[derive(Debug, Deserialize)]
struct DocumentList<T> {
    #[serde(default = "Vec::new")]
    documents: Vec<T>,
}

/// Remote document-store backend. The store is an eventually consistent
/// NoSQL service with per-document get/put/delete and equality queries; it
/// has no native conditional writes, so compound transitions here are
/// read-then-conditional-write with a narrower race window than the
/// in-process backend. The single-leader reference deployment makes that
/// acceptable.
pub struct RemoteStorage {
    client: reqwest::Client,
    base_url: String,
    app_id: String,
    api_key: Option<String>,
}

impl RemoteStorage {
    pub fn new(base_url: String, app_id: String, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create remote storage HTTP client");
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            app_id,
            api_key,
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!(
            "{}/api/apps/{}/collections/{}",
            self.base_url, self.app_id, collection
        )
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("X-Api-Key", key),
            None => req,
        }
    }

    async fn get_doc<T: DeserializeOwned>(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<T>, StorageError> {
        let url = format!("{}/document", self.collection_url(collection));
        let resp = self
            .authed(self.client.get(&url).query(&[("id", id)]))
            .send()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(StorageError::Io(format!(
                "GET {collection}/{id}: HTTP {}",
                resp.status()
            )));
        }
        resp.json::<T>()
            .await
            .map(Some)
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn put_doc<T: Serialize>(
        &self,
        collection: &str,
        id: &str,
        doc: &T,
    ) -> Result<(), StorageError> {
        let url = format!("{}/document", self.collection_url(collection));
        let resp = self
            .authed(self.client.put(&url).query(&[("id", id)]).json(doc))
            .send()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StorageError::Io(format!(
                "PUT {collection}/{id}: HTTP {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn delete_doc(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        let url = format!("{}/document", self.collection_url(collection));
        let resp = self
            .authed(self.client.delete(&url).query(&[("id", id)]))
            .send()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(StorageError::Io(format!(
                "DELETE {collection}/{id}: HTTP {}",
                resp.status()
            )));
        }
        Ok(true)
    }

    /// Equality query; `field = None` lists the whole collection.
    async fn query_docs<T: DeserializeOwned>(
        &self,
        collection: &str,
        field: Option<(&str, &str)>,
    ) -> Result<Vec<T>, StorageError> {
        let url = format!("{}/documents", self.collection_url(collection));
        let mut req = self.client.get(&url);
        if let Some((f, v)) = field {
            req = req.query(&[("field", f), ("value", v)]);
        }
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| StorageError::Io(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(StorageError::Io(format!(
                "QUERY {collection}: HTTP {}",
                resp.status()
            )));
        }
        resp.json::<DocumentList<T>>()
            .await
            .map(|l| l.documents)
            .map_err(|e| StorageError::Io(e.to_string()))
    }

    async fn messages_by_status(
        &self,
        status: MessageStatus,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        self.query_docs(COLL_MESSAGES, Some(("status", status.as_str())))
            .await
    }
}

#[rocket::async_trait]
impl Storage for RemoteStorage {
    async fn create_agent(&self, agent: Agent) -> Result<Agent, StorageError> {
        if !ident::is_valid_agent_id(&agent.agent_id) {
            return Err(StorageError::InvalidId(agent.agent_id));
        }
        if self
            .get_doc::<Agent>(COLL_AGENTS, &agent.agent_id)
            .await?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(agent.agent_id));
        }
        self.put_doc(COLL_AGENTS, &agent.agent_id, &agent).await?;
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>, StorageError> {
        self.get_doc(COLL_AGENTS, id).await
    }

    async fn get_agent_by_did(&self, did: &str) -> Result<Option<Agent>, StorageError> {
        let mut matches: Vec<Agent> = self.query_docs(COLL_AGENTS, Some(("did", did))).await?;
        Ok(matches.pop())
    }

    async fn update_agent(
        &self,
        id: &str,
        patch: AgentPatch,
    ) -> Result<Option<Agent>, StorageError> {
        let Some(mut agent) = self.get_doc::<Agent>(COLL_AGENTS, id).await? else {
            return Ok(None);
        };
        apply_agent_patch(&mut agent, patch);
        self.put_doc(COLL_AGENTS, id, &agent).await?;
        Ok(Some(agent))
    }

    async fn delete_agent(&self, id: &str) -> Result<bool, StorageError> {
        let inbox: Vec<StoredMessage> = self
            .query_docs(COLL_MESSAGES, Some(("to_agent_id", id)))
            .await?;
        for msg in inbox {
            self.delete_doc(COLL_MESSAGES, &msg.id).await?;
        }
        self.delete_doc(COLL_AGENTS, id).await
    }

    async fn list_agents(&self, filter: AgentFilter) -> Result<Vec<Agent>, StorageError> {
        let mut agents: Vec<Agent> = self.query_docs(COLL_AGENTS, None).await?;
        agents.retain(|a| filter.status.as_deref().is_none_or(|s| a.status == s));
        agents.retain(|a| {
            filter
                .agent_type
                .as_deref()
                .is_none_or(|t| a.agent_type.as_deref() == Some(t))
        });
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        Ok(agents)
    }

    async fn create_message(&self, msg: StoredMessage) -> Result<StoredMessage, StorageError> {
        if self
            .get_doc::<StoredMessage>(COLL_MESSAGES, &msg.id)
            .await?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(msg.id));
        }
        self.put_doc(COLL_MESSAGES, &msg.id, &msg).await?;
        Ok(msg)
    }

    async fn get_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError> {
        self.get_doc(COLL_MESSAGES, id).await
    }

    async fn update_message(
        &self,
        id: &str,
        patch: MessagePatch,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let Some(mut msg) = self.get_doc::<StoredMessage>(COLL_MESSAGES, id).await? else {
            return Ok(None);
        };
        apply_message_patch(&mut msg, patch);
        self.put_doc(COLL_MESSAGES, id, &msg).await?;
        Ok(Some(msg))
    }

    async fn delete_message(&self, id: &str) -> Result<bool, StorageError> {
        self.delete_doc(COLL_MESSAGES, id).await
    }

    async fn get_inbox(
        &self,
        agent_id: &str,
        status: Option<MessageStatus>,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let mut inbox: Vec<StoredMessage> = self
            .query_docs(COLL_MESSAGES, Some(("to_agent_id", agent_id)))
            .await?;
        if let Some(status) = status {
            inbox.retain(|m| m.status == status);
        }
        Ok(inbox)
    }

    async fn get_inbox_stats(&self, agent_id: &str) -> Result<InboxStats, StorageError> {
        let inbox = self.get_inbox(agent_id, None).await?;
        let mut stats = InboxStats::default();
        for m in &inbox {
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

    // Read-then-conditional-write: the status check and the PUT are not one
    // atomic step against the remote store.
    async fn lease_message(
        &self,
        id: &str,
        lease_until_ms: i64,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let Some(mut msg) = self.get_doc::<StoredMessage>(COLL_MESSAGES, id).await? else {
            return Ok(None);
        };
        if msg.status != MessageStatus::Queued {
            return Ok(None);
        }
        msg.status = MessageStatus::Leased;
        msg.lease_until_ms = Some(lease_until_ms);
        msg.attempts += 1;
        msg.updated_at_ms = now_ms();
        self.put_doc(COLL_MESSAGES, id, &msg).await?;
        Ok(Some(msg))
    }

    async fn ack_message(
        &self,
        id: &str,
        result: Option<serde_json::Value>,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let Some(mut msg) = self.get_doc::<StoredMessage>(COLL_MESSAGES, id).await? else {
            return Ok(None);
        };
        if msg.status != MessageStatus::Leased {
            return Ok(None);
        }
        let at = now_ms();
        msg.acked_at_ms = Some(at);
        msg.result = result;
        msg.lease_until_ms = None;
        if msg.ephemeral {
            purge_in_place(&mut msg, crate::models::PURGE_REASON_ACKED, at);
        } else {
            msg.status = MessageStatus::Acked;
            msg.updated_at_ms = at;
        }
        self.put_doc(COLL_MESSAGES, id, &msg).await?;
        Ok(Some(msg))
    }

    async fn requeue_message(&self, id: &str) -> Result<Option<StoredMessage>, StorageError> {
        let Some(mut msg) = self.get_doc::<StoredMessage>(COLL_MESSAGES, id).await? else {
            return Ok(None);
        };
        if msg.status != MessageStatus::Leased {
            return Ok(None);
        }
        msg.status = MessageStatus::Queued;
        msg.lease_until_ms = None;
        msg.updated_at_ms = now_ms();
        self.put_doc(COLL_MESSAGES, id, &msg).await?;
        Ok(Some(msg))
    }

    async fn extend_lease(
        &self,
        id: &str,
        lease_until_ms: i64,
    ) -> Result<Option<StoredMessage>, StorageError> {
        let Some(mut msg) = self.get_doc::<StoredMessage>(COLL_MESSAGES, id).await? else {
            return Ok(None);
        };
        if msg.status != MessageStatus::Leased {
            return Ok(None);
        }
        msg.lease_until_ms = Some(lease_until_ms);
        msg.updated_at_ms = now_ms();
        self.put_doc(COLL_MESSAGES, id, &msg).await?;
        Ok(Some(msg))
    }

    async fn expire_leases(&self, now_ms_: i64) -> Result<u64, StorageError> {
        let leased = self.messages_by_status(MessageStatus::Leased).await?;
        let mut count = 0;
        for mut msg in leased {
            if msg.lease_until_ms.is_some_and(|t| t < now_ms_) {
                msg.status = MessageStatus::Queued;
                msg.lease_until_ms = None;
                msg.updated_at_ms = now_ms_;
                self.put_doc(COLL_MESSAGES, &msg.id, &msg).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn expire_messages(&self, now_ms_: i64) -> Result<u64, StorageError> {
        let mut candidates = self.messages_by_status(MessageStatus::Queued).await?;
        candidates.extend(self.messages_by_status(MessageStatus::Leased).await?);
        let mut count = 0;
        for mut msg in candidates {
            if now_ms_ - msg.created_at_ms > msg.ttl_sec * 1000 {
                msg.status = MessageStatus::Expired;
                msg.lease_until_ms = None;
                msg.updated_at_ms = now_ms_;
                self.put_doc(COLL_MESSAGES, &msg.id, &msg).await?;
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
        let mut terminal = self.messages_by_status(MessageStatus::Acked).await?;
        terminal.extend(self.messages_by_status(MessageStatus::Expired).await?);
        let mut count = 0;
        for msg in terminal {
            if now_ms_ - msg.updated_at_ms > retention_ms && self.delete_doc(COLL_MESSAGES, &msg.id).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_expired_ephemeral(&self, now_ms_: i64) -> Result<u64, StorageError> {
        // Ephemeral purge cannot be served by a status query alone; scan the
        // non-purged statuses that can still hold a body.
        let mut candidates = self.messages_by_status(MessageStatus::Queued).await?;
        candidates.extend(self.messages_by_status(MessageStatus::Leased).await?);
        candidates.extend(self.messages_by_status(MessageStatus::Acked).await?);
        candidates.extend(self.messages_by_status(MessageStatus::Expired).await?);
        candidates.extend(self.messages_by_status(MessageStatus::Failed).await?);
        let mut count = 0;
        for mut msg in candidates {
            if msg.expires_at_ms.is_some_and(|t| t < now_ms_) {
                purge_in_place(&mut msg, PURGE_REASON_TTL, now_ms_);
                self.put_doc(COLL_MESSAGES, &msg.id, &msg).await?;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn create_group(&self, group: Group) -> Result<Group, StorageError> {
        if self
            .get_doc::<Group>(COLL_GROUPS, &group.group_id)
            .await?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(group.group_id));
        }
        self.put_doc(COLL_GROUPS, &group.group_id, &group).await?;
        Ok(group)
    }

    async fn get_group(&self, id: &str) -> Result<Option<Group>, StorageError> {
        self.get_doc(COLL_GROUPS, id).await
    }

    async fn update_group(
        &self,
        id: &str,
        patch: GroupPatch,
    ) -> Result<Option<Group>, StorageError> {
        let Some(mut group) = self.get_doc::<Group>(COLL_GROUPS, id).await? else {
            return Ok(None);
        };
        apply_group_patch(&mut group, patch);
        self.put_doc(COLL_GROUPS, id, &group).await?;
        Ok(Some(group))
    }

    async fn delete_group(&self, id: &str) -> Result<bool, StorageError> {
        self.delete_doc(COLL_GROUPS, id).await
    }

    async fn list_groups(&self, filter: GroupFilter) -> Result<Vec<Group>, StorageError> {
        let mut groups: Vec<Group> = self.query_docs(COLL_GROUPS, None).await?;
        groups.retain(|g| filter.include_hidden || !g.hidden);
        groups.retain(|g| {
            filter
                .member
                .as_deref()
                .is_none_or(|m| g.member(m).is_some())
        });
        groups.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        Ok(groups)
    }

    async fn add_group_member(
        &self,
        id: &str,
        member: GroupMember,
    ) -> Result<Option<Group>, StorageError> {
        let Some(mut group) = self.get_doc::<Group>(COLL_GROUPS, id).await? else {
            return Ok(None);
        };
        if group.member(&member.agent_id).is_some() {
            return Err(StorageError::AlreadyExists(member.agent_id));
        }
        group.members.push(member);
        group.updated_at_ms = now_ms();
        self.put_doc(COLL_GROUPS, id, &group).await?;
        Ok(Some(group))
    }

    async fn remove_group_member(&self, id: &str, agent_id: &str) -> Result<bool, StorageError> {
        let Some(mut group) = self.get_doc::<Group>(COLL_GROUPS, id).await? else {
            return Ok(false);
        };
        let before = group.members.len();
        group.members.retain(|m| m.agent_id != agent_id);
        if group.members.len() == before {
            return Ok(false);
        }
        group.updated_at_ms = now_ms();
        self.put_doc(COLL_GROUPS, id, &group).await?;
        Ok(true)
    }

    async fn get_group_members(&self, id: &str) -> Result<Option<Vec<GroupMember>>, StorageError> {
        Ok(self
            .get_doc::<Group>(COLL_GROUPS, id)
            .await?
            .map(|g| g.members))
    }

    async fn is_group_member(&self, id: &str, agent_id: &str) -> Result<bool, StorageError> {
        Ok(self
            .get_doc::<Group>(COLL_GROUPS, id)
            .await?
            .is_some_and(|g| g.member(agent_id).is_some()))
    }

    async fn get_group_messages(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StorageError> {
        let msgs: Vec<StoredMessage> = self
            .query_docs(COLL_MESSAGES, Some(("group_id", id)))
            .await?;
        Ok(dedup_group_history(msgs, limit))
    }

    async fn create_round_table(&self, rt: RoundTable) -> Result<RoundTable, StorageError> {
        if self
            .get_doc::<RoundTable>(COLL_ROUND_TABLES, &rt.rt_id)
            .await?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(rt.rt_id));
        }
        self.put_doc(COLL_ROUND_TABLES, &rt.rt_id, &rt).await?;
        Ok(rt)
    }

    async fn get_round_table(&self, id: &str) -> Result<Option<RoundTable>, StorageError> {
        self.get_doc(COLL_ROUND_TABLES, id).await
    }

    async fn update_round_table(
        &self,
        id: &str,
        patch: RoundTablePatch,
    ) -> Result<Option<RoundTable>, StorageError> {
        let Some(mut rt) = self.get_doc::<RoundTable>(COLL_ROUND_TABLES, id).await? else {
            return Ok(None);
        };
        apply_round_table_patch(&mut rt, patch);
        self.put_doc(COLL_ROUND_TABLES, id, &rt).await?;
        Ok(Some(rt))
    }

    async fn list_round_tables(
        &self,
        filter: RoundTableFilter,
    ) -> Result<Vec<RoundTable>, StorageError> {
        let mut rts: Vec<RoundTable> = self.query_docs(COLL_ROUND_TABLES, None).await?;
        rts.retain(|rt| filter.status.as_deref().is_none_or(|s| rt.status == s));
        rts.retain(|rt| {
            filter
                .participant
                .as_deref()
                .is_none_or(|p| rt.facilitator == p || rt.participants.iter().any(|x| x == p))
        });
        rts.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        Ok(rts)
    }

    async fn create_issued_key(&self, key: IssuedKey) -> Result<IssuedKey, StorageError> {
        if self
            .get_doc::<IssuedKey>(COLL_ISSUED_KEYS, &key.key_id)
            .await?
            .is_some()
        {
            return Err(StorageError::AlreadyExists(key.key_id));
        }
        self.put_doc(
            COLL_KEY_HASHES,
            &key.key_hash,
            &KeyHashDoc {
                key_id: key.key_id.clone(),
            },
        )
        .await?;
        self.put_doc(COLL_ISSUED_KEYS, &key.key_id, &key).await?;
        Ok(key)
    }

    async fn get_issued_key(&self, key_id: &str) -> Result<Option<IssuedKey>, StorageError> {
        self.get_doc(COLL_ISSUED_KEYS, key_id).await
    }

    async fn find_issued_key_by_hash(
        &self,
        key_hash: &str,
    ) -> Result<Option<IssuedKey>, StorageError> {
        let Some(index) = self.get_doc::<KeyHashDoc>(COLL_KEY_HASHES, key_hash).await? else {
            return Ok(None);
        };
        self.get_doc(COLL_ISSUED_KEYS, &index.key_id).await
    }

    async fn revoke_issued_key(&self, key_id: &str) -> Result<bool, StorageError> {
        let Some(mut key) = self.get_doc::<IssuedKey>(COLL_ISSUED_KEYS, key_id).await? else {
            return Ok(false);
        };
        key.revoked = true;
        self.put_doc(COLL_ISSUED_KEYS, key_id, &key).await?;
        Ok(true)
    }

    // Burn is the read-then-conditional-write approximation: the window
    // between the read and the write is the race the in-process backend does
    // not have.
    async fn burn_single_use_key(&self, key_id: &str) -> Result<bool, StorageError> {
        let Some(mut key) = self.get_doc::<IssuedKey>(COLL_ISSUED_KEYS, key_id).await? else {
            return Ok(false);
        };
        if key.used_at_ms.is_some() {
            return Ok(false);
        }
        key.used_at_ms = Some(now_ms());
        self.put_doc(COLL_ISSUED_KEYS, key_id, &key).await?;
        Ok(true)
    }
}
