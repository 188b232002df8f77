use crate::config::HubConfig;
use crate::errors::ApiError;
use crate::events::{EventBus, HubEvent};
use crate::groups::GroupService;
use crate::ident;
use crate::models::{
    CreateRoundTableRequest, ENVELOPE_VERSION, Envelope, GroupPostRequest,
    MAX_ROUND_TABLE_PARTICIPANTS, MAX_THREAD_ENTRIES, MessageStatus, RT_DEFAULT_EXPIRY_SEC,
    RT_MAX_EXPIRY_SEC, RT_MIN_EXPIRY_SEC, RT_STATUS_EXPIRED, RT_STATUS_OPEN, RT_STATUS_RESOLVED,
    ResolveRequest, RoundTable, SpeakRequest, StoredMessage, ThreadEntry, now_ms,
};
use crate::storage::{DynStorage, RoundTableFilter, RoundTablePatch};

/// Ephemeral N-way deliberation sessions, layered on a hidden invite-only
/// group. The facilitator opens and resolves; the sweeper expires.
#[derive(Clone)]
pub struct RoundTableService {
    storage: DynStorage,
    events: EventBus,
    groups: GroupService,
    config: HubConfig,
}

impl RoundTableService {
    pub fn new(
        storage: DynStorage,
        events: EventBus,
        groups: GroupService,
        config: HubConfig,
    ) -> Self {
        Self {
            storage,
            events,
            groups,
            config,
        }
    }

    /// Open a session: create the backing group and drop a `work_order`
    /// invitation into every participant's inbox.
    pub async fn create(&self, req: CreateRoundTableRequest) -> Result<RoundTable, ApiError> {
        let topic = req.topic.trim().to_string();
        if topic.is_empty() {
            return Err(ApiError::MissingField("topic is required".to_string()));
        }
        if self.storage.get_agent(&req.facilitator).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Agent '{}' not found",
                req.facilitator
            )));
        }

        let mut participants: Vec<String> = Vec::new();
        for p in &req.participants {
            if !participants.contains(p) && *p != req.facilitator {
                participants.push(p.clone());
            }
        }
        if participants.is_empty() {
            return Err(ApiError::Validation(
                "At least one participant besides the facilitator is required".to_string(),
            ));
        }
        if participants.len() > MAX_ROUND_TABLE_PARTICIPANTS {
            return Err(ApiError::Validation(format!(
                "At most {MAX_ROUND_TABLE_PARTICIPANTS} participants are allowed"
            )));
        }
        for p in &participants {
            if self.storage.get_agent(p).await?.is_none() {
                return Err(ApiError::NotFound(format!("Agent '{p}' not found")));
            }
        }

        let expiry_sec = req.expires_in_sec.unwrap_or(RT_DEFAULT_EXPIRY_SEC);
        if !(RT_MIN_EXPIRY_SEC..=RT_MAX_EXPIRY_SEC).contains(&expiry_sec) {
            return Err(ApiError::Validation(format!(
                "expires_in_sec must be between {RT_MIN_EXPIRY_SEC} and {RT_MAX_EXPIRY_SEC}"
            )));
        }

        let group = self
            .groups
            .create_hidden(
                &format!("rt {}", ident::slugify(&topic)),
                &req.facilitator,
                &participants,
            )
            .await?;

        let now = now_ms();
        let rt = RoundTable {
            rt_id: ident::generate_round_table_id(),
            topic: topic.clone(),
            goal: req.goal.clone(),
            facilitator: req.facilitator.clone(),
            participants: participants.clone(),
            group_id: Some(group.group_id.clone()),
            status: RT_STATUS_OPEN.to_string(),
            thread: Vec::new(),
            outcome: None,
            decision: None,
            created_at_ms: now,
            expires_at_ms: now + expiry_sec * 1000,
        };
        let created = self.storage.create_round_table(rt).await?;

        for participant in &participants {
            let body = serde_json::json!({
                "round_table_id": created.rt_id,
                "topic": topic,
                "goal": req.goal,
                "group_id": group.group_id,
                "expires_at_ms": created.expires_at_ms,
            });
            if let Err(e) = self
                .enqueue_server_message(
                    &req.facilitator,
                    participant,
                    "work_order",
                    &format!("Round table: {topic}"),
                    body,
                )
                .await
            {
                eprintln!(
                    "⚠️ Round table {}: invitation to '{participant}' failed: {}",
                    created.rt_id,
                    e.code()
                );
            }
        }

        Ok(created)
    }

    /// Facilitator or participant only.
    pub async fn get(&self, rt_id: &str, caller: &str) -> Result<RoundTable, ApiError> {
        let rt = self.fetch(rt_id).await?;
        if rt.facilitator != caller && !rt.participants.iter().any(|p| p == caller) {
            return Err(ApiError::Forbidden(
                "Only the facilitator or a participant can view this session".to_string(),
            ));
        }
        Ok(rt)
    }

    /// Append to the thread (bounded) and multicast through the backing
    /// group.
    pub async fn speak(&self, rt_id: &str, req: SpeakRequest) -> Result<RoundTable, ApiError> {
        let rt = self.fetch(rt_id).await?;
        if rt.status != RT_STATUS_OPEN {
            return Err(ApiError::Conflict(format!(
                "Round table '{rt_id}' is {}",
                rt.status
            )));
        }
        if rt.facilitator != req.from && !rt.participants.iter().any(|p| p == &req.from) {
            return Err(ApiError::Forbidden(
                "Only the facilitator or a participant can speak".to_string(),
            ));
        }
        if rt.thread.len() >= MAX_THREAD_ENTRIES {
            return Err(ApiError::Conflict(format!(
                "Thread is full ({MAX_THREAD_ENTRIES} entries)"
            )));
        }

        let mut thread = rt.thread.clone();
        thread.push(ThreadEntry {
            id: uuid::Uuid::new_v4().to_string(),
            from: req.from.clone(),
            message: req.message.clone(),
            ts: now_ms(),
        });
        let updated = self
            .storage
            .update_round_table(
                rt_id,
                RoundTablePatch {
                    thread: Some(thread),
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Round table '{rt_id}' not found")))?;

        if let Some(group_id) = &rt.group_id {
            let post = GroupPostRequest {
                from: req.from,
                subject: format!("Round table: {}", rt.topic),
                body: serde_json::json!({
                    "round_table_id": rt.rt_id,
                    "message": req.message,
                }),
                message_type: Some("round_table.message".to_string()),
            };
            if let Err(e) = self.groups.post(group_id, post).await {
                eprintln!("⚠️ Round table {rt_id}: multicast failed: {}", e.code());
            }
        }

        Ok(updated)
    }

    /// Facilitator records the outcome; the backing group is deleted in the
    /// same operation.
    pub async fn resolve(&self, rt_id: &str, req: ResolveRequest) -> Result<RoundTable, ApiError> {
        let rt = self.fetch(rt_id).await?;
        if rt.facilitator != req.facilitator {
            return Err(ApiError::Forbidden(
                "Only the facilitator can resolve the session".to_string(),
            ));
        }
        if rt.status != RT_STATUS_OPEN {
            return Err(ApiError::Conflict(format!(
                "Round table '{rt_id}' is already {}",
                rt.status
            )));
        }

        if let Some(group_id) = &rt.group_id {
            let post = GroupPostRequest {
                from: req.facilitator.clone(),
                subject: format!("Resolved: {}", rt.topic),
                body: serde_json::json!({
                    "round_table_id": rt.rt_id,
                    "outcome": req.outcome,
                    "decision": req.decision,
                }),
                message_type: Some("round_table.resolved".to_string()),
            };
            if let Err(e) = self.groups.post(group_id, post).await {
                eprintln!("⚠️ Round table {rt_id}: resolution multicast failed: {}", e.code());
            }
        }

        let updated = self
            .storage
            .update_round_table(
                rt_id,
                RoundTablePatch {
                    status: Some(RT_STATUS_RESOLVED.to_string()),
                    outcome: req.outcome,
                    decision: req.decision,
                    clear_group: true,
                    ..Default::default()
                },
            )
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Round table '{rt_id}' not found")))?;

        if let Some(group_id) = &rt.group_id {
            self.storage.delete_group(group_id).await?;
        }
        Ok(updated)
    }

    pub async fn list(&self, filter: RoundTableFilter) -> Result<Vec<RoundTable>, ApiError> {
        Ok(self.storage.list_round_tables(filter).await?)
    }

    /// Sweeper hook: expire open sessions past their deadline and clean up
    /// their backing groups. Returns the count expired.
    pub async fn expire_past_due(&self, now_ms_: i64) -> Result<u64, ApiError> {
        let open = self
            .storage
            .list_round_tables(RoundTableFilter {
                status: Some(RT_STATUS_OPEN.to_string()),
                ..Default::default()
            })
            .await?;
        let mut count = 0;
        for rt in open {
            if rt.expires_at_ms < now_ms_ {
                self.storage
                    .update_round_table(
                        &rt.rt_id,
                        RoundTablePatch {
                            status: Some(RT_STATUS_EXPIRED.to_string()),
                            clear_group: true,
                            ..Default::default()
                        },
                    )
                    .await?;
                if let Some(group_id) = &rt.group_id {
                    self.storage.delete_group(group_id).await?;
                }
                count += 1;
            }
        }
        Ok(count)
    }

    async fn fetch(&self, rt_id: &str) -> Result<RoundTable, ApiError> {
        self.storage
            .get_round_table(rt_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Round table '{rt_id}' not found")))
    }

    /// Server-materialized envelope straight into an inbox (invitations).
    async fn enqueue_server_message(
        &self,
        from: &str,
        to: &str,
        message_type: &str,
        subject: &str,
        body: serde_json::Value,
    ) -> Result<(), ApiError> {
        let now = now_ms();
        let envelope = Envelope {
            version: ENVELOPE_VERSION.to_string(),
            id: None,
            message_type: message_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body,
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: None,
            ttl_sec: None,
            ephemeral: None,
            ephemeral_ttl_sec: None,
            group_message_id: None,
            signature: None,
        };
        let message = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            from_agent_id: from.to_string(),
            to_agent_id: to.to_string(),
            envelope,
            status: MessageStatus::Queued,
            lease_until_ms: None,
            attempts: 0,
            ttl_sec: self.config.message_ttl_sec,
            ephemeral: false,
            ephemeral_ttl_sec: None,
            expires_at_ms: None,
            created_at_ms: now,
            updated_at_ms: now,
            acked_at_ms: None,
            result: None,
            webhook_delivered: None,
            purged_at_ms: None,
            purge_reason: None,
            group_id: None,
            group_message_id: None,
        };
        let created = self.storage.create_message(message).await?;
        self.events
            .publish(HubEvent::MessageQueued(Box::new(created)));
        Ok(())
    }
}
