use crate::agents::resolve_agent;
use crate::config::HubConfig;
use crate::crypto;
use crate::errors::ApiError;
use crate::events::{EventBus, HubEvent};
use crate::ident;
use crate::models::{
    AckRequest, ENVELOPE_VERSION, Envelope, InboxStats, MAX_SUBJECT_LEN, MAX_TTL_SEC,
    MessageStatus, NackRequest, ReplyRequest, StoredMessage, now_ms,
};
use crate::storage::DynStorage;

/// Default and ceiling for the pull visibility timeout (seconds).
pub const DEFAULT_VISIBILITY_TIMEOUT_SEC: i64 = 60;
pub const MAX_VISIBILITY_TIMEOUT_SEC: i64 = 300;

/// The inbox engine: ingests signed envelopes, leases them out to pulling
/// consumers, and drives the ack/nack lifecycle.
#[derive(Clone)]
pub struct InboxService {
    storage: DynStorage,
    events: EventBus,
    config: HubConfig,
}

impl InboxService {
    pub fn new(storage: DynStorage, events: EventBus, config: HubConfig) -> Self {
        Self {
            storage,
            events,
            config,
        }
    }

    /// Validate, authenticate, authorize and enqueue a signed envelope.
    /// Returns `{message_id, status}`; webhook push happens off the request
    /// path.
    pub async fn send(&self, envelope: Envelope) -> Result<serde_json::Value, ApiError> {
        let now = now_ms();

        if envelope.version != ENVELOPE_VERSION {
            return Err(ApiError::UnsupportedVersion(format!(
                "Unsupported envelope version '{}'",
                envelope.version
            )));
        }
        if envelope.message_type.trim().is_empty() {
            return Err(ApiError::MissingField("type is required".to_string()));
        }
        if envelope.from.trim().is_empty() {
            return Err(ApiError::MissingField("from is required".to_string()));
        }
        if envelope.to.trim().is_empty() {
            return Err(ApiError::MissingField("to is required".to_string()));
        }
        for reference in [&envelope.from, &envelope.to] {
            if !ident::is_did(reference)
                && !ident::is_valid_agent_id(ident::canonical_agent_ref(reference))
            {
                return Err(ApiError::InvalidAgentId(format!(
                    "Invalid agent reference '{reference}'"
                )));
            }
        }
        if envelope.subject.len() > MAX_SUBJECT_LEN {
            return Err(ApiError::Validation(format!(
                "Subject must be at most {MAX_SUBJECT_LEN} characters"
            )));
        }

        crypto::check_timestamp_skew(&envelope.timestamp, now).map_err(ApiError::InvalidTimestamp)?;

        let body_bytes = serde_json::to_vec(&envelope.body).unwrap_or_default().len();
        if body_bytes > self.config.max_body_bytes() {
            return Err(ApiError::BodyTooLarge(format!(
                "Body is {body_bytes} bytes; limit is {}",
                self.config.max_body_bytes()
            )));
        }

        if let Some(ttl) = envelope.ttl_sec
            && !(1..=MAX_TTL_SEC).contains(&ttl)
        {
            return Err(ApiError::InvalidTtl(format!(
                "ttl_sec must be between 1 and {MAX_TTL_SEC}"
            )));
        }
        if let Some(ttl) = envelope.ephemeral_ttl_sec
            && !(1..=MAX_TTL_SEC).contains(&ttl)
        {
            return Err(ApiError::InvalidTtl(format!(
                "ephemeral_ttl_sec must be between 1 and {MAX_TTL_SEC}"
            )));
        }

        let recipient = resolve_agent(&self.storage, &envelope.to)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("Recipient '{}' not found", envelope.to))
            })?;

        // Authenticity before authorization: the sender must be registered
        // and the envelope must verify against one of its live keys. A forged
        // `from` naming a deregistered agent dies here.
        let sender = resolve_agent(&self.storage, &envelope.from).await?;

        if !recipient.trusted_agents.is_empty() {
            let claimed = sender
                .as_ref()
                .map(|s| s.agent_id.as_str())
                .unwrap_or_else(|| ident::canonical_agent_ref(&envelope.from));
            if !recipient.trusted_agents.iter().any(|t| t == claimed) {
                return Err(ApiError::UntrustedSender(format!(
                    "'{claimed}' is not a trusted sender for '{}'",
                    recipient.agent_id
                )));
            }
        }

        let sender = sender.ok_or_else(|| {
            ApiError::InvalidSignature(format!(
                "Sender '{}' has no registered key",
                envelope.from
            ))
        })?;

        let signature = envelope
            .signature
            .as_ref()
            .ok_or_else(|| ApiError::MissingField("signature is required".to_string()))?;
        if signature.alg != "ed25519" {
            return Err(ApiError::InvalidSignature(format!(
                "Unsupported signature algorithm '{}'",
                signature.alg
            )));
        }
        let keys: Vec<_> = sender
            .verification_keys(now)
            .into_iter()
            .filter_map(|e| crypto::decode_public_key(&e.key))
            .collect();
        if !crypto::verify_envelope(&envelope, &keys) {
            return Err(ApiError::InvalidSignature(
                "Envelope signature verification failed".to_string(),
            ));
        }

        let stats = self.storage.get_inbox_stats(&recipient.agent_id).await?;
        if stats.queued + stats.leased >= self.config.max_messages_per_agent {
            return Err(ApiError::RateLimited(format!(
                "Inbox for '{}' is full",
                recipient.agent_id
            )));
        }

        let ephemeral = envelope.ephemeral.unwrap_or(false) || envelope.ephemeral_ttl_sec.is_some();
        let message = StoredMessage {
            id: envelope
                .id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            from_agent_id: sender.agent_id.clone(),
            to_agent_id: recipient.agent_id.clone(),
            status: MessageStatus::Queued,
            lease_until_ms: None,
            attempts: 0,
            ttl_sec: envelope.ttl_sec.unwrap_or(self.config.message_ttl_sec),
            ephemeral,
            ephemeral_ttl_sec: envelope.ephemeral_ttl_sec,
            expires_at_ms: envelope.ephemeral_ttl_sec.map(|s| now + s * 1000),
            created_at_ms: now,
            updated_at_ms: now,
            acked_at_ms: None,
            result: None,
            webhook_delivered: None,
            purged_at_ms: None,
            purge_reason: None,
            group_id: None,
            group_message_id: None,
            envelope,
        };

        let created = self.storage.create_message(message).await?;
        self.events
            .publish(HubEvent::MessageQueued(Box::new(created.clone())));

        Ok(serde_json::json!({
            "message_id": created.id,
            "status": created.status,
        }))
    }

    /// Lease the oldest queued message to the caller. Expired ephemerals are
    /// never served. Two concurrent pulls cannot both win the same message:
    /// the storage transition is the enforcement point, so a lost race just
    /// moves on to the next candidate.
    pub async fn pull(
        &self,
        agent_id: &str,
        visibility_timeout: Option<i64>,
    ) -> Result<Option<StoredMessage>, ApiError> {
        if self.storage.get_agent(agent_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("Agent '{agent_id}' not found")));
        }
        let timeout_sec = visibility_timeout
            .unwrap_or(DEFAULT_VISIBILITY_TIMEOUT_SEC)
            .clamp(1, MAX_VISIBILITY_TIMEOUT_SEC);
        let now = now_ms();

        let mut queued = self
            .storage
            .get_inbox(agent_id, Some(MessageStatus::Queued))
            .await?;
        queued.retain(|m| m.expires_at_ms.is_none_or(|t| t >= now));
        queued.sort_by(|a, b| {
            a.created_at_ms
                .cmp(&b.created_at_ms)
                .then_with(|| a.id.cmp(&b.id))
        });

        for candidate in queued {
            if let Some(leased) = self
                .storage
                .lease_message(&candidate.id, now + timeout_sec * 1000)
                .await?
            {
                return Ok(Some(leased));
            }
        }
        Ok(None)
    }

    /// Positive acknowledgment: terminal. Ephemeral bodies are stripped in
    /// the same transition.
    pub async fn ack(
        &self,
        agent_id: &str,
        message_id: &str,
        req: AckRequest,
    ) -> Result<StoredMessage, ApiError> {
        let message = self.get_owned(agent_id, message_id).await?;
        if message.status != MessageStatus::Leased {
            return Err(ApiError::Conflict(format!(
                "Message '{message_id}' is {}, not leased",
                message.status.as_str()
            )));
        }
        self.storage
            .ack_message(message_id, req.result)
            .await?
            .ok_or_else(|| {
                ApiError::Conflict(format!("Message '{message_id}' is no longer leased"))
            })
    }

    /// Negative acknowledgment: either extend the lease or requeue for
    /// immediate redelivery.
    pub async fn nack(
        &self,
        agent_id: &str,
        message_id: &str,
        req: NackRequest,
    ) -> Result<StoredMessage, ApiError> {
        let message = self.get_owned(agent_id, message_id).await?;
        if message.status != MessageStatus::Leased {
            return Err(ApiError::Conflict(format!(
                "Message '{message_id}' is {}, not leased",
                message.status.as_str()
            )));
        }

        let requeue = req.requeue.unwrap_or(false) || req.extend_sec.is_none();
        let updated = if requeue {
            self.storage.requeue_message(message_id).await?
        } else {
            let extend_sec = req.extend_sec.unwrap_or(0).max(0);
            let now = now_ms();
            // Extend from the current expiry if it is still in the future.
            let base = message.lease_until_ms.filter(|t| *t > now).unwrap_or(now);
            self.storage
                .extend_lease(message_id, base + extend_sec * 1000)
                .await?
        };
        updated.ok_or_else(|| {
            ApiError::Conflict(format!("Message '{message_id}' is no longer leased"))
        })
    }

    /// Correlated reply: new envelope back to the original sender, running
    /// through the normal send path (signature and all).
    pub async fn reply(
        &self,
        agent_id: &str,
        message_id: &str,
        req: ReplyRequest,
    ) -> Result<serde_json::Value, ApiError> {
        let original = self.get_owned(agent_id, message_id).await?;
        let envelope = Envelope {
            version: ENVELOPE_VERSION.to_string(),
            id: None,
            message_type: req
                .message_type
                .unwrap_or_else(|| original.envelope.message_type.clone()),
            from: agent_id.to_string(),
            to: original.from_agent_id.clone(),
            subject: req
                .subject
                .unwrap_or_else(|| format!("Re: {}", original.envelope.subject)),
            body: req.body.unwrap_or_else(|| serde_json::json!({})),
            timestamp: req.timestamp,
            correlation_id: Some(original.id.clone()),
            ttl_sec: None,
            ephemeral: None,
            ephemeral_ttl_sec: None,
            group_message_id: None,
            signature: Some(req.signature),
        };
        self.send(envelope).await
    }

    /// Public status record; purged messages surface as a distinct "gone"
    /// signal carrying the restricted record.
    pub async fn status(&self, message_id: &str) -> Result<serde_json::Value, ApiError> {
        let message = self
            .storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Message '{message_id}' not found")))?;
        if message.status == MessageStatus::Purged {
            return Err(ApiError::Gone(message.status_view()));
        }
        Ok(message.status_view())
    }

    pub async fn stats(&self, agent_id: &str) -> Result<InboxStats, ApiError> {
        if self.storage.get_agent(agent_id).await?.is_none() {
            return Err(ApiError::NotFound(format!("Agent '{agent_id}' not found")));
        }
        Ok(self.storage.get_inbox_stats(agent_id).await?)
    }

    /// Force one lease-reclamation pass (also run periodically by the sweeper).
    pub async fn reclaim(&self) -> Result<u64, ApiError> {
        Ok(self.storage.expire_leases(now_ms()).await?)
    }

    async fn get_owned(&self, agent_id: &str, message_id: &str) -> Result<StoredMessage, ApiError> {
        let message = self
            .storage
            .get_message(message_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Message '{message_id}' not found")))?;
        if message.to_agent_id != agent_id {
            return Err(ApiError::Forbidden(format!(
                "Message '{message_id}' does not belong to '{agent_id}'"
            )));
        }
        Ok(message)
    }
}
