use crate::config::HubConfig;
use crate::crypto;
use crate::errors::{ApiError, StorageError};
use crate::ident;
use crate::models::{
    AGENT_STATUS_ONLINE, Agent, PublicKeyEntry, RegisterRequest, RotateKeyRequest,
    WebhookConfigRequest, now_ms,
};
use crate::storage::{AgentFilter, AgentPatch, DynStorage};

/// Resolve an envelope-layer reference — bare ID, legacy `agent://` URI, or
/// DID — to the registered agent.
pub(crate) async fn resolve_agent(
    storage: &DynStorage,
    raw: &str,
) -> Result<Option<Agent>, StorageError> {
    if ident::is_did(raw) {
        return storage.get_agent_by_did(raw).await;
    }
    storage.get_agent(ident::canonical_agent_ref(raw)).await
}

/// Owns agent identity: registration, keypair lifecycle, heartbeat, trust
/// lists and webhook config.
#[derive(Clone)]
pub struct AgentService {
    storage: DynStorage,
    config: HubConfig,
}

impl AgentService {
    pub fn new(storage: DynStorage, config: HubConfig) -> Self {
        Self { storage, config }
    }

    /// Register a new agent. Legacy mode (no seed) generates a keypair and
    /// reveals the secret exactly once; seed mode derives the keypair and a
    /// `did:seed:` identity without ever storing the seed.
    pub async fn register(&self, req: RegisterRequest) -> Result<serde_json::Value, ApiError> {
        let agent_id = match req.agent_id {
            Some(id) => {
                let id = id.trim().to_string();
                if ident::has_reserved_prefix(&id) {
                    return Err(ApiError::InvalidAgentId(format!(
                        "Agent id may not use a reserved prefix: {id}"
                    )));
                }
                if !ident::is_valid_agent_id(&id) {
                    return Err(ApiError::InvalidAgentId(
                        "Agent id must be 1-255 chars of [A-Za-z0-9._:/-]".to_string(),
                    ));
                }
                id
            }
            None => ident::generate_agent_id(),
        };

        let (signing_key, verifying_key, registration_mode) = match &req.seed {
            Some(seed_b64) => {
                let seed = crypto::decode_seed(seed_b64).ok_or_else(|| {
                    ApiError::Validation("Seed must be base64 of exactly 32 bytes".to_string())
                })?;
                let (sk, vk) = crypto::keypair_from_seed(&seed);
                (sk, vk, "seed")
            }
            None => {
                let (sk, vk) = crypto::generate_keypair();
                (sk, vk, "legacy")
            }
        };

        let did = (registration_mode == "seed")
            .then(|| crypto::did_from_public_key(&verifying_key));
        let public_key = crypto::encode_public_key(&verifying_key);
        let now = now_ms();

        let webhook_secret = req.webhook_url.as_ref().map(|_| {
            req.webhook_secret
                .clone()
                .unwrap_or_else(ident::generate_webhook_secret)
        });

        let agent = Agent {
            agent_id: agent_id.clone(),
            did: did.clone(),
            public_key: public_key.clone(),
            public_keys: vec![PublicKeyEntry {
                key: public_key.clone(),
                active: true,
                deactivate_at_ms: None,
                added_at_ms: now,
            }],
            agent_type: req.agent_type,
            metadata: req.metadata.unwrap_or_else(|| serde_json::json!({})),
            trusted_agents: Vec::new(),
            webhook_url: req.webhook_url,
            webhook_secret,
            last_heartbeat_ms: Some(now),
            status: AGENT_STATUS_ONLINE.to_string(),
            created_at_ms: now,
            updated_at_ms: now,
        };

        let created = self.storage.create_agent(agent).await?;

        let mut out = serde_json::json!({
            "agent_id": created.agent_id,
            "public_key": created.public_key,
            "registration_mode": registration_mode,
        });
        if let Some(obj) = out.as_object_mut() {
            if registration_mode == "legacy" {
                obj.insert(
                    "secret_key".to_string(),
                    serde_json::Value::String(crypto::encode_secret_key(&signing_key)),
                );
            }
            if let Some(did) = did {
                obj.insert("did".to_string(), serde_json::Value::String(did));
            }
        }
        Ok(out)
    }

    pub async fn get(&self, id: &str) -> Result<Agent, ApiError> {
        self.storage
            .get_agent(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Agent '{id}' not found")))
    }

    pub async fn list(&self, filter: AgentFilter) -> Result<Vec<Agent>, ApiError> {
        Ok(self.storage.list_agents(filter).await?)
    }

    /// Deregister: removes the agent and destroys its inbox.
    pub async fn deregister(&self, id: &str) -> Result<(), ApiError> {
        if !self.storage.delete_agent(id).await? {
            return Err(ApiError::NotFound(format!("Agent '{id}' not found")));
        }
        Ok(())
    }

    pub async fn heartbeat(&self, id: &str) -> Result<Agent, ApiError> {
        let patch = AgentPatch {
            last_heartbeat_ms: Some(now_ms()),
            status: Some(AGENT_STATUS_ONLINE.to_string()),
            ..Default::default()
        };
        self.storage
            .update_agent(id, patch)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Agent '{id}' not found")))
    }

    pub async fn trusted_agents(&self, id: &str) -> Result<Vec<String>, ApiError> {
        Ok(self.get(id).await?.trusted_agents)
    }

    pub async fn add_trusted(&self, id: &str, trusted: &str) -> Result<Vec<String>, ApiError> {
        let agent = self.get(id).await?;
        let mut list = agent.trusted_agents;
        if list.iter().any(|t| t == trusted) {
            return Err(ApiError::Conflict(format!(
                "'{trusted}' is already trusted"
            )));
        }
        list.push(trusted.to_string());
        let patch = AgentPatch {
            trusted_agents: Some(list.clone()),
            ..Default::default()
        };
        self.storage.update_agent(id, patch).await?;
        Ok(list)
    }

    pub async fn remove_trusted(&self, id: &str, trusted: &str) -> Result<Vec<String>, ApiError> {
        let agent = self.get(id).await?;
        let mut list = agent.trusted_agents;
        let before = list.len();
        list.retain(|t| t != trusted);
        if list.len() == before {
            return Err(ApiError::NotFound(format!("'{trusted}' is not trusted")));
        }
        let patch = AgentPatch {
            trusted_agents: Some(list.clone()),
            ..Default::default()
        };
        self.storage.update_agent(id, patch).await?;
        Ok(list)
    }

    /// Webhook config without the secret.
    pub async fn webhook_config(&self, id: &str) -> Result<serde_json::Value, ApiError> {
        let agent = self.get(id).await?;
        Ok(serde_json::json!({
            "agent_id": agent.agent_id,
            "webhook_url": agent.webhook_url,
            "has_secret": agent.webhook_secret.is_some(),
        }))
    }

    /// Set the webhook; autogenerates a secret when the caller omits one.
    /// The secret is only ever returned from this call.
    pub async fn set_webhook(
        &self,
        id: &str,
        req: WebhookConfigRequest,
    ) -> Result<serde_json::Value, ApiError> {
        if !(req.url.starts_with("http://") || req.url.starts_with("https://")) {
            return Err(ApiError::Validation(
                "Webhook url must be http(s)".to_string(),
            ));
        }
        let secret = req.secret.unwrap_or_else(ident::generate_webhook_secret);
        let patch = AgentPatch {
            set_webhook: Some((req.url.clone(), secret.clone())),
            ..Default::default()
        };
        self.storage
            .update_agent(id, patch)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Agent '{id}' not found")))?;
        Ok(serde_json::json!({
            "agent_id": id,
            "webhook_url": req.url,
            "webhook_secret": secret,
        }))
    }

    pub async fn delete_webhook(&self, id: &str) -> Result<(), ApiError> {
        let patch = AgentPatch {
            clear_webhook: true,
            ..Default::default()
        };
        self.storage
            .update_agent(id, patch)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Agent '{id}' not found")))?;
        Ok(())
    }

    /// Append a new active signing key. The previous primary either
    /// deactivates immediately or keeps verifying through a grace window.
    pub async fn rotate_key(
        &self,
        id: &str,
        req: RotateKeyRequest,
    ) -> Result<serde_json::Value, ApiError> {
        let agent = self.get(id).await?;
        let now = now_ms();

        let (new_public_key, new_secret) = match &req.new_public_key {
            Some(pk_b64) => {
                if crypto::decode_public_key(pk_b64).is_none() {
                    return Err(ApiError::Validation(
                        "new_public_key must be base64 of a 32-byte Ed25519 key".to_string(),
                    ));
                }
                (pk_b64.clone(), None)
            }
            None => {
                let (sk, vk) = crypto::generate_keypair();
                (
                    crypto::encode_public_key(&vk),
                    Some(crypto::encode_secret_key(&sk)),
                )
            }
        };

        let grace_ms = req.grace_sec.map(|s| s.max(0) * 1000);
        let mut keys = agent.public_keys;
        for entry in keys.iter_mut().filter(|k| k.active) {
            entry.active = false;
            entry.deactivate_at_ms = grace_ms.map(|g| now + g);
        }
        keys.push(PublicKeyEntry {
            key: new_public_key.clone(),
            active: true,
            deactivate_at_ms: None,
            added_at_ms: now,
        });

        let patch = AgentPatch {
            public_key: Some(new_public_key.clone()),
            public_keys: Some(keys),
            ..Default::default()
        };
        self.storage.update_agent(id, patch).await?;

        let mut out = serde_json::json!({
            "agent_id": id,
            "public_key": new_public_key,
            "rotated_at_ms": now,
        });
        if let (Some(obj), Some(secret)) = (out.as_object_mut(), new_secret) {
            obj.insert("secret_key".to_string(), serde_json::Value::String(secret));
        }
        Ok(out)
    }

    /// Advisory heartbeat status refresh run by the sweeper: agents silent
    /// past the timeout flip to offline. Never blocks delivery.
    pub async fn refresh_statuses(&self) -> Result<u64, ApiError> {
        let cutoff = now_ms() - self.config.heartbeat_timeout_ms;
        let online = self
            .storage
            .list_agents(AgentFilter {
                status: Some(AGENT_STATUS_ONLINE.to_string()),
                ..Default::default()
            })
            .await?;
        let mut flipped = 0;
        for agent in online {
            if agent.last_heartbeat_ms.is_none_or(|t| t < cutoff) {
                let patch = AgentPatch {
                    status: Some(crate::models::AGENT_STATUS_OFFLINE.to_string()),
                    ..Default::default()
                };
                self.storage.update_agent(&agent.agent_id, patch).await?;
                flipped += 1;
            }
        }
        Ok(flipped)
    }
}
