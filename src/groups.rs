use crate::config::HubConfig;
use crate::crypto;
use crate::errors::ApiError;
use crate::events::{EventBus, HubEvent};
use crate::ident;
use crate::models::{
    CreateGroupRequest, ENVELOPE_VERSION, Envelope, GROUP_ACCESS_INVITE, GROUP_ACCESS_KEY,
    GROUP_ACCESS_OPEN, Group, GroupMember, GroupMemberRequest, GroupPostRequest, GroupSettings,
    JoinGroupRequest, MAX_GROUP_SUBJECT_LEN, MessageStatus, ROLE_ADMIN, ROLE_MEMBER, ROLE_OWNER,
    StoredMessage, now_ms,
};
use crate::storage::{DynStorage, GroupFilter};

/// Hard ceiling on `settings.max_members`; requests above it are clamped
/// down at creation.
pub const GROUP_MEMBER_CAP: usize = 256;
pub const DEFAULT_GROUP_MAX_MEMBERS: usize = 100;
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Group membership and fanout. A post materializes one envelope per member,
/// all sharing a `group_message_id` so history can collapse the copies.
#[derive(Clone)]
pub struct GroupService {
    storage: DynStorage,
    events: EventBus,
    config: HubConfig,
}

impl GroupService {
    pub fn new(storage: DynStorage, events: EventBus, config: HubConfig) -> Self {
        Self {
            storage,
            events,
            config,
        }
    }

    pub async fn create(&self, req: CreateGroupRequest) -> Result<Group, ApiError> {
        let name = req.name.trim().to_string();
        if !ident::is_valid_group_name(&name) {
            return Err(ApiError::Validation(
                "Group name must be 1-100 chars of letters, digits, spaces, '-', '_' or '.'"
                    .to_string(),
            ));
        }
        if self.storage.get_agent(&req.created_by).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Agent '{}' not found",
                req.created_by
            )));
        }

        let access = req
            .access
            .unwrap_or_else(|| GROUP_ACCESS_INVITE.to_string());
        if ![GROUP_ACCESS_OPEN, GROUP_ACCESS_KEY, GROUP_ACCESS_INVITE].contains(&access.as_str()) {
            return Err(ApiError::Validation(format!(
                "Unknown access type '{access}'"
            )));
        }
        let join_key_hash = if access == GROUP_ACCESS_KEY {
            let key = req.join_key.as_deref().ok_or_else(|| {
                ApiError::MissingField("join_key is required for key-protected groups".to_string())
            })?;
            Some(crypto::sha256_hex(key.as_bytes()))
        } else {
            None
        };

        let now = now_ms();
        let group = Group {
            group_id: ident::generate_group_id(&name),
            name,
            created_by: req.created_by.clone(),
            access,
            join_key_hash,
            settings: GroupSettings {
                history_visible: req.history_visible.unwrap_or(true),
                max_members: req
                    .max_members
                    .unwrap_or(DEFAULT_GROUP_MAX_MEMBERS)
                    .min(GROUP_MEMBER_CAP),
                message_ttl_sec: req.message_ttl_sec,
            },
            members: vec![GroupMember {
                agent_id: req.created_by,
                role: ROLE_OWNER.to_string(),
                joined_at_ms: now,
            }],
            hidden: false,
            created_at_ms: now,
            updated_at_ms: now,
        };
        Ok(self.storage.create_group(group).await?)
    }

    /// Backing group for a round table: invite-only, hidden from listings,
    /// membership fixed to the participant set.
    pub(crate) async fn create_hidden(
        &self,
        name: &str,
        owner: &str,
        members: &[String],
    ) -> Result<Group, ApiError> {
        let now = now_ms();
        let mut member_list = vec![GroupMember {
            agent_id: owner.to_string(),
            role: ROLE_OWNER.to_string(),
            joined_at_ms: now,
        }];
        for agent_id in members.iter().filter(|m| *m != owner) {
            member_list.push(GroupMember {
                agent_id: agent_id.clone(),
                role: ROLE_MEMBER.to_string(),
                joined_at_ms: now,
            });
        }
        let group = Group {
            group_id: ident::generate_group_id(name),
            name: name.to_string(),
            created_by: owner.to_string(),
            access: GROUP_ACCESS_INVITE.to_string(),
            join_key_hash: None,
            settings: GroupSettings {
                history_visible: true,
                max_members: GROUP_MEMBER_CAP,
                message_ttl_sec: None,
            },
            members: member_list,
            hidden: true,
            created_at_ms: now,
            updated_at_ms: now,
        };
        Ok(self.storage.create_group(group).await?)
    }

    pub async fn get(&self, group_id: &str) -> Result<Group, ApiError> {
        self.storage
            .get_group(group_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Group '{group_id}' not found")))
    }

    pub async fn list(&self, member: Option<String>) -> Result<Vec<Group>, ApiError> {
        Ok(self
            .storage
            .list_groups(GroupFilter {
                include_hidden: false,
                member,
            })
            .await?)
    }

    pub async fn join(&self, group_id: &str, req: JoinGroupRequest) -> Result<Group, ApiError> {
        let group = self.get(group_id).await?;
        if self.storage.get_agent(&req.agent_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Agent '{}' not found",
                req.agent_id
            )));
        }
        match group.access.as_str() {
            GROUP_ACCESS_OPEN => {}
            GROUP_ACCESS_KEY => {
                let provided = req.join_key.as_deref().unwrap_or("");
                let hash = crypto::sha256_hex(provided.as_bytes());
                if group.join_key_hash.as_deref() != Some(hash.as_str()) {
                    return Err(ApiError::Forbidden("Invalid join key".to_string()));
                }
            }
            _ => {
                return Err(ApiError::Forbidden(
                    "Group is invite-only; ask an owner or admin to add you".to_string(),
                ));
            }
        }
        self.insert_member(&group, req.agent_id, ROLE_MEMBER.to_string())
            .await
    }

    /// Owner/admin adds a member directly (the only path into an invite-only
    /// group).
    pub async fn add_member(
        &self,
        group_id: &str,
        req: GroupMemberRequest,
    ) -> Result<Group, ApiError> {
        let group = self.get(group_id).await?;
        if !matches!(group.role_of(&req.actor), Some(ROLE_OWNER) | Some(ROLE_ADMIN)) {
            return Err(ApiError::Forbidden(
                "Only the owner or an admin can add members".to_string(),
            ));
        }
        if self.storage.get_agent(&req.agent_id).await?.is_none() {
            return Err(ApiError::NotFound(format!(
                "Agent '{}' not found",
                req.agent_id
            )));
        }
        let role = req.role.unwrap_or_else(|| ROLE_MEMBER.to_string());
        if role == ROLE_OWNER {
            return Err(ApiError::Validation(
                "A group has exactly one owner".to_string(),
            ));
        }
        if ![ROLE_ADMIN, ROLE_MEMBER].contains(&role.as_str()) {
            return Err(ApiError::Validation(format!("Unknown role '{role}'")));
        }
        self.insert_member(&group, req.agent_id, role).await
    }

    pub async fn remove_member(
        &self,
        group_id: &str,
        actor: &str,
        agent_id: &str,
    ) -> Result<(), ApiError> {
        let group = self.get(group_id).await?;
        if !matches!(group.role_of(actor), Some(ROLE_OWNER) | Some(ROLE_ADMIN)) {
            return Err(ApiError::Forbidden(
                "Only the owner or an admin can remove members".to_string(),
            ));
        }
        if group.role_of(agent_id) == Some(ROLE_OWNER) {
            return Err(ApiError::Forbidden(
                "The owner cannot be removed".to_string(),
            ));
        }
        if !self.storage.remove_group_member(group_id, agent_id).await? {
            return Err(ApiError::NotFound(format!(
                "'{agent_id}' is not a member of '{group_id}'"
            )));
        }
        Ok(())
    }

    pub async fn leave(&self, group_id: &str, agent_id: &str) -> Result<(), ApiError> {
        let group = self.get(group_id).await?;
        match group.role_of(agent_id) {
            Some(ROLE_OWNER) => Err(ApiError::Forbidden(
                "The owner cannot leave; delete the group instead".to_string(),
            )),
            Some(_) => {
                self.storage.remove_group_member(group_id, agent_id).await?;
                Ok(())
            }
            None => Err(ApiError::NotFound(format!(
                "'{agent_id}' is not a member of '{group_id}'"
            ))),
        }
    }

    pub async fn delete(&self, group_id: &str, actor: &str) -> Result<(), ApiError> {
        let group = self.get(group_id).await?;
        if group.role_of(actor) != Some(ROLE_OWNER) {
            return Err(ApiError::Forbidden(
                "Only the owner can delete a group".to_string(),
            ));
        }
        self.storage.delete_group(group_id).await?;
        Ok(())
    }

    pub async fn members(&self, group_id: &str) -> Result<Vec<GroupMember>, ApiError> {
        self.storage
            .get_group_members(group_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Group '{group_id}' not found")))
    }

    /// Fan a post out to every member except the sender. Each copy gets its
    /// own message id but shares the `group_message_id`. Partial success is
    /// allowed; failures are reported per recipient.
    pub async fn post(
        &self,
        group_id: &str,
        req: GroupPostRequest,
    ) -> Result<serde_json::Value, ApiError> {
        let group = self.get(group_id).await?;
        if group.member(&req.from).is_none() {
            return Err(ApiError::Forbidden(format!(
                "'{}' is not a member of '{group_id}'",
                req.from
            )));
        }
        if req.subject.len() > MAX_GROUP_SUBJECT_LEN {
            return Err(ApiError::Validation(format!(
                "Subject must be at most {MAX_GROUP_SUBJECT_LEN} characters"
            )));
        }
        let body_bytes = serde_json::to_vec(&req.body).unwrap_or_default().len();
        if body_bytes > self.config.max_body_bytes() {
            return Err(ApiError::BodyTooLarge(format!(
                "Body is {body_bytes} bytes; limit is {}",
                self.config.max_body_bytes()
            )));
        }

        let group_message_id = uuid::Uuid::new_v4().to_string();
        let message_type = req
            .message_type
            .unwrap_or_else(|| "group.message".to_string());
        let mut delivered = Vec::new();
        let mut failed = Vec::new();

        for member in group.members.iter().filter(|m| m.agent_id != req.from) {
            match self
                .fanout_one(
                    &group,
                    &req.from,
                    &member.agent_id,
                    &message_type,
                    &req.subject,
                    &req.body,
                    &group_message_id,
                )
                .await
            {
                Ok(message_id) => delivered.push(serde_json::json!({
                    "agent_id": member.agent_id,
                    "message_id": message_id,
                })),
                Err(e) => failed.push(serde_json::json!({
                    "agent_id": member.agent_id,
                    "error": e.code(),
                })),
            }
        }

        Ok(serde_json::json!({
            "group_id": group.group_id,
            "group_message_id": group_message_id,
            "delivered": delivered,
            "failed": failed,
        }))
    }

    /// Deduplicated history, newest first. Requires membership and
    /// `history_visible`.
    pub async fn history(
        &self,
        group_id: &str,
        caller: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredMessage>, ApiError> {
        let group = self.get(group_id).await?;
        if group.member(caller).is_none() {
            return Err(ApiError::Forbidden(format!(
                "'{caller}' is not a member of '{group_id}'"
            )));
        }
        if !group.settings.history_visible {
            return Err(ApiError::Forbidden(
                "History is not visible in this group".to_string(),
            ));
        }
        Ok(self
            .storage
            .get_group_messages(group_id, limit.unwrap_or(DEFAULT_HISTORY_LIMIT))
            .await?)
    }

    async fn insert_member(
        &self,
        group: &Group,
        agent_id: String,
        role: String,
    ) -> Result<Group, ApiError> {
        if group.members.len() >= group.settings.max_members {
            return Err(ApiError::Conflict(format!(
                "Group '{}' is at its member limit",
                group.group_id
            )));
        }
        self.storage
            .add_group_member(
                &group.group_id,
                GroupMember {
                    agent_id,
                    role,
                    joined_at_ms: now_ms(),
                },
            )
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Group '{}' not found", group.group_id)))
    }

    #[allow(clippy::too_many_arguments)]
    async fn fanout_one(
        &self,
        group: &Group,
        from: &str,
        to: &str,
        message_type: &str,
        subject: &str,
        body: &serde_json::Value,
        group_message_id: &str,
    ) -> Result<String, ApiError> {
        let now = now_ms();
        let envelope = Envelope {
            version: ENVELOPE_VERSION.to_string(),
            id: None,
            message_type: message_type.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.clone(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: None,
            ttl_sec: group.settings.message_ttl_sec,
            ephemeral: None,
            ephemeral_ttl_sec: None,
            group_message_id: Some(group_message_id.to_string()),
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
            ttl_sec: group
                .settings
                .message_ttl_sec
                .unwrap_or(self.config.message_ttl_sec),
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
            group_id: Some(group.group_id.clone()),
            group_message_id: Some(group_message_id.to_string()),
        };
        let created = self.storage.create_message(message).await?;
        let message_id = created.id.clone();
        self.events
            .publish(HubEvent::MessageQueued(Box::new(created)));
        Ok(message_id)
    }
}
