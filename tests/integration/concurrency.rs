// Concurrency properties of the storage contract: racing tasks against the
// in-process backend to show the exactly-once transitions the delivery
// guarantees rest on.

use std::sync::Arc;

use admp_hub::agents::AgentService;
use admp_hub::config::HubConfig;
use admp_hub::events::EventBus;
use admp_hub::inbox::InboxService;
use admp_hub::models::{
    AckRequest, Envelope, IssuedKey, MessageStatus, StoredMessage, now_ms,
};
use admp_hub::storage::memory::MemoryStorage;
use admp_hub::storage::{DynStorage, Storage};

fn queued_message(id: &str, to: &str) -> StoredMessage {
    let now = now_ms();
    StoredMessage {
        id: id.to_string(),
        from_agent_id: "sender".to_string(),
        to_agent_id: to.to_string(),
        envelope: Envelope {
            version: "1.0".to_string(),
            id: Some(id.to_string()),
            message_type: "task.request".to_string(),
            from: "sender".to_string(),
            to: to.to_string(),
            subject: "race".to_string(),
            body: serde_json::json!({}),
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: None,
            ttl_sec: None,
            ephemeral: None,
            ephemeral_ttl_sec: None,
            group_message_id: None,
            signature: None,
        },
        status: MessageStatus::Queued,
        lease_until_ms: None,
        attempts: 0,
        ttl_sec: 86_400,
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
    }
}

#[test]
fn test_concurrent_lease_attempts_have_one_winner() {
    rocket::execute(async {
        let storage: DynStorage = Arc::new(MemoryStorage::new());
        storage
            .create_message(queued_message("contested", "bob"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage
                    .lease_message("contested", now_ms() + 60_000)
                    .await
                    .unwrap()
                    .is_some()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one pull may lease a queued message");

        let msg = storage.get_message("contested").await.unwrap().unwrap();
        assert_eq!(msg.attempts, 1);
    });
}

#[test]
fn test_concurrent_pulls_partition_the_inbox() {
    rocket::execute(async {
        let storage: DynStorage = Arc::new(MemoryStorage::new());
        let events = EventBus::new();
        let config = HubConfig::default();
        let agents = AgentService::new(storage.clone(), config.clone());
        let inbox = InboxService::new(storage.clone(), events, config);

        agents
            .register(admp_hub::models::RegisterRequest {
                agent_id: Some("bob".to_string()),
                seed: None,
                agent_type: None,
                metadata: None,
                webhook_url: None,
                webhook_secret: None,
            })
            .await
            .unwrap();
        for i in 0..8 {
            storage
                .create_message(queued_message(&format!("m{i}"), "bob"))
                .await
                .unwrap();
        }

        // Two workers drain the inbox concurrently; every message must be
        // delivered to exactly one of them
        let mut handles = Vec::new();
        for _ in 0..2 {
            let inbox = inbox.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(msg) = inbox.pull("bob", Some(60)).await.unwrap() {
                    seen.push(msg.id.clone());
                    inbox
                        .ack("bob", &msg.id, AckRequest { result: None })
                        .await
                        .unwrap();
                }
                seen
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        let before_dedup = all.len();
        all.dedup();
        assert_eq!(before_dedup, all.len(), "a message was delivered twice");
        assert_eq!(all.len(), 8, "every message was delivered once");
    });
}

#[test]
fn test_concurrent_burn_has_one_winner() {
    rocket::execute(async {
        let storage: DynStorage = Arc::new(MemoryStorage::new());
        storage
            .create_issued_key(IssuedKey {
                key_id: "hot".to_string(),
                key_hash: "beef".to_string(),
                scope: "api".to_string(),
                single_use: true,
                revoked: false,
                used_at_ms: None,
                created_at_ms: now_ms(),
                expires_at_ms: None,
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.burn_single_use_key("hot").await.unwrap()
            }));
        }
        let mut burns = 0;
        for handle in handles {
            if handle.await.unwrap() {
                burns += 1;
            }
        }
        assert_eq!(burns, 1, "burn must succeed for exactly one caller");
    });
}

#[test]
fn test_concurrent_acks_at_most_one_succeeds() {
    rocket::execute(async {
        let storage: DynStorage = Arc::new(MemoryStorage::new());
        storage
            .create_message(queued_message("once", "bob"))
            .await
            .unwrap();
        storage
            .lease_message("once", now_ms() + 60_000)
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let storage = storage.clone();
            handles.push(tokio::spawn(async move {
                storage.ack_message("once", None).await.unwrap().is_some()
            }));
        }
        let mut acks = 0;
        for handle in handles {
            if handle.await.unwrap() {
                acks += 1;
            }
        }
        assert_eq!(acks, 1, "no two distinct acks may succeed");
    });
}
