use std::sync::Arc;

use tokio::sync::{Semaphore, broadcast};

use crate::crypto;
use crate::events::HubEvent;
use crate::models::StoredMessage;
use crate::storage::{DynStorage, MessagePatch};

/// Request timeout per delivery attempt.
const WEBHOOK_TIMEOUT_SECS: u64 = 10;
/// Attempts per message; backoff doubles from this base between them.
const WEBHOOK_MAX_ATTEMPTS: u32 = 3;
const WEBHOOK_BACKOFF_BASE_SECS: u64 = 1;
/// Cap on concurrent delivery tasks.
const WEBHOOK_POOL_SIZE: usize = 32;

/// Spawns the background task that subscribes to the EventBus and pushes
/// queued messages to recipient webhooks. Delivery is best-effort: it never
/// blocks the send response, never changes message lifecycle state, and
/// never acks on the consumer's behalf.
pub fn spawn_dispatcher(mut receiver: broadcast::Receiver<HubEvent>, storage: DynStorage) {
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .expect("Failed to create webhook HTTP client");
        let pool = Arc::new(Semaphore::new(WEBHOOK_POOL_SIZE));

        loop {
            match receiver.recv().await {
                Ok(HubEvent::MessageQueued(msg)) => {
                    let recipient = match storage.get_agent(&msg.to_agent_id).await {
                        Ok(Some(agent)) => agent,
                        Ok(None) => continue,
                        Err(e) => {
                            eprintln!("⚠️ Webhook dispatcher: agent lookup failed: {e}");
                            continue;
                        }
                    };
                    let Some(url) = recipient.webhook_url else {
                        continue;
                    };

                    let permit = match pool.clone().acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => break,
                    };
                    let client = client.clone();
                    let storage = storage.clone();
                    let secret = recipient.webhook_secret;
                    tokio::spawn(async move {
                        let _permit = permit;
                        deliver_with_retries(&client, &storage, &url, secret.as_deref(), &msg)
                            .await;
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    eprintln!("⚠️ Webhook dispatcher lagged, missed {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    eprintln!("Webhook dispatcher: channel closed, exiting");
                    break;
                }
            }
        }
    });
}

/// Build the delivery payload. The HMAC covers the JSON serialization of the
/// payload without the signature field; the signature then rides both in the
/// payload and in the `X-ADMP-Signature` header.
fn build_payload(msg: &StoredMessage, secret: Option<&str>) -> (serde_json::Value, Option<String>) {
    let mut payload = serde_json::json!({
        "event": "message.received",
        "message_id": msg.id,
        "envelope": msg.envelope,
        "delivered_at": chrono::Utc::now().to_rfc3339(),
    });
    let signature = secret.and_then(|s| {
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();
        crypto::hmac_sha256_hex(s, &bytes)
    });
    if let (Some(sig), Some(obj)) = (&signature, payload.as_object_mut()) {
        obj.insert(
            "signature".to_string(),
            serde_json::Value::String(sig.clone()),
        );
    }
    (payload, signature)
}

async fn deliver_with_retries(
    client: &reqwest::Client,
    storage: &DynStorage,
    url: &str,
    secret: Option<&str>,
    msg: &StoredMessage,
) {
    for attempt in 1..=WEBHOOK_MAX_ATTEMPTS {
        // The message may have been acked or purged while we were backing
        // off; an ephemeral body must never leave the hub after its purge.
        let current = match storage.get_message(&msg.id).await {
            Ok(Some(m)) => m,
            _ => return,
        };
        if current.status == crate::models::MessageStatus::Purged {
            return;
        }

        let (payload, signature) = build_payload(&current, secret);
        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .header("X-ADMP-Event", "message.received")
            .header("X-ADMP-Message-ID", &msg.id)
            .header("X-ADMP-Delivery-Attempt", attempt.to_string())
            .header("User-Agent", "ADMP-Server/1.0");
        if let Some(sig) = &signature {
            request = request.header("X-ADMP-Signature", sig);
        }

        match request.json(&payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                let patch = MessagePatch {
                    webhook_delivered: Some(true),
                    ..Default::default()
                };
                if let Err(e) = storage.update_message(&msg.id, patch).await {
                    eprintln!("⚠️ Webhook {}: delivered but not recorded: {e}", msg.id);
                }
                return;
            }
            Ok(resp) => {
                eprintln!(
                    "⚠️ Webhook {} attempt {}/{}: HTTP {}",
                    msg.id,
                    attempt,
                    WEBHOOK_MAX_ATTEMPTS,
                    resp.status()
                );
            }
            Err(e) => {
                eprintln!(
                    "⚠️ Webhook {} attempt {}/{}: {e}",
                    msg.id, attempt, WEBHOOK_MAX_ATTEMPTS
                );
            }
        }

        if attempt < WEBHOOK_MAX_ATTEMPTS {
            let backoff = WEBHOOK_BACKOFF_BASE_SECS << (attempt - 1);
            tokio::time::sleep(std::time::Duration::from_secs(backoff)).await;
        }
    }
    eprintln!(
        "⚠️ Webhook {}: giving up after {} attempts (message stays pullable)",
        msg.id, WEBHOOK_MAX_ATTEMPTS
    );
}
