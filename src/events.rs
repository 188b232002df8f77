use crate::models::StoredMessage;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum HubEvent {
    /// A message landed in an inbox with `status = queued`. The webhook
    /// dispatcher decides whether the recipient gets a push.
    MessageQueued(Box<StoredMessage>),
}

#[derive(Clone)]
pub struct EventBus {
    pub sender: broadcast::Sender<HubEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        EventBus { sender }
    }

    pub fn publish(&self, event: HubEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }
}
