//! Event broadcaster adapters

use tokio::sync::broadcast;

use crate::application::events::{AuthEvent, EventBroadcaster};

/// Writes every event to the log
#[derive(Debug, Clone, Default)]
pub struct TracingEventBroadcaster;

impl EventBroadcaster for TracingEventBroadcaster {
    fn emit(&self, event: AuthEvent) {
        tracing::info!(event = event.event_type(), ?event, "Auth event");
    }
}

/// Fans events out to in-process subscribers. Emitting with no subscriber,
/// or with lagging ones, is not an error.
#[derive(Debug, Clone)]
pub struct ChannelEventBroadcaster {
    sender: broadcast::Sender<AuthEvent>,
}

impl ChannelEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }
}

impl EventBroadcaster for ChannelEventBroadcaster {
    fn emit(&self, event: AuthEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::id::PrincipalId;

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let events = ChannelEventBroadcaster::new(8);
        let mut rx = events.subscribe();
        let id = PrincipalId::new();

        events.emit(AuthEvent::Logout { principal_id: id });
        assert_eq!(rx.recv().await.unwrap(), AuthEvent::Logout { principal_id: id });
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        ChannelEventBroadcaster::new(1).emit(AuthEvent::PolicyChanged { principal_id: None });
    }
}
