//! Internal event bus
//!
//! Decoupled in-process pub/sub for agent events, built on
//! `tokio::sync::broadcast`. Publishing never blocks and tolerates having
//! no subscribers, which is what the crash path needs: the interceptor
//! fires `CrashOccurred` and moves on.

use tokio::sync::broadcast;
use tracing::trace;

use faultline_core::domain::SessionId;

/// Events published by the agent for decoupled subscribers
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// A crash record was captured and persisted
    CrashOccurred {
        session_id: SessionId,
        message: String,
    },
    /// A delivery round surfaced previously-reported crash contents
    PreviousReportsAvailable { count: usize },
}

/// Broadcast-backed event bus
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AgentEvent>,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event; a send with no subscribers is not an error.
    pub fn publish(&self, event: AgentEvent) {
        trace!(?event, "Publishing agent event");
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_crash_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let session = SessionId::new();

        bus.publish(AgentEvent::CrashOccurred {
            session_id: session,
            message: "boom".to_string(),
        });

        match rx.recv().await.unwrap() {
            AgentEvent::CrashOccurred {
                session_id,
                message,
            } => {
                assert_eq!(session_id, session);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::default();
        bus.publish(AgentEvent::PreviousReportsAvailable { count: 2 });
    }
}
