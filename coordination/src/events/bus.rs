//! Single-consumer notification channel
//!
//! Producers hold cheap [`Notifier`] clones and never block: when the
//! bounded queue is full the notification is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::types::CoordinationEvent;

/// Default channel capacity
pub const CHANNEL_CAPACITY: usize = 256;

/// Sending half of the notification channel
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: mpsc::Sender<CoordinationEvent>,
    dropped: Arc<AtomicU64>,
}

/// Receiving half of the notification channel
#[derive(Debug)]
pub struct NotificationReceiver {
    receiver: mpsc::Receiver<CoordinationEvent>,
}

/// Create a bounded notification channel
pub fn notification_channel(capacity: usize) -> (Notifier, NotificationReceiver) {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    (
        Notifier {
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        NotificationReceiver { receiver },
    )
}

impl Notifier {
    /// Queue an event without waiting. Returns `false` if it was dropped.
    pub fn notify(&self, event: CoordinationEvent) -> bool {
        let event_type = event.event_type();
        match self.sender.try_send(event) {
            Ok(()) => {
                debug!(event_type, "Notification queued");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(event_type, dropped, "Notification channel full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(event_type, "Notification receiver gone");
                false
            }
        }
    }

    /// Notifications dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Whether the receiving half is still alive
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

impl NotificationReceiver {
    /// Wait for the next notification; `None` once every notifier is gone
    pub async fn recv(&mut self) -> Option<CoordinationEvent> {
        self.receiver.recv().await
    }

    /// Take whatever is queued right now
    pub fn drain(&mut self) -> Vec<CoordinationEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::AgentFailureReason;
    use crate::ensemble::types::AgentType;
    use chrono::Utc;

    fn failure(id: &str) -> CoordinationEvent {
        CoordinationEvent::AgentFailed {
            agent_id: id.to_string(),
            agent_type: AgentType::Analyst,
            reason: AgentFailureReason::Error,
            message: "boom".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_notify_and_receive() {
        let (notifier, mut receiver) = notification_channel(4);
        assert!(notifier.notify(failure("a")));

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type(), "agent_failed");
    }

    #[test]
    fn test_full_channel_drops() {
        let (notifier, mut receiver) = notification_channel(1);
        assert!(notifier.notify(failure("a")));
        assert!(!notifier.notify(failure("b")));
        assert_eq!(notifier.dropped(), 1);
        assert_eq!(receiver.drain().len(), 1);
    }

    #[test]
    fn test_closed_receiver() {
        let (notifier, receiver) = notification_channel(4);
        drop(receiver);
        assert!(!notifier.is_connected());
        assert!(!notifier.notify(failure("a")));
        assert_eq!(notifier.dropped(), 0);
    }
}
