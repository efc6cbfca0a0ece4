//! Persist-then-emit pub/sub (SPEC_FULL §4.11, C11, P10).
//!
//! One broadcast channel carries every topic; subscribers apply their own
//! scope filter on [`Topic`] rather than each topic getting its own channel,
//! matching the "lazy sequence, subscriber filters" contract in the spec.
//! A lagging subscriber silently drops the events it fell behind on — the
//! bus never blocks a publisher waiting for a slow reader.

use std::future::Future;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::PersistenceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    Global,
    User(Uuid),
    UserBroker(Uuid),
}

#[derive(Debug, Clone)]
pub struct Event {
    pub topic: Topic,
    /// Bounded-cardinality event name, e.g. `SIGNAL_PUBLISHED`, `ORDER_TIMEOUT`.
    pub kind: &'static str,
    pub payload: serde_json::Value,
}

pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Persists `event` via `persist`, then enqueues it. If persistence
    /// fails, the event is never enqueued (P10): no subscriber observes it.
    pub async fn emit<F>(&self, event: Event, persist: F) -> Result<(), PersistenceError>
    where
        F: Future<Output = Result<(), PersistenceError>>,
    {
        persist.await?;
        self.publish(event);
        Ok(())
    }

    /// Enqueues an ephemeral event (ticks, partial candles) with no
    /// persistence step. At-most-once: a lagging subscriber misses it.
    pub fn emit_ephemeral(&self, event: Event) {
        self.publish(event);
    }

    fn publish(&self, event: Event) {
        // `send` returns Err only when there are zero subscribers; that is
        // not a failure condition for a bus nobody is listening to yet.
        let _ = self.tx.send(event);
    }
}

/// Returns true if `event.topic` is visible to a subscriber scoped to
/// `scope` (GLOBAL is visible to everyone).
pub fn topic_matches(event_topic: Topic, scope: Topic) -> bool {
    match (event_topic, scope) {
        (Topic::Global, _) => true,
        (Topic::User(a), Topic::User(b)) => a == b,
        (Topic::UserBroker(a), Topic::UserBroker(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;

    #[tokio::test]
    async fn persist_failure_prevents_emission() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let event = Event { topic: Topic::Global, kind: "SIGNAL_PUBLISHED", payload: serde_json::json!({}) };

        let result = bus
            .emit(event, async {
                Err(PersistenceError::StateMachineViolation {
                    trade_id: Uuid::nil(),
                    from: "X".into(),
                    to: "Y".into(),
                })
            })
            .await;

        assert!(result.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn successful_persist_emits_to_subscriber() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let event = Event { topic: Topic::Global, kind: "SIGNAL_PUBLISHED", payload: serde_json::json!({}) };

        bus.emit(event, async { Ok(()) }).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.kind, "SIGNAL_PUBLISHED");
    }

    #[test]
    fn topic_scoping() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        assert!(topic_matches(Topic::Global, Topic::User(u1)));
        assert!(topic_matches(Topic::User(u1), Topic::User(u1)));
        assert!(!topic_matches(Topic::User(u1), Topic::User(u2)));
    }
}
