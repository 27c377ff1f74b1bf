//! The turn event channel.
//!
//! One sink per turn, single producer (the orchestrator and its stages),
//! any number of consumers. A consumer that disconnects or lags never
//! affects the producer; events within a turn stay FIFO.

use tokio::sync::broadcast;

use relay_types::{StageStatus, TurnEvent};

/// Channel capacity per turn. Slow consumers past this lag lose oldest
/// events; the terminal event is always the last one sent.
const EVENT_CAPACITY: usize = 256;

/// The per-turn event sink.
#[derive(Clone)]
pub struct EventSink {
    tx: broadcast::Sender<TurnEvent>,
}

impl EventSink {
    /// Create a sink and the first subscription.
    #[must_use]
    pub fn new() -> (Self, broadcast::Receiver<TurnEvent>) {
        let (tx, rx) = broadcast::channel(EVENT_CAPACITY);
        (Self { tx }, rx)
    }

    /// Subscribe another consumer.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.tx.subscribe()
    }

    /// Emit one event. Send failures mean no consumer is listening, which
    /// is fine — producers never block on consumers here.
    pub fn emit(&self, event: TurnEvent) {
        let _ = self.tx.send(event);
    }

    /// Emit a stage status transition.
    pub fn stage(&self, stage: &str, status: StageStatus, elapsed_ms: Option<u64>) {
        self.emit(TurnEvent::StageStatus {
            stage: stage.to_string(),
            status,
            elapsed_ms,
        });
    }

    /// Emit a warning event.
    pub fn warn(&self, kind: &str, message: impl Into<String>) {
        self.emit(TurnEvent::Warning {
            kind: kind.to_string(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::{FinishReason, TokenUsage};

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (sink, mut rx) = EventSink::new();
        sink.emit(TurnEvent::TextDelta { text: "a".into() });
        sink.emit(TurnEvent::TextDelta { text: "b".into() });
        sink.emit(TurnEvent::done(FinishReason::Stop, TokenUsage::default(), "m"));

        let mut texts = Vec::new();
        while let Ok(event) = rx.recv().await {
            match event {
                TurnEvent::TextDelta { text } => texts.push(text),
                TurnEvent::Done { .. } => break,
                _ => {}
            }
        }
        assert_eq!(texts, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn dropped_consumer_does_not_block_producer() {
        let (sink, rx) = EventSink::new();
        drop(rx);
        // No receiver: emit still succeeds.
        sink.emit(TurnEvent::TextDelta { text: "a".into() });
    }

    #[tokio::test]
    async fn multiple_consumers_see_the_same_events() {
        let (sink, mut rx1) = EventSink::new();
        let mut rx2 = sink.subscribe();
        sink.emit(TurnEvent::TextDelta { text: "x".into() });

        let a = rx1.recv().await.unwrap();
        let b = rx2.recv().await.unwrap();
        assert!(matches!(a, TurnEvent::TextDelta { ref text } if text == "x"));
        assert!(matches!(b, TurnEvent::TextDelta { ref text } if text == "x"));
    }
}
