// Progress Events
//
// Concept: Broadcast pipeline progress to any number of observers
// Synchronization: tokio broadcast channel; sending never blocks and a missing
// receiver is not an error

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// Events emitted during build, edit and ask
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    BuildStarted {
        session_id: Uuid,
        sources: usize,
        input_mode: String,
    },

    /// Unusable adapter record skipped during normalization
    EvidenceDropped {
        session_id: Uuid,
        source_id: String,
        record: usize,
        error: String,
    },

    /// Normalization and alignment done
    TimelineAligned {
        session_id: Uuid,
        items: usize,
        dropped: usize,
    },

    UnitsPlanned {
        session_id: Uuid,
        total_units: usize,
    },

    UnitStarted {
        session_id: Uuid,
        unit_index: usize,
        total_units: usize,
    },

    UnitRetrying {
        session_id: Uuid,
        unit_index: usize,
        attempt: u32,
        reason: String,
    },

    UnitValidated {
        session_id: Uuid,
        unit_index: usize,
        attempts: u32,
    },

    /// Unit replaced by a placeholder
    UnitFailed {
        session_id: Uuid,
        unit_index: usize,
        error: String,
    },

    BuildCompleted {
        session_id: Uuid,
        total_units: usize,
        failed_units: usize,
        duration_ms: u64,
    },

    BuildFailed {
        session_id: Uuid,
        error: String,
    },

    EditApplied {
        session_id: Uuid,
        unit_index: usize,
    },

    EditRejected {
        session_id: Uuid,
        error: String,
    },
}

/// Sender side of the event channel
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Send an event; returns false when nobody is listening
    pub fn emit(&self, event: PipelineEvent) -> bool {
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(receivers, "Pipeline event broadcast");
                true
            }
            Err(broadcast::error::SendError(event)) => {
                debug!("No receivers for pipeline event: {:?}", event);
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let session_id = Uuid::new_v4();

        assert!(bus.emit(PipelineEvent::UnitsPlanned {
            session_id,
            total_units: 3
        }));

        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::UnitsPlanned {
                session_id,
                total_units: 3
            }
        );
    }

    #[test]
    fn test_emit_without_receivers_is_not_an_error() {
        let bus = EventBus::default();
        assert!(!bus.emit(PipelineEvent::BuildFailed {
            session_id: Uuid::nil(),
            error: "x".into()
        }));
    }

    #[test]
    fn test_serialized_with_type_tag() {
        let json = serde_json::to_value(PipelineEvent::UnitFailed {
            session_id: Uuid::nil(),
            unit_index: 1,
            error: "timeout".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "unit_failed");
        assert_eq!(json["unit_index"], 1);
    }
}
