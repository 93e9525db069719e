//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so external
//! observers (loggers, dashboards, tests) can follow workflow progress
//! without coupling to the engine internals.

use serde::{Deserialize, Serialize};

use tandem_types::{BranchStatus, GroupStatus, Platform};

/// Events emitted during a monitoring run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        run_id: uuid::Uuid,
        platforms: Vec<Platform>,
    },
    BranchStarted {
        platform: Platform,
    },
    StepStarted {
        platform: Platform,
        step: String,
    },
    StepCompleted {
        platform: Platform,
        step: String,
    },
    BranchCompleted {
        platform: Platform,
        status: BranchStatus,
    },
    BarrierReleased,
    ReportAggregated {
        overall_status: GroupStatus,
        partial: bool,
    },
    ArtifactRendered {
        path: std::path::PathBuf,
    },
    RunFailed {
        reason: String,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(RunEvent::BranchStarted {
            platform: Platform::Console,
        });

        let event = rx.recv().await.unwrap();
        match event {
            RunEvent::BranchStarted { platform } => assert_eq!(platform, Platform::Console),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(RunEvent::BarrierReleased);

        let e1 = rx1.recv().await.unwrap();
        let e2 = rx2.recv().await.unwrap();

        let json1 = serde_json::to_string(&e1).unwrap();
        let json2 = serde_json::to_string(&e2).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(RunEvent::RunFailed {
            reason: "both branches failed".into(),
        });
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = RunEvent::ReportAggregated {
            overall_status: GroupStatus::Failed,
            partial: true,
        };

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: RunEvent = serde_json::from_str(&json).unwrap();

        match deserialized {
            RunEvent::ReportAggregated {
                overall_status,
                partial,
            } => {
                assert_eq!(overall_status, GroupStatus::Failed);
                assert!(partial);
            }
            other => panic!("unexpected variant after round-trip: {:?}", other),
        }
    }
}
