//! Engine event channel
//!
//! The orchestrator publishes job lifecycle events over a broadcast
//! channel; any number of subscribers (UI, API, logs) receive them.
//! Delivery is best-effort: a lagging subscriber loses old events rather
//! than stalling downloads.

use crate::job::{JobId, JobStatus};
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::broadcast;

/// Broadcast buffer; events beyond this are dropped for slow subscribers
const EVENT_BUFFER: usize = 1000;

/// Event emitted during a job's lifecycle
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Event {
    /// Periodic progress update (throttled) or status transition
    Progress {
        /// Job the event belongs to
        id: JobId,
        /// Display name of the job
        filename: String,
        /// Decoded bytes so far
        transferred_bytes: u64,
        /// Total expected bytes
        total_bytes: u64,
        /// Completion in [0, 1]
        percent: f64,
        /// Sliding average speed in bytes per second
        speed_bps: f64,
        /// Estimated seconds remaining, when the speed is meaningful
        eta_secs: Option<u64>,
        /// Job status at emission time
        status: JobStatus,
        /// Primary provider serving the job
        provider: String,
        /// Job save directory
        path: PathBuf,
    },

    /// Job reached `Completed`
    Completed {
        /// Job the event belongs to
        id: JobId,
        /// Display name of the job
        filename: String,
        /// Directory holding the assembled files
        save_path: PathBuf,
        /// Completion wall-clock time
        end_time: SystemTime,
        /// Total bytes downloaded
        total_bytes: u64,
    },

    /// Job reached `Failed`
    Failed {
        /// Job the event belongs to
        id: JobId,
        /// Concise human-readable reason
        reason: String,
    },
}

/// Publisher side of the event channel
#[derive(Debug, Clone)]
pub struct EventChannel {
    tx: broadcast::Sender<Event>,
}

impl EventChannel {
    /// Create a channel with the default buffer
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Subscribe; the receiver sees events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Emit to all current subscribers (no-op when there are none)
    pub fn emit(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribe_receives_events() {
        let channel = EventChannel::new();
        let mut rx = channel.subscribe();

        channel.emit(Event::Failed {
            id: JobId(1),
            reason: "test".to_string(),
        });

        match rx.recv().await.unwrap() {
            Event::Failed { id, reason } => {
                assert_eq!(id, JobId(1));
                assert_eq!(reason, "test");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_subscribers_is_ok() {
        let channel = EventChannel::new();
        channel.emit(Event::Failed {
            id: JobId(2),
            reason: "nobody listening".to_string(),
        });
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let channel = EventChannel::new();
        let mut rx1 = channel.subscribe();
        let mut rx2 = channel.subscribe();

        channel.emit(Event::Failed {
            id: JobId(3),
            reason: "x".to_string(),
        });

        assert!(matches!(rx1.recv().await.unwrap(), Event::Failed { .. }));
        assert!(matches!(rx2.recv().await.unwrap(), Event::Failed { .. }));
    }
}
