//! Download job model and state machine

use crate::nzb::NzbFile;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Job lifecycle state
///
/// Forward path: `Queued → Downloading → Assembling → Repairing →
/// (Extracting) → Completed`. `Paused` is only reachable from
/// `Downloading` and returns there. `Failed` and `Cancelled` are terminal
/// sinks reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum JobStatus {
    /// Registered, fan-out not started
    Queued,
    /// Segments in flight
    Downloading,
    /// Paused by the caller; workers hold at their next polling point
    Paused,
    /// All segments arrived; writing output files
    Assembling,
    /// PAR2 verify/repair running
    Repairing,
    /// Archive extraction running
    Extracting,
    /// Finished successfully
    Completed,
    /// Permanent segment failure, assembly error, or repair failure
    Failed,
    /// Deleted by the caller; scratch cleanup still ran
    Cancelled,
}

impl JobStatus {
    /// Whether the job can never leave this state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Per-file segment completion
#[derive(Debug, Clone, Default)]
pub struct FileProgress {
    /// Segments decoded so far
    pub downloaded_segments: usize,
    /// Segments this file has in total
    pub total_segments: usize,
}

/// One NZB-driven download
#[derive(Debug)]
pub struct DownloadJob {
    /// Unique id
    pub id: JobId,
    /// Display name (the NZB filename without its suffix)
    pub name: String,
    /// Absolute save directory for this job
    pub save_path: PathBuf,
    /// Files to download, PAR2 entries already filtered out
    pub files: Vec<Arc<NzbFile>>,
    /// Total expected bytes across all segments
    pub total_bytes: u64,
    /// Total segment count
    pub total_segments: usize,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Decoded bytes accumulated (monotonic)
    pub downloaded_bytes: u64,
    /// Per-file completion, indexed like `files`
    pub file_progress: Vec<FileProgress>,
    /// When the job started downloading
    pub started_at: Instant,
    /// Run extraction after repair
    pub auto_extract: bool,
}

impl DownloadJob {
    /// Completion ratio in [0, 1]
    pub fn progress(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64).min(1.0)
    }

    /// Average download speed in bytes per second
    pub fn speed_bps(&self) -> f64 {
        let elapsed = self.started_at.elapsed();
        if elapsed.is_zero() {
            return 0.0;
        }
        self.downloaded_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimated time remaining, when the speed is meaningful
    pub fn eta(&self) -> Option<Duration> {
        let speed = self.speed_bps();
        if speed <= 0.0 || self.downloaded_bytes >= self.total_bytes {
            return None;
        }
        let remaining = (self.total_bytes - self.downloaded_bytes) as f64 / speed;
        Some(Duration::from_secs_f64(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(total_bytes: u64, downloaded: u64) -> DownloadJob {
        DownloadJob {
            id: JobId(1),
            name: "test".to_string(),
            save_path: PathBuf::from("/tmp/test"),
            files: vec![],
            total_bytes,
            total_segments: 0,
            status: JobStatus::Downloading,
            downloaded_bytes: downloaded,
            file_progress: vec![],
            started_at: Instant::now(),
            auto_extract: false,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(!JobStatus::Repairing.is_terminal());
    }

    #[test]
    fn test_progress_ratio() {
        assert_eq!(job(1000, 0).progress(), 0.0);
        assert_eq!(job(1000, 500).progress(), 0.5);
        assert_eq!(job(1000, 1000).progress(), 1.0);
        // Zero-byte jobs never divide by zero
        assert_eq!(job(0, 0).progress(), 0.0);
    }

    #[test]
    fn test_progress_clamped() {
        // yEnc metadata can make decoded bytes exceed the NZB estimate
        assert_eq!(job(1000, 1200).progress(), 1.0);
    }

    #[test]
    fn test_eta_none_when_done() {
        assert!(job(1000, 1000).eta().is_none());
    }

    #[test]
    fn test_job_id_display() {
        assert_eq!(JobId(42).to_string(), "job-42");
    }
}
