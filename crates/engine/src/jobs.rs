//! Job model: the unit of work for one source file's processing attempt.
//!
//! A job's status only moves forward through the state machine; terminal
//! statuses are never revisited. An operator retry constructs a fresh job on
//! the next run instead of mutating a terminal one.

use crate::events::unix_millis;
use crate::scan::SourceFile;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Maximum retries after a hardware-capability rejection.
pub const MAX_HW_CAP_RETRIES: u32 = 2;

/// Delay before re-attempting a job after a hardware-capability rejection.
pub const HW_CAP_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Status of a job.
///
/// `Pending -> (MetadataReady | Skipped) -> Admitted -> Running ->
/// {Completed | Failed | HwCapLimit | Skipped}`. `HwCapLimit` is the only
/// status a job can leave again: it triggers a bounded retry back through
/// `Running` before settling on `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Job is created but not yet probed.
    Pending,
    /// Metadata extracted and processing parameters resolved.
    MetadataReady,
    /// Job holds a concurrency slot.
    Admitted,
    /// External encoder is running.
    Running,
    /// Job finished and the output is in place.
    Completed,
    /// Job failed; an error marker was written.
    Failed,
    /// The hardware rejected a new concurrent session; retry pending.
    HwCapLimit,
    /// Job was filtered out without consuming a concurrency slot.
    Skipped,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::MetadataReady => write!(f, "metadata_ready"),
            JobStatus::Admitted => write!(f, "admitted"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::HwCapLimit => write!(f, "hw_cap_limit"),
            JobStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl JobStatus {
    /// Check if the status is terminal (never revisited).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Skipped
        )
    }
}

/// An encoding job for one source file.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    /// The discovered source file this job processes.
    pub source: SourceFile,
    /// Current status.
    pub status: JobStatus,
    /// Resolved final output path (mirrors the input tree).
    pub output_path: PathBuf,
    /// Constant quality chosen by the decision engine.
    pub quality: u8,
    /// Rotation angle in degrees chosen by the decision engine.
    pub rotation: u16,
    /// Failure or skip reason, if any.
    pub error_reason: Option<String>,
    /// Unix timestamp (milliseconds) when the job was created.
    pub created_at: i64,
    /// Unix timestamp (milliseconds) when the job was last updated.
    pub updated_at: i64,
}

impl Job {
    /// Create a new pending job for a source file.
    pub fn new(source: SourceFile, output_path: PathBuf) -> Self {
        let now = unix_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            status: JobStatus::Pending,
            output_path,
            quality: 0,
            rotation: 0,
            error_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the job status and update the timestamp.
    pub fn set_status(&mut self, status: JobStatus) {
        self.status = status;
        self.updated_at = unix_millis();
    }

    /// Mark the job as failed with a reason.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error_reason = Some(reason.into());
        self.set_status(JobStatus::Failed);
    }

    /// Mark the job as skipped with a reason.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.error_reason = Some(reason.into());
        self.set_status(JobStatus::Skipped);
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// The source file's name for display and rotation matching.
    pub fn file_name(&self) -> String {
        self.source
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}
