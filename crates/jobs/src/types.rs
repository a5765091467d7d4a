//! Job entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sketchforge_core::{JobId, OwnerId, Style};

/// Job execution status. Closed set; every persisted change goes through
/// [`Job::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted and in flight through the external transform.
    Processing,
    /// Output delivered; terminal.
    Completed,
    /// Transform (and fallback) failed, or the job was reaped; retryable.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed)
    }

    /// The single validity check for status changes.
    pub fn can_transition(self, to: JobStatus) -> bool {
        matches!(
            (self, to),
            (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
                | (JobStatus::Failed, JobStatus::Processing)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl core::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// A paid transformation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub style: Style,
    /// Reference to the submitted drawing (data URL or storage key).
    pub input_ref: String,
    /// Reference to the generated output; set on completion only.
    pub output_ref: Option<String>,
    pub status: JobStatus,
    /// Last failure message, if any.
    pub error: Option<String>,
    /// Result not yet viewed by the owner.
    pub unseen: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rejected status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

impl Job {
    /// New job, in flight and unseen.
    pub fn new(owner_id: OwnerId, style: Style, input_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            owner_id,
            style,
            input_ref: input_ref.into(),
            output_ref: None,
            status: JobStatus::Processing,
            error: None,
            unseen: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a status change, enforcing the state machine.
    pub fn transition(&mut self, to: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition(to) {
            return Err(InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = Utc::now();
        if to == JobStatus::Processing {
            // Re-entering via retry clears the previous failure.
            self.error = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new(OwnerId::new(), Style::Cartoon, "data:image/png;base64,AAAA")
    }

    #[test]
    fn happy_path_transitions() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Processing);
        job.transition(JobStatus::Completed).unwrap();
        assert_eq!(job.status, JobStatus::Completed);
    }

    #[test]
    fn completed_is_terminal() {
        let mut job = job();
        job.transition(JobStatus::Completed).unwrap();
        for to in [JobStatus::Processing, JobStatus::Failed, JobStatus::Completed] {
            assert!(job.transition(to).is_err(), "completed -> {to:?} must fail");
        }
    }

    #[test]
    fn failed_returns_to_processing_only() {
        let mut job = job();
        job.transition(JobStatus::Failed).unwrap();
        assert!(job.transition(JobStatus::Completed).is_err());

        job.error = Some("transform exploded".to_string());
        job.transition(JobStatus::Processing).unwrap();
        // Retry clears the stale failure message.
        assert_eq!(job.error, None);
    }

    #[test]
    fn self_transitions_rejected() {
        let mut job = job();
        assert!(job.transition(JobStatus::Processing).is_err());
    }
}
