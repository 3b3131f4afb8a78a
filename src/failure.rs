//! Failure taxonomy and stable exit codes

use serde::{Deserialize, Serialize};

use crate::artifact::StoreError;
use crate::config::ConfigError;
use crate::document::{BuildError, DocumentError};
use crate::host::{SchedulerError, Submission, SubmissionOutcome};
use crate::job::JobError;

/// Failure kind - categorizes the cause of failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Missing or invalid configuration parameter
    Configuration,
    /// Scheduler, feed or storage host unreachable
    Connection,
    /// Scheduler refused or mangled the submission
    Submission,
    /// A job ended Incomplete/Canceled or a test did not pass
    JobFailed,
    /// Jobs still running at the deadline
    Timeout,
    /// Bad request, document or local file
    LocalValidation,
    /// Artifact storage failure
    Storage,
}

impl FailureKind {
    /// Get the stable exit code for this failure kind
    pub fn exit_code(&self) -> ExitCode {
        match self {
            FailureKind::Configuration => ExitCode::Configuration,
            FailureKind::Connection => ExitCode::Connection,
            FailureKind::Submission => ExitCode::Submission,
            FailureKind::JobFailed => ExitCode::JobFailed,
            FailureKind::Timeout => ExitCode::Timeout,
            FailureKind::LocalValidation => ExitCode::LocalValidation,
            FailureKind::Storage => ExitCode::Storage,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            FailureKind::Configuration => "Configuration error",
            FailureKind::Connection => "Connection failed",
            FailureKind::Submission => "Job submission failed",
            FailureKind::JobFailed => "Job failed",
            FailureKind::Timeout => "Timed out waiting for jobs",
            FailureKind::LocalValidation => "Invalid input",
            FailureKind::Storage => "Artifact storage failed",
        }
    }
}

/// Stable exit codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Configuration = 10,
    Connection = 20,
    Submission = 30,
    JobFailed = 40,
    Timeout = 50,
    LocalValidation = 60,
    Storage = 70,
}

impl ExitCode {
    pub fn as_i32(&self) -> i32 {
        *self as i32
    }
}

impl ConfigError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::Configuration
    }
}

impl JobError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::LocalValidation
    }
}

impl DocumentError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::LocalValidation
    }
}

impl BuildError {
    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::LocalValidation
    }
}

impl StoreError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            StoreError::Connection(_) => FailureKind::Connection,
            StoreError::MissingLocalFile(_) => FailureKind::LocalValidation,
            StoreError::NotFound(_)
            | StoreError::Format { .. }
            | StoreError::Io(_)
            | StoreError::Remote(_) => FailureKind::Storage,
        }
    }
}

impl SchedulerError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            SchedulerError::Configuration(_) => FailureKind::Configuration,
            SchedulerError::Connection(_) | SchedulerError::Feed(_) => FailureKind::Connection,
            SchedulerError::Submission(_)
            | SchedulerError::Fault { .. }
            | SchedulerError::Protocol(_) => FailureKind::Submission,
            SchedulerError::Document(_) => FailureKind::LocalValidation,
        }
    }
}

impl Submission {
    /// Why the submission did not succeed, if it did not
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            SubmissionOutcome::Accepted | SubmissionOutcome::Passed { .. } => None,
            SubmissionOutcome::TestsFailed { .. } | SubmissionOutcome::JobsFailed(_) => {
                Some(FailureKind::JobFailed)
            }
            SubmissionOutcome::TimedOut(_) => Some(FailureKind::Timeout),
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        self.failure_kind()
            .map_or(ExitCode::Success, |kind| kind.exit_code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{FeedError, WaitOutcome};
    use lava_protocol::SchedulerJobId;

    #[test]
    fn test_exit_codes_are_stable() {
        assert_eq!(FailureKind::Configuration.exit_code().as_i32(), 10);
        assert_eq!(FailureKind::Connection.exit_code().as_i32(), 20);
        assert_eq!(FailureKind::Submission.exit_code().as_i32(), 30);
        assert_eq!(FailureKind::JobFailed.exit_code().as_i32(), 40);
        assert_eq!(FailureKind::Timeout.exit_code().as_i32(), 50);
        assert_eq!(FailureKind::LocalValidation.exit_code().as_i32(), 60);
        assert_eq!(FailureKind::Storage.exit_code().as_i32(), 70);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            SchedulerError::Feed(FeedError::Closed).failure_kind(),
            FailureKind::Connection
        );
        assert_eq!(
            SchedulerError::Configuration(ConfigError::Missing("lava.server.host".into())).failure_kind(),
            FailureKind::Configuration
        );
        assert_eq!(
            StoreError::MissingLocalFile("/x".into()).failure_kind(),
            FailureKind::LocalValidation
        );
        assert_eq!(StoreError::NotFound("img".into()).failure_kind(), FailureKind::Storage);
    }

    #[test]
    fn test_submission_exit_codes() {
        let ids = vec![SchedulerJobId::new("1").unwrap()];
        let accepted = Submission {
            ids: ids.clone(),
            outcome: SubmissionOutcome::Accepted,
        };
        assert_eq!(accepted.exit_code(), ExitCode::Success);

        let timed_out = Submission {
            ids,
            outcome: SubmissionOutcome::TimedOut(WaitOutcome::TimedOut { pending: vec![] }),
        };
        assert_eq!(timed_out.failure_kind(), Some(FailureKind::Timeout));
        assert_eq!(timed_out.exit_code().as_i32(), 50);
    }
}
