//! Scheduler job status.
//!
//! Job states: Submitted → Running → {Complete | Incomplete | Canceled}
//! with Cancelling as a transient pre-terminal state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Status of a job as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Accepted and waiting for a device
    Submitted,
    /// Executing on a device
    Running,
    /// Finished and all actions ran
    Complete,
    /// Finished with an infrastructure or job error
    Incomplete,
    /// Cancelled before it could finish
    Canceled,
    /// Cancellation requested, not yet effective
    Cancelling,
}

impl JobStatus {
    /// Statuses after which a job never changes again
    pub const TERMINAL: [JobStatus; 3] = [JobStatus::Complete, JobStatus::Incomplete, JobStatus::Canceled];

    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Terminal and successful
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Complete)
    }

    /// Terminal and unsuccessful
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Incomplete | JobStatus::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Submitted => "Submitted",
            JobStatus::Running => "Running",
            JobStatus::Complete => "Complete",
            JobStatus::Incomplete => "Incomplete",
            JobStatus::Canceled => "Canceled",
            JobStatus::Cancelling => "Cancelling",
        }
    }

    /// Map a `state`/`health` pair, as reported by newer schedulers.
    ///
    /// Only a `Finished` state carries its outcome in `health`; the
    /// queueing states all collapse to `Submitted`.
    pub fn from_state(state: &str, health: Option<&str>) -> Result<Self, ProtocolError> {
        match state.trim().to_ascii_lowercase().as_str() {
            "submitted" | "scheduling" | "scheduled" => Ok(JobStatus::Submitted),
            "running" => Ok(JobStatus::Running),
            "canceling" | "cancelling" => Ok(JobStatus::Cancelling),
            "finished" => match health {
                Some(health) => health.parse(),
                None => Err(ProtocolError::UnknownStatus("Finished without health".to_string())),
            },
            _ => Err(ProtocolError::UnknownStatus(state.to_string())),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = ProtocolError;

    /// Case-insensitive; accepts both spellings the scheduler has used for
    /// the cancel states.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submitted" => Ok(JobStatus::Submitted),
            "running" => Ok(JobStatus::Running),
            "complete" => Ok(JobStatus::Complete),
            "incomplete" => Ok(JobStatus::Incomplete),
            "canceled" | "cancelled" => Ok(JobStatus::Canceled),
            "cancelling" | "canceling" => Ok(JobStatus::Cancelling),
            _ => Err(ProtocolError::UnknownStatus(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_set() {
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Incomplete.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Cancelling.is_terminal());
    }

    #[test]
    fn test_cancelling_is_not_success() {
        assert!(!JobStatus::Cancelling.is_success());
        assert!(!JobStatus::Cancelling.is_failure());
        assert!(JobStatus::Canceled.is_failure());
    }

    #[test]
    fn test_parse_round_trips_display() {
        for status in [
            JobStatus::Submitted,
            JobStatus::Running,
            JobStatus::Complete,
            JobStatus::Incomplete,
            JobStatus::Canceled,
            JobStatus::Cancelling,
        ] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
    }

    #[test]
    fn test_parse_aliases_and_unknown() {
        assert_eq!("Cancelled".parse::<JobStatus>().unwrap(), JobStatus::Canceled);
        assert_eq!("Canceling".parse::<JobStatus>().unwrap(), JobStatus::Cancelling);
        assert_eq!(" complete ".parse::<JobStatus>().unwrap(), JobStatus::Complete);
        assert!(matches!(
            "Exploded".parse::<JobStatus>(),
            Err(ProtocolError::UnknownStatus(_))
        ));
    }

    #[test]
    fn test_state_health_mapping() {
        for state in ["Submitted", "Scheduling", "Scheduled"] {
            assert_eq!(
                JobStatus::from_state(state, Some("Unknown")).unwrap(),
                JobStatus::Submitted
            );
        }
        assert_eq!(JobStatus::from_state("Running", Some("Unknown")).unwrap(), JobStatus::Running);
        assert_eq!(
            JobStatus::from_state("Canceling", Some("Unknown")).unwrap(),
            JobStatus::Cancelling
        );
        assert_eq!(
            JobStatus::from_state("Finished", Some("Complete")).unwrap(),
            JobStatus::Complete
        );
        assert!(JobStatus::from_state("Finished", None).is_err());
        assert!(JobStatus::from_state("Exploded", None).is_err());
    }
}
