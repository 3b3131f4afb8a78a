//! Job wait timeouts
//!
//! A wait is bounded by an absolute [`Deadline`] on the monotonic clock.
//! The deadline is fixed when the wait starts and every blocking receive is
//! limited to the time remaining, so a slow feed can never stretch a wait.

use std::time::{Duration, Instant};

/// Maximum job wait accepted from configuration (7 days)
const MAX_JOB_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Maximum connect timeout accepted from configuration
const MAX_CONNECT_SECONDS: u64 = 300;

/// Timeout configuration for scheduler interactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// How long a blocking submission waits for its jobs (default 3600s)
    pub job_seconds: u64,
    /// Connect timeout for RPC and storage sessions (default 30s)
    pub connect_timeout_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            job_seconds: 3600,
            connect_timeout_seconds: 30,
        }
    }
}

/// Validation errors for timeout configuration
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TimeoutValidationError {
    #[error("job timeout must be at most {max} seconds, got {value}")]
    JobOutOfBounds { value: u64, max: u64 },

    #[error("connect timeout must be between 1 and {max} seconds, got {value}")]
    ConnectOutOfBounds { value: u64, max: u64 },
}

impl TimeoutConfig {
    /// Build from optional configuration values, falling back to defaults
    pub fn from_config(job_seconds: Option<u64>, connect_timeout_seconds: Option<u64>) -> Self {
        let defaults = Self::default();
        Self {
            job_seconds: job_seconds.unwrap_or(defaults.job_seconds),
            connect_timeout_seconds: connect_timeout_seconds
                .unwrap_or(defaults.connect_timeout_seconds),
        }
    }

    /// A zero job timeout is valid: it means "report what is already known".
    pub fn validate(&self) -> Result<(), TimeoutValidationError> {
        if self.job_seconds > MAX_JOB_SECONDS {
            return Err(TimeoutValidationError::JobOutOfBounds {
                value: self.job_seconds,
                max: MAX_JOB_SECONDS,
            });
        }
        if self.connect_timeout_seconds == 0 || self.connect_timeout_seconds > MAX_CONNECT_SECONDS
        {
            return Err(TimeoutValidationError::ConnectOutOfBounds {
                value: self.connect_timeout_seconds,
                max: MAX_CONNECT_SECONDS,
            });
        }
        Ok(())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }
}

/// Absolute point in monotonic time after which a wait gives up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Instant,
    at: Instant,
}

impl Deadline {
    /// Deadline `budget` from now
    pub fn after(budget: Duration) -> Self {
        let started = Instant::now();
        // Saturate absurd budgets instead of overflowing the clock
        let at = started
            .checked_add(budget)
            .unwrap_or_else(|| started + Duration::from_secs(MAX_JOB_SECONDS));
        Self { started, at }
    }

    /// Deadline that has already elapsed
    pub fn immediate() -> Self {
        Self::after(Duration::ZERO)
    }

    /// Time left before expiry, zero once expired
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Time since the deadline was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Total budget the deadline was created with
    pub fn budget(&self) -> Duration {
        self.at.saturating_duration_since(self.started)
    }
}
