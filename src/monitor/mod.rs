//! Job monitor
//!
//! Resolves the terminal status of one or more submitted jobs by listening
//! to the scheduler's event feed. The monitor never queries the scheduler;
//! it only consumes what the feed delivers, so it tolerates joining mid-stream
//! and never needs to see `Submitted` or `Running` before a terminal status.
//!
//! A job's status is the last one received for it, except that a terminal
//! status is never replaced by a non-terminal one. Messages that do not
//! decode and events for jobs outside the tracked set are skipped.

mod feed;

use std::collections::BTreeMap;

use lava_protocol::{CorrelationId, FeedMessage, JobEvent, JobStatus};

use crate::timeout::Deadline;

pub use feed::{EventFeed, FeedConnector, FeedError, ZmqConnector, ZmqFeed};

/// Messages still drained after the deadline has passed
const DRAIN_LIMIT: usize = 4096;

/// When a wait stops after a job failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Keep waiting until every job is terminal or the deadline passes
    #[default]
    FullResolution,
    /// Return as soon as any job fails
    FailFast,
}

/// Aggregate result of a wait
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Every job completed
    Success,
    /// At least one job ended as Incomplete or Canceled
    JobFailed {
        failed: Vec<(CorrelationId, JobStatus)>,
        /// Jobs without a terminal status when the wait ended
        pending: Vec<CorrelationId>,
    },
    /// The deadline passed with jobs unresolved and none failed
    TimedOut { pending: Vec<CorrelationId> },
}

impl WaitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, WaitOutcome::Success)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, WaitOutcome::TimedOut { .. })
    }
}

/// Single-subscription monitor
///
/// One monitor serves one wait at a time; `wait_for` takes `&mut self`.
pub struct JobMonitor {
    feed: Box<dyn EventFeed>,
    policy: WaitPolicy,
    statuses: BTreeMap<CorrelationId, Option<JobStatus>>,
}

impl JobMonitor {
    pub fn new(feed: Box<dyn EventFeed>) -> Self {
        Self {
            feed,
            policy: WaitPolicy::default(),
            statuses: BTreeMap::new(),
        }
    }

    /// Open the subscription now so that no event published after this call
    /// is missed.
    pub fn subscribe(connector: &dyn FeedConnector, endpoint: &str) -> Result<Self, FeedError> {
        Ok(Self::new(connector.subscribe(endpoint)?))
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    /// Wait until every id is terminal or `deadline` passes.
    ///
    /// Messages already buffered when the deadline passes are still
    /// applied, so a wait with an expired deadline reports jobs that had
    /// finished by the time of the call. A closed feed is an error; an
    /// elapsed deadline is not.
    pub fn wait_for(&mut self, ids: &[CorrelationId], deadline: Deadline) -> Result<WaitOutcome, FeedError> {
        self.statuses = ids.iter().map(|id| (*id, None)).collect();
        tracing::info!(
            jobs = ?self.statuses.keys().map(CorrelationId::get).collect::<Vec<_>>(),
            timeout_secs = deadline.budget().as_secs(),
            "waiting for jobs"
        );

        let mut drained = 0;
        while !self.is_resolved() {
            if self.policy == WaitPolicy::FailFast && self.has_failure() {
                tracing::debug!("job failed, not waiting for the rest");
                break;
            }

            let expired = deadline.is_expired();
            if expired && drained >= DRAIN_LIMIT {
                break;
            }

            match self.feed.next_message(deadline.remaining())? {
                Some(message) => {
                    self.apply(&message);
                    if expired {
                        drained += 1;
                    }
                }
                None if deadline.is_expired() => break,
                None => {}
            }
        }

        let outcome = self.outcome();
        match &outcome {
            WaitOutcome::Success => tracing::info!(
                elapsed_ms = deadline.elapsed().as_millis() as u64,
                "all jobs complete"
            ),
            WaitOutcome::JobFailed { failed, pending } => tracing::warn!(
                failed = ?failed,
                pending = pending.len(),
                "job failed"
            ),
            WaitOutcome::TimedOut { pending } => tracing::warn!(
                pending = ?pending.iter().map(CorrelationId::get).collect::<Vec<_>>(),
                "timed out waiting for jobs"
            ),
        }
        Ok(outcome)
    }

    /// Last status seen per tracked job
    pub fn statuses(&self) -> &BTreeMap<CorrelationId, Option<JobStatus>> {
        &self.statuses
    }

    fn apply(&mut self, message: &FeedMessage) {
        let event = match JobEvent::decode(message) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(error = %e, topic = ?message.topic(), "skipping feed message");
                return;
            }
        };

        let Some(current) = self.statuses.get_mut(&event.job) else {
            tracing::trace!(job_id = %event.job, status = %event.status, "untracked job");
            return;
        };

        match *current {
            Some(previous) if previous.is_terminal() && !event.status.is_terminal() => {
                tracing::debug!(
                    job_id = %event.job,
                    status = %event.status,
                    terminal = %previous,
                    "ignoring status after terminal"
                );
            }
            Some(previous) if previous == event.status => {}
            _ => {
                tracing::debug!(job_id = %event.job, status = %event.status, "job status");
                if event.status.is_terminal() {
                    tracing::info!(job_id = %event.job, status = %event.status, "job finished");
                }
                *current = Some(event.status);
            }
        }
    }

    fn is_resolved(&self) -> bool {
        self.statuses
            .values()
            .all(|status| status.map_or(false, |s| s.is_terminal()))
    }

    fn has_failure(&self) -> bool {
        self.statuses
            .values()
            .any(|status| status.map_or(false, |s| s.is_failure()))
    }

    fn outcome(&self) -> WaitOutcome {
        let failed: Vec<(CorrelationId, JobStatus)> = self
            .statuses
            .iter()
            .filter_map(|(id, status)| status.filter(JobStatus::is_failure).map(|s| (*id, s)))
            .collect();
        let pending: Vec<CorrelationId> = self
            .statuses
            .iter()
            .filter(|(_, status)| !status.map_or(false, |s| s.is_terminal()))
            .map(|(id, _)| *id)
            .collect();

        if !failed.is_empty() {
            WaitOutcome::JobFailed { failed, pending }
        } else if !pending.is_empty() {
            WaitOutcome::TimedOut { pending }
        } else {
            WaitOutcome::Success
        }
    }
}
