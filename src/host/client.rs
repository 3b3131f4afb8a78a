//! Scheduler client
//!
//! Validates and submits job documents, queries job status and fetches
//! results reports. A blocking submission subscribes to the event feed
//! before the job is submitted, hands the returned ids to a [`JobMonitor`]
//! and, once every job completed, requires every test in every results
//! report to have passed.

use std::sync::Arc;

use lava_protocol::{
    methods, CorrelationId, JobStatus, MethodResponse, ProtocolError, SchedulerJobId, Value,
};

use super::results::{parse_report, ResultsSummary, TestResult};
use super::transport::{RpcTransport, TransportError, XmlRpcTransport};
use crate::config::{Config, ConfigError, SchedulerSettings};
use crate::document::{DocumentError, JobDocument};
use crate::monitor::{FeedConnector, FeedError, JobMonitor, WaitOutcome, WaitPolicy, ZmqConnector};
use crate::timeout::Deadline;

/// Scheduler client errors
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("cannot reach scheduler: {0}")]
    Connection(String),

    #[error("submission failed: {0}")]
    Submission(String),

    #[error("{method} failed: {message} ({code})")]
    Fault {
        method: String,
        code: i64,
        message: String,
    },

    #[error("unexpected scheduler response: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("event feed: {0}")]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Document(#[from] DocumentError),
}

impl From<TransportError> for SchedulerError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Protocol(e) => SchedulerError::Protocol(e),
            other => SchedulerError::Connection(other.to_string()),
        }
    }
}

/// How a submission ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Submitted without waiting
    Accepted,
    /// Every job completed and every test passed
    Passed {
        results: Vec<TestResult>,
        summary: ResultsSummary,
    },
    /// Every job completed but some test did not pass
    TestsFailed {
        results: Vec<TestResult>,
        summary: ResultsSummary,
    },
    /// A job ended Incomplete or Canceled
    JobsFailed(WaitOutcome),
    /// The wait deadline passed
    TimedOut(WaitOutcome),
}

/// Result of [`SchedulerClient::submit`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub ids: Vec<SchedulerJobId>,
    pub outcome: SubmissionOutcome,
}

impl Submission {
    pub fn succeeded(&self) -> bool {
        matches!(
            self.outcome,
            SubmissionOutcome::Accepted | SubmissionOutcome::Passed { .. }
        )
    }

    /// Numeric ids of the sub-jobs, as used in events and job URLs
    pub fn correlation_ids(&self) -> Vec<CorrelationId> {
        self.ids.iter().map(SchedulerJobId::correlation).collect()
    }
}

/// Client for one scheduler
pub struct SchedulerClient {
    settings: SchedulerSettings,
    transport: Arc<dyn RpcTransport>,
    feeds: Arc<dyn FeedConnector>,
    policy: WaitPolicy,
    version: String,
}

impl std::fmt::Debug for SchedulerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchedulerClient")
            .field("settings", &self.settings)
            .field("policy", &self.policy)
            .field("version", &self.version)
            .finish()
    }
}

impl SchedulerClient {
    /// Connect using the configuration.
    ///
    /// Environment variables fill parameters the configuration leaves unset.
    /// Missing parameters are reported before any network access.
    pub fn connect(config: &Config) -> Result<Self, SchedulerError> {
        let config = config.clone().with_env(|var| std::env::var(var).ok());
        let settings = SchedulerSettings::from_config(&config)?;
        let transport = XmlRpcTransport::new(&settings)?;
        let feeds = ZmqConnector::new(settings.timeouts.connect_timeout());
        Self::with_transport(settings, Arc::new(transport), Arc::new(feeds))
    }

    /// Connect over the given transport and feed connector
    pub fn with_transport(
        settings: SchedulerSettings,
        transport: Arc<dyn RpcTransport>,
        feeds: Arc<dyn FeedConnector>,
    ) -> Result<Self, SchedulerError> {
        tracing::debug!(url = %settings.rpc_url(), "scheduler XML-RPC endpoint");
        let version = match transport.call(methods::SYSTEM_VERSION, &[]) {
            Ok(MethodResponse::Success(value)) => version_string(&value),
            Ok(MethodResponse::Fault(fault)) => {
                tracing::error!(code = fault.code, message = %fault.message, "scheduler handshake rejected");
                return Err(SchedulerError::Connection(format!(
                    "handshake rejected: {} ({})",
                    fault.message, fault.code
                )));
            }
            Err(e) => {
                tracing::error!(error = %e, "error while connecting to scheduler");
                return Err(SchedulerError::Connection(e.to_string()));
            }
        };
        tracing::debug!(version = %version, "connected to scheduler");

        Ok(Self {
            settings,
            transport,
            feeds,
            policy: WaitPolicy::default(),
            version,
        })
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Version reported by the handshake
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Ask the scheduler whether it accepts the document.
    ///
    /// A rejection is `Ok(false)`; only transport failures are errors.
    pub fn validate(&self, document: &JobDocument) -> Result<bool, SchedulerError> {
        let text = document.serialize()?;
        match self.transport.call(methods::VALIDATE, &[Value::String(text)])? {
            MethodResponse::Success(_) => {
                tracing::debug!("job definition validated");
                Ok(true)
            }
            MethodResponse::Fault(fault) => {
                tracing::error!(code = fault.code, message = %fault.message, "job validation error");
                Ok(false)
            }
        }
    }

    /// Submit a document, optionally waiting for the jobs to finish
    pub fn submit(&self, document: &JobDocument, wait: bool) -> Result<Submission, SchedulerError> {
        let text = document.serialize()?;

        // Subscribe first: events published between submit and subscribe
        // would be lost
        let monitor = if wait {
            let monitor = JobMonitor::subscribe(self.feeds.as_ref(), &self.settings.publisher_endpoint())?;
            Some(monitor.with_policy(self.policy))
        } else {
            None
        };

        let value = self.expect_value(methods::SUBMIT_JOB, &[Value::String(text)])?;
        let ids = SchedulerJobId::from_submit_response(&value)?;
        if ids.is_empty() {
            tracing::error!("error at submitting the job");
            return Err(SchedulerError::Submission(
                "scheduler returned no job id".to_string(),
            ));
        }

        let ids_text: Vec<&str> = ids.iter().map(SchedulerJobId::as_str).collect();
        tracing::info!(ids = ?ids_text, "successfully submitted job");
        for id in &ids {
            tracing::info!(job_id = %id, url = %self.settings.job_url(id.correlation()), "job output");
        }

        let Some(mut monitor) = monitor else {
            return Ok(Submission {
                ids,
                outcome: SubmissionOutcome::Accepted,
            });
        };

        let correlation: Vec<CorrelationId> = ids.iter().map(SchedulerJobId::correlation).collect();
        let deadline = Deadline::after(self.settings.job_timeout());
        let outcome = match monitor.wait_for(&correlation, deadline)? {
            WaitOutcome::Success => self.check_results(&correlation)?,
            failed @ WaitOutcome::JobFailed { .. } => SubmissionOutcome::JobsFailed(failed),
            timed_out @ WaitOutcome::TimedOut { .. } => SubmissionOutcome::TimedOut(timed_out),
        };
        Ok(Submission { ids, outcome })
    }

    /// Current status of a job, polled from the scheduler
    pub fn status(&self, job: CorrelationId) -> Result<JobStatus, SchedulerError> {
        let value = self.expect_value(methods::JOB_STATUS, &[Value::String(job.to_string())])?;
        let field = |name: &str| value.get(name).and_then(Value::as_str);

        let status = match (field("job_status"), field("job_state")) {
            (Some(status), _) => status.parse::<JobStatus>()?,
            (None, Some(state)) => JobStatus::from_state(state, field("job_health"))?,
            (None, None) => {
                return Err(SchedulerError::Protocol(ProtocolError::Unexpected(format!(
                    "job_status reply without a status: {:?}",
                    value
                ))))
            }
        };
        tracing::debug!(job_id = %job, status = %status, "job status");
        Ok(status)
    }

    /// Results report of one job
    pub fn fetch_results(&self, job: CorrelationId) -> Result<Vec<TestResult>, SchedulerError> {
        let value = self.expect_value(methods::RESULTS_YAML, &[Value::String(job.to_string())])?;
        let text = value.as_str().ok_or_else(|| {
            ProtocolError::Unexpected(format!("results report is a {}", value.type_name()))
        })?;
        let results = parse_report(text)
            .map_err(|e| ProtocolError::Unexpected(format!("malformed results report: {}", e)))?;
        tracing::debug!(job_id = %job, tests = results.len(), "fetched results");
        Ok(results)
    }

    fn check_results(&self, jobs: &[CorrelationId]) -> Result<SubmissionOutcome, SchedulerError> {
        let mut results = Vec::new();
        for job in jobs {
            results.extend(self.fetch_results(*job)?);
        }

        let summary = ResultsSummary::from_results(&results);
        tracing::info!(passed = summary.passed, "PASSED");
        tracing::info!(failed = summary.failed, "FAILED");
        if summary.skipped > 0 {
            tracing::info!(skipped = summary.skipped, "SKIPPED");
        }

        if summary.all_passed() {
            Ok(SubmissionOutcome::Passed { results, summary })
        } else {
            Ok(SubmissionOutcome::TestsFailed { results, summary })
        }
    }

    fn expect_value(&self, method: &str, params: &[Value]) -> Result<Value, SchedulerError> {
        match self.transport.call(method, params)? {
            MethodResponse::Success(value) => Ok(value),
            MethodResponse::Fault(fault) => {
                tracing::error!(method = %method, code = fault.code, message = %fault.message, "scheduler fault");
                Err(SchedulerError::Fault {
                    method: method.to_string(),
                    code: fault.code,
                    message: fault.message,
                })
            }
        }
    }
}

fn version_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        other => format!("{:?}", other),
    }
}
