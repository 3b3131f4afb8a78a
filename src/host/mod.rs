//! Scheduler-Side Components
//!
//! Talks to the scheduler over XML-RPC: validation, submission, status
//! polls and results reports. Waiting for submitted jobs is delegated to
//! [`crate::monitor`].

mod client;
mod results;
mod transport;

pub use client::{SchedulerClient, SchedulerError, Submission, SubmissionOutcome};
pub use results::{parse_report, ResultsSummary, TestOutcome, TestResult};
pub use transport::{RpcTransport, TransportError, XmlRpcTransport};
