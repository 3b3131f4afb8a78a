//! LAVA Protocol Types
//!
//! Defines the wire-level pieces shared by the scheduler client and the
//! event-feed monitor: the XML-RPC value model and codec, job statuses,
//! scheduler job identifiers and decoded feed events.

pub mod error;
pub mod event;
pub mod job_id;
pub mod status;
pub mod value;
pub mod xmlrpc;

pub use error::ProtocolError;
pub use event::{FeedMessage, JobEvent};
pub use job_id::{CorrelationId, SchedulerJobId};
pub use status::JobStatus;
pub use value::Value;
pub use xmlrpc::{decode_response, encode_call, Fault, MethodResponse};

/// Remote method names used by the client.
pub mod methods {
    pub const SYSTEM_VERSION: &str = "system.version";
    pub const VALIDATE: &str = "scheduler.validate_yaml";
    pub const SUBMIT_JOB: &str = "scheduler.submit_job";
    pub const JOB_STATUS: &str = "scheduler.job_status";
    pub const RESULTS_YAML: &str = "results.get_testjob_results_yaml";
}

/// Path of the XML-RPC endpoint on the scheduler host.
pub const RPC_PATH: &str = "RPC2";
