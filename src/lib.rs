//! LAVA job client
//!
//! Submits hardware-in-the-loop test jobs to a LAVA scheduler: boot images
//! are uploaded to the artifact storage host, a job document is built from
//! a device/image/test request, the scheduler validates and queues it, and
//! the job event feed is watched until every sub-job reaches a terminal
//! state.

pub mod artifact;
pub mod config;
pub mod document;
pub mod failure;
pub mod host;
pub mod job;
pub mod mock;
pub mod monitor;
pub mod pipeline;
pub mod timeout;

pub use artifact::{ArtifactStore, ImageMetadata, RemoteFs, StoreError};
pub use config::{Config, ConfigError, SchedulerSettings, StorageSettings};
pub use document::{BuildError, BuiltinTemplates, DocumentError, JobDocument, JobDocumentBuilder};
pub use failure::{ExitCode, FailureKind};
pub use host::{SchedulerClient, SchedulerError, Submission, SubmissionOutcome};
pub use job::{ImageSource, JobError, JobRequest, TestSpec};
pub use monitor::{JobMonitor, WaitOutcome, WaitPolicy};
pub use timeout::{Deadline, TimeoutConfig};
