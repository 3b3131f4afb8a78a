//! In-Memory Fakes
//!
//! Stand-ins for the network collaborators, used by unit and integration
//! tests:
//!
//! - [`MockScheduler`]: answers the scheduler's XML-RPC methods and
//!   publishes scripted job events
//! - [`MockFeed`]: publish/subscribe event feed without replay
//! - [`MemoryRemote`]: storage host kept in memory
//!
//! Each fake supports failure injection through [`FailureConfig`].

mod failure;
mod feed;
mod remote;
mod scheduler;

pub use failure::{FailureConfig, FailureInjector, FailureMode};
pub use feed::{MockFeed, MockSubscription};
pub use remote::{MemoryRemote, RemoteOp};
pub use scheduler::MockScheduler;
