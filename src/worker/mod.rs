//! Execution side of the resource.
//!
//! - [`JobExecutor`]: runs one `execute:` directive and captures its output
//! - [`LivenessMonitor`]: polls the server while a job runs and flags when
//!   the job has been withdrawn
//!
//! The controller owns both. A directive gets a child cancellation token
//! which the controller fires when the monitor goes inactive or the
//! resource shuts down.

pub mod executor;
pub mod liveness;

pub use executor::{ExecutionResult, JobExecutor};
pub use liveness::LivenessMonitor;
