//! Job code contract and everything a job needs at runtime.
//!
//! A job is a named implementation of [`Job`] created by a factory in the
//! [`JobRegistry`]. It owns a [`JobContext`] holding its identity, captured
//! output and open remote files. Jobs that want to survive interruption
//! expose their progress through [`Job::state`]/[`Job::load_state`] and call
//! [`Job::checkpoint`] at convenient points.

pub mod context;
pub mod descriptor;
pub mod registry;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::checkpoint::CheckpointManager;
use crate::error::{render_chain, Result};

pub use context::{FileId, JobContext, JobInfo};
pub use descriptor::{ExecuteDirective, JobDescriptor, OutputTargets};
pub use registry::{JobFactory, JobRegistry};

/// How a directive (and in the end a whole job) finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Ok,
    Error,
    /// The server withdrew the job while it was running
    ServerInterrupted,
}

impl ExitClass {
    /// Exit code reported to the server.
    pub fn code(self) -> i32 {
        match self {
            ExitClass::Ok => 0,
            ExitClass::Error => 1,
            ExitClass::ServerInterrupted => 2,
        }
    }

    pub fn is_ok(self) -> bool {
        self == ExitClass::Ok
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitClass::Ok => write!(f, "ok"),
            ExitClass::Error => write!(f, "error"),
            ExitClass::ServerInterrupted => write!(f, "server_interrupted"),
        }
    }
}

/// User job code.
///
/// Only `context`, `context_mut` and `main` are required. Jobs that
/// checkpoint override `state` and `load_state`; a restored job gets `main`
/// called again with the original arguments and must pick up from the
/// loaded state.
///
/// Job code is interrupted cooperatively: it must either poll
/// [`JobContext::is_cancelled`] or do its I/O through remote files, which
/// fail once the job is cancelled.
#[async_trait]
pub trait Job: Send {
    fn context(&self) -> &JobContext;

    fn context_mut(&mut self) -> &mut JobContext;

    /// Entry point.
    async fn main(&mut self, args: &[String]) -> Result<()>;

    /// Serializable progress of the job.
    fn state(&self) -> Result<Value> {
        Ok(Value::Null)
    }

    fn load_state(&mut self, _state: Value) -> Result<()> {
        Ok(())
    }

    fn stdout(&self) -> &str {
        self.context().stdout()
    }

    fn stderr(&self) -> &str {
        self.context().stderr()
    }

    fn set_info(&mut self, info: JobInfo) {
        self.context_mut().set_info(info);
    }

    /// Rebind restored files to the current io-session and put the
    /// checkpointed file contents back in place.
    async fn restore_checkpointed_files(&mut self) -> bool {
        match CheckpointManager::restore_files(self.context_mut()).await {
            Ok(restored) => {
                tracing::debug!(
                    job_id = %self.context().info().job_id,
                    restored,
                    "Restored checkpointed files"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.context().info().job_id,
                    error = %render_chain(&e),
                    "Failed to restore checkpointed files"
                );
                false
            }
        }
    }

    /// Write a checkpoint of the job as it is right now.
    async fn checkpoint(&mut self) -> bool {
        let state = match self.state() {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(error = %render_chain(&e), "Job state is not serializable");
                return false;
            }
        };
        match CheckpointManager::checkpoint(self.context_mut(), state).await {
            Ok(number) => {
                tracing::info!(
                    job_id = %self.context().info().job_id,
                    checkpoint = number,
                    "Checkpoint written"
                );
                true
            }
            Err(e) => {
                tracing::warn!(
                    job_id = %self.context().info().job_id,
                    error = %render_chain(&e),
                    "Checkpoint failed"
                );
                false
            }
        }
    }
}
