//! Checkpoint and restore of running jobs.
//!
//! A checkpoint numbered `n` of job `J` running command `C` consists of:
//!
//! 1. a server-side copy `J.<file>.checkpoint.n` of every written file,
//! 2. the JSON [`JobSnapshot`] stored as `J.C.checkpoint.n`,
//! 3. the marker `J.C.checkpoint.latest` holding `n`, written last.
//!
//! Restore only ever follows the marker, so a checkpoint that failed half
//! way is invisible.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ResourceError, Result};
use crate::file::{AccessMode, FileCheckpoint, FileSession, RemoteFile};
use crate::job::{ExecuteDirective, FileId, Job, JobContext, JobInfo, JobRegistry};
use crate::protocol::{file_checkpoint_name, latest_marker_name, snapshot_name};
use crate::transport::Request;

/// Bumped whenever the snapshot layout changes incompatibly.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedFile {
    pub id: FileId,
    pub file: FileCheckpoint,
}

/// Everything needed to rebuild a job where it left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub version: u32,
    pub command: String,
    /// Arguments of the directive the snapshot was taken for
    pub args: Vec<String>,
    pub job_id: String,
    pub checkpoint_id: u32,
    pub taken_at: DateTime<Utc>,
    pub state: Value,
    pub stdout: String,
    pub stderr: String,
    pub next_file_id: u64,
    pub files: Vec<SavedFile>,
}

impl JobSnapshot {
    fn capture(ctx: &JobContext, state: Value) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            command: ctx.command().to_string(),
            args: ctx.args().to_vec(),
            job_id: ctx.info().job_id.clone(),
            checkpoint_id: ctx.checkpoint_id(),
            taken_at: Utc::now(),
            state,
            stdout: ctx.stdout().to_string(),
            stderr: ctx.stderr().to_string(),
            next_file_id: ctx.next_file_id(),
            files: ctx
                .files()
                .map(|(id, file)| SavedFile {
                    id,
                    file: file.checkpoint_state(),
                })
                .collect(),
        }
    }

    fn validate(&self, info: &JobInfo, directive: &ExecuteDirective) -> Result<()> {
        let command = directive.command.as_str();
        if self.version != SNAPSHOT_VERSION {
            return Err(ResourceError::Checkpoint(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }
        if self.command != command {
            return Err(ResourceError::Checkpoint(format!(
                "snapshot is of '{}', not '{}'",
                self.command, command
            )));
        }
        if self.args != directive.args {
            return Err(ResourceError::Checkpoint(format!(
                "snapshot was taken for arguments {:?}, not {:?}",
                self.args, directive.args
            )));
        }
        if self.job_id != info.job_id {
            return Err(ResourceError::Checkpoint(format!(
                "snapshot belongs to job {}",
                self.job_id
            )));
        }
        Ok(())
    }
}

/// Names of the files whose content must be copied with a checkpoint.
///
/// Handles are grouped by filename. Closed handles that never flushed are
/// ignored, and of several handles on one file the one with the most
/// flushes wins. Files that were never flushed need no copy.
pub fn files_to_copy<'a>(files: impl IntoIterator<Item = &'a RemoteFile>) -> Vec<String> {
    let mut chosen: BTreeMap<&str, u32> = BTreeMap::new();
    for file in files {
        if file.mode() == AccessMode::Closed && file.flush_count() == 0 {
            continue;
        }
        match chosen.entry(file.filename()) {
            Entry::Vacant(slot) => {
                slot.insert(file.flush_count());
            }
            Entry::Occupied(mut slot) => {
                if file.flush_count() > *slot.get() {
                    slot.insert(file.flush_count());
                }
            }
        }
    }
    chosen
        .into_iter()
        .filter(|(_, flushes)| *flushes > 0)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Writes checkpoints for running jobs and brings them back.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    registry: Arc<JobRegistry>,
}

impl CheckpointManager {
    pub fn new(registry: Arc<JobRegistry>) -> Self {
        Self { registry }
    }

    /// Write checkpoint number `ctx.checkpoint_id() + 1` with job `state`.
    pub async fn checkpoint(ctx: &mut JobContext, state: Value) -> Result<u32> {
        if ctx.is_cancelled() {
            return Err(ResourceError::Cancelled);
        }

        let number = ctx.bump_checkpoint_id();
        let info = ctx.info().clone();
        let command = ctx.command().to_string();
        let transport = ctx.transport().clone();
        let endpoints = ctx.endpoints().clone();

        for filename in files_to_copy(ctx.files().map(|(_, file)| file)) {
            let copy = file_checkpoint_name(&info.job_id, &filename, number);
            let url = endpoints.copy(&info.iosession_id, &filename, &copy);
            transport
                .send(Request::get(&url))
                .await?
                .require_ok(&url)?
                .protocol_ok("checkpoint copy")?;
            tracing::debug!(job_id = %info.job_id, file = %filename, copy = %copy, "Copied file for checkpoint");
        }

        let snapshot = JobSnapshot::capture(ctx, state);
        let body = serde_json::to_vec(&snapshot)?;
        let url = endpoints.session_object(
            &info.iosession_id,
            &snapshot_name(&info.job_id, &command, number),
        );
        transport
            .send(Request::put(&url, body))
            .await?
            .require_ok(&url)?;

        let url = endpoints.session_object(
            &info.iosession_id,
            &latest_marker_name(&info.job_id, &command),
        );
        transport
            .send(Request::put(&url, number.to_string()))
            .await?
            .require_ok(&url)?;

        Ok(number)
    }

    /// Rebind every file of `ctx` to its current io-session and copy the
    /// checkpointed contents back over the live objects.
    ///
    /// Returns the number of files copied back.
    pub async fn restore_files(ctx: &mut JobContext) -> Result<usize> {
        let info = ctx.info().clone();
        for (_, file) in ctx.files_mut() {
            file.set_iosession(info.iosession_id.clone());
        }

        let number = ctx.checkpoint_id();
        if number == 0 {
            return Ok(0);
        }

        let transport = ctx.transport().clone();
        let endpoints = ctx.endpoints().clone();
        let mut restored = 0;
        for filename in files_to_copy(ctx.files().map(|(_, file)| file)) {
            let copy = file_checkpoint_name(&info.job_id, &filename, number);
            let url = endpoints.copy(&info.iosession_id, &copy, &filename);
            transport
                .send(Request::get(&url))
                .await?
                .require_ok(&url)?
                .protocol_ok("checkpoint restore")?;
            restored += 1;
        }
        Ok(restored)
    }

    /// Rebuild the job running `directive` for `info` from its latest
    /// checkpoint.
    ///
    /// `Ok(None)` means there is no checkpoint to restore. An error means a
    /// checkpoint exists but cannot be used, including one taken for the
    /// same command with other arguments.
    pub async fn restore_latest(
        &self,
        session: FileSession,
        info: &JobInfo,
        directive: &ExecuteDirective,
    ) -> Result<Option<Box<dyn Job>>> {
        let command = directive.command.as_str();
        let transport = session.transport.clone();
        let endpoints = session.endpoints.clone();

        let url = endpoints.session_object(
            &info.iosession_id,
            &latest_marker_name(&info.job_id, command),
        );
        let marker = transport.send(Request::get(&url)).await?;
        if !marker.is_ok() {
            tracing::debug!(job_id = %info.job_id, command, status = marker.status, "No checkpoint found");
            return Ok(None);
        }
        let number: u32 = marker.text().trim().parse().map_err(|_| {
            ResourceError::Checkpoint(format!("unreadable latest marker {:?}", marker.text()))
        })?;

        let url = endpoints.session_object(
            &info.iosession_id,
            &snapshot_name(&info.job_id, command, number),
        );
        let response = transport
            .send(Request::get(&url))
            .await?
            .require_ok(&url)?;
        let snapshot: JobSnapshot = serde_json::from_slice(&response.body)?;
        snapshot.validate(info, directive)?;

        let mut ctx =
            JobContext::new(command, info.clone(), session).with_args(directive.args.clone());
        let mut files = Vec::with_capacity(snapshot.files.len());
        for saved in snapshot.files {
            let file = RemoteFile::from_checkpoint(ctx.session().clone(), saved.file)?;
            files.push((saved.id, file));
        }
        let next_file_id = files
            .iter()
            .map(|(id, _)| id.0 + 1)
            .max()
            .unwrap_or(0)
            .max(snapshot.next_file_id);
        ctx.restore(
            snapshot.stdout,
            snapshot.stderr,
            next_file_id,
            snapshot.checkpoint_id,
            files,
        );

        let mut job = self.registry.create(command, ctx)?;
        job.load_state(snapshot.state)?;
        job.set_info(info.clone());
        if !job.restore_checkpointed_files().await {
            return Err(ResourceError::Checkpoint(format!(
                "could not restore files of checkpoint {number}"
            )));
        }

        tracing::info!(job_id = %info.job_id, command, checkpoint = number, "Restored job from checkpoint");
        Ok(Some(job))
    }
}
