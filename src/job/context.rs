use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{ResourceError, Result};
use crate::file::{AccessMode, FileSession, RemoteFile};
use crate::protocol::Endpoints;
use crate::transport::Transport;

/// Identity a job runs under on the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub iosession_id: String,
}

impl JobInfo {
    pub fn new(job_id: impl Into<String>, iosession_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            iosession_id: iosession_id.into(),
        }
    }
}

/// Handle to a file opened through a [`JobContext`].
///
/// Ids are stable across checkpoint and restore, so jobs keep them in
/// their state instead of the files themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Runtime state owned by one job instance.
pub struct JobContext {
    command: String,
    args: Vec<String>,
    info: JobInfo,
    session: FileSession,
    stdout: String,
    stderr: String,
    files: BTreeMap<FileId, RemoteFile>,
    next_file_id: u64,
    checkpoint_id: u32,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("info", &self.info)
            .field("files", &self.files.len())
            .field("checkpoint_id", &self.checkpoint_id)
            .finish()
    }
}

impl JobContext {
    pub fn new(command: impl Into<String>, info: JobInfo, mut session: FileSession) -> Self {
        session.iosession_id = info.iosession_id.clone();
        Self {
            command: command.into(),
            args: Vec::new(),
            info,
            session,
            stdout: String::new(),
            stderr: String::new(),
            files: BTreeMap::new(),
            next_file_id: 0,
            checkpoint_id: 0,
        }
    }

    /// Attach the arguments of the directive this job runs for.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn info(&self) -> &JobInfo {
        &self.info
    }

    /// Bind new identity. Files opened from now on use the new io-session.
    pub fn set_info(&mut self, info: JobInfo) {
        self.session.iosession_id = info.iosession_id.clone();
        self.info = info;
    }

    pub fn is_cancelled(&self) -> bool {
        self.session.cancel.is_cancelled()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.session.cancel
    }

    pub fn session(&self) -> &FileSession {
        &self.session
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.session.transport
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.session.endpoints
    }

    pub fn print(&mut self, text: &str) {
        self.stdout.push_str(text);
    }

    pub fn println(&mut self, text: &str) {
        self.stdout.push_str(text);
        self.stdout.push('\n');
    }

    pub fn eprint(&mut self, text: &str) {
        self.stderr.push_str(text);
    }

    pub fn eprintln(&mut self, text: &str) {
        self.stderr.push_str(text);
        self.stderr.push('\n');
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Open a remote file and keep it with the job.
    pub async fn open(&mut self, filename: &str, mode: AccessMode) -> Result<FileId> {
        let file = RemoteFile::open(self.session.clone(), filename, mode).await?;
        let id = FileId(self.next_file_id);
        self.next_file_id += 1;
        self.files.insert(id, file);
        Ok(id)
    }

    pub fn file(&mut self, id: FileId) -> Result<&mut RemoteFile> {
        self.files
            .get_mut(&id)
            .ok_or_else(|| ResourceError::Internal(format!("no open file with id {id}")))
    }

    /// Close a file. The handle stays known to the job so a later
    /// checkpoint still covers what was written through it.
    pub async fn close(&mut self, id: FileId) -> bool {
        match self.files.get_mut(&id) {
            Some(file) => file.close().await,
            None => false,
        }
    }

    pub fn files(&self) -> impl Iterator<Item = (FileId, &RemoteFile)> {
        self.files.iter().map(|(id, file)| (*id, file))
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = (FileId, &mut RemoteFile)> {
        self.files.iter_mut().map(|(id, file)| (*id, file))
    }

    pub fn checkpoint_id(&self) -> u32 {
        self.checkpoint_id
    }

    pub fn next_file_id(&self) -> u64 {
        self.next_file_id
    }

    pub(crate) fn bump_checkpoint_id(&mut self) -> u32 {
        self.checkpoint_id += 1;
        self.checkpoint_id
    }

    /// Reinstate output, counters and files saved in a snapshot.
    pub(crate) fn restore(
        &mut self,
        stdout: String,
        stderr: String,
        next_file_id: u64,
        checkpoint_id: u32,
        files: Vec<(FileId, RemoteFile)>,
    ) {
        self.stdout = stdout;
        self.stderr = stderr;
        self.next_file_id = next_file_id;
        self.checkpoint_id = checkpoint_id;
        self.files = files.into_iter().collect();
    }
}
