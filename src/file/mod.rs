//! Byte-stream access to objects stored on the grid server.
//!
//! A [`RemoteFile`] keeps one block of the object in memory and moves it
//! with ranged requests against the range file service. The block size
//! adapts to observed bandwidth (see [`BlockSizer`]).
//!
//! The byte-level operations never return errors: `read` yields `None`,
//! `write`/`seek`/`flush`/`close` yield `false`, and the reason is appended
//! to the handle's [`ErrorLog`]. Only [`RemoteFile::open`] fails with an
//! error, because there is no handle to report through yet.

pub mod block;
pub mod log;
pub mod mode;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::FileConfig;
use crate::error::{render_chain, ResourceError, Result};
use crate::protocol::Endpoints;
use crate::transport::{Request, Transport};

pub use block::{BlockSizer, TransferSample};
pub use log::{ErrorEntry, ErrorLog};
pub use mode::AccessMode;

/// Server binding shared by the files of one job.
#[derive(Clone)]
pub struct FileSession {
    pub transport: Arc<dyn Transport>,
    pub endpoints: Endpoints,
    pub iosession_id: String,
    pub config: FileConfig,
    pub cancel: CancellationToken,
}

impl fmt::Debug for FileSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSession")
            .field("server", &self.endpoints.server())
            .field("iosession_id", &self.iosession_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Saved state of one handle inside a job snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCheckpoint {
    pub filename: String,
    pub mode: AccessMode,
    pub file_pos: u64,
    /// Buffered bytes up to the larger of position and end
    pub window: Vec<u8>,
    pub buffer_pos: usize,
    pub buffer_end: usize,
    pub sizer: BlockSizer,
    pub flush_count: u32,
}

/// Handle on one remote object, opened in an [`AccessMode`].
pub struct RemoteFile {
    session: FileSession,
    filename: String,
    mode: AccessMode,
    file_pos: u64,
    buffer: Vec<u8>,
    buffer_pos: usize,
    buffer_end: usize,
    sizer: BlockSizer,
    flush_count: u32,
    errors: ErrorLog,
    transfer_log: Option<Vec<TransferSample>>,
}

impl fmt::Debug for RemoteFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteFile")
            .field("filename", &self.filename)
            .field("mode", &self.mode)
            .field("file_pos", &self.file_pos)
            .field("buffer_pos", &self.buffer_pos)
            .field("buffer_end", &self.buffer_end)
            .field("block_size", &self.sizer.block_size())
            .field("flush_count", &self.flush_count)
            .finish()
    }
}

impl RemoteFile {
    /// Open `filename` in `mode`.
    ///
    /// Truncating modes delete the object (absence is fine) and create it
    /// empty; failure there is returned as [`ResourceError::File`].
    /// Read-capable modes prime the buffer with one fetch; a failed fetch
    /// is only logged, since the object may simply be empty.
    pub async fn open(
        session: FileSession,
        filename: impl Into<String>,
        mode: AccessMode,
    ) -> Result<Self> {
        let filename = filename.into();
        let mut file = Self {
            buffer: vec![0; session.config.buffer_capacity],
            sizer: BlockSizer::new(&session.config),
            session,
            filename,
            mode: AccessMode::Closed,
            file_pos: 0,
            buffer_pos: 0,
            buffer_end: 0,
            flush_count: 0,
            errors: ErrorLog::default(),
            transfer_log: None,
        };

        if mode == AccessMode::Closed {
            return Err(file.fault("open", "cannot open a file in closed mode"));
        }
        if file.session.cancel.is_cancelled() {
            return Err(file.fault("open", ResourceError::Cancelled));
        }
        if mode.truncates() {
            if let Err(e) = file.create().await {
                return Err(file.fault("open", e));
            }
        }
        if mode.can_read() {
            if let Err(e) = file.fetch().await {
                file.record("open", &e);
            }
        }

        file.mode = mode;
        tracing::debug!(file = %file.filename, mode = %mode, "Opened remote file");
        Ok(file)
    }

    /// Rebuild a handle from a snapshot without touching the server.
    ///
    /// The block sizer keeps its measured size and bandwidth but takes its
    /// limits from `session.config`.
    pub fn from_checkpoint(session: FileSession, mut saved: FileCheckpoint) -> Result<Self> {
        saved.sizer.configure(&session.config);
        let capacity = session.config.buffer_capacity;
        if saved.window.len() > capacity || saved.sizer.block_size() > capacity {
            return Err(ResourceError::Checkpoint(format!(
                "buffered window of '{}' exceeds buffer capacity {}",
                saved.filename, capacity
            )));
        }
        if saved.buffer_pos > saved.window.len() || saved.buffer_end > saved.window.len() {
            return Err(ResourceError::Checkpoint(format!(
                "inconsistent buffer window for '{}'",
                saved.filename
            )));
        }

        let buffer = if saved.mode == AccessMode::Closed {
            Vec::new()
        } else {
            let mut buffer = vec![0; capacity];
            buffer[..saved.window.len()].copy_from_slice(&saved.window);
            buffer
        };

        Ok(Self {
            session,
            filename: saved.filename,
            mode: saved.mode,
            file_pos: saved.file_pos,
            buffer,
            buffer_pos: saved.buffer_pos,
            buffer_end: saved.buffer_end,
            sizer: saved.sizer,
            flush_count: saved.flush_count,
            errors: ErrorLog::default(),
            transfer_log: None,
        })
    }

    /// Capture the handle for a job snapshot.
    ///
    /// Unflushed bytes travel in `window`; everything before `file_pos` is
    /// expected to be on the server already.
    pub fn checkpoint_state(&self) -> FileCheckpoint {
        let window_len = self.buffer_pos.max(self.buffer_end).min(self.buffer.len());
        FileCheckpoint {
            filename: self.filename.clone(),
            mode: self.mode,
            file_pos: self.file_pos,
            window: self.buffer[..window_len].to_vec(),
            buffer_pos: self.buffer_pos,
            buffer_end: self.buffer_end,
            sizer: self.sizer.clone(),
            flush_count: self.flush_count,
        }
    }

    /// Next byte, or `None` at end of data or on failure.
    pub async fn read(&mut self) -> Option<u8> {
        match self.try_read().await {
            Ok(byte) => byte,
            Err(e) => {
                self.record("read", &e);
                None
            }
        }
    }

    /// Buffer one byte, flushing a full block first. `false` on failure.
    pub async fn write(&mut self, byte: u8) -> bool {
        match self.try_write(byte).await {
            Ok(()) => true,
            Err(e) => {
                self.record("write", &e);
                false
            }
        }
    }

    /// Move to absolute position `pos`. Positions past the end are legal.
    pub async fn seek(&mut self, pos: u64) -> bool {
        match self.try_seek(pos).await {
            Ok(()) => true,
            Err(e) => {
                self.record("seek", &e);
                false
            }
        }
    }

    /// Send buffered bytes to the server. Nothing buffered is a success.
    pub async fn flush(&mut self) -> bool {
        let result = match self.ensure_usable() {
            Ok(()) if !self.mode.can_write() => Err(self.fault("flush", "file is not opened for write")),
            Ok(()) => self.flush_buffer().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.record("flush", &e);
                false
            }
        }
    }

    /// Flush if writable, then release the buffer. A closed handle rejects
    /// every further operation, including a second close.
    pub async fn close(&mut self) -> bool {
        match self.try_close().await {
            Ok(()) => true,
            Err(e) => {
                self.record("close", &e);
                false
            }
        }
    }

    /// Read until `buf` is full or the data ends; returns the count read.
    pub async fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut count = 0;
        while count < buf.len() {
            match self.read().await {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Write `bytes` in order, stopping at the first failure.
    pub async fn write_all(&mut self, bytes: &[u8]) -> bool {
        for &byte in bytes {
            if !self.write(byte).await {
                return false;
            }
        }
        true
    }

    /// Point the handle at another io-session.
    pub fn set_iosession(&mut self, iosession_id: impl Into<String>) {
        self.session.iosession_id = iosession_id.into();
    }

    /// Record a [`TransferSample`] for every transfer from now on.
    pub fn start_transfer_logging(&mut self) {
        self.transfer_log = Some(Vec::new());
    }

    pub fn transfer_log(&self) -> Option<&[TransferSample]> {
        self.transfer_log.as_deref()
    }

    /// The error log rendered as text, oldest entry first.
    pub fn error_log(&self) -> String {
        self.errors.render()
    }

    pub fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    pub fn reset_errors(&mut self) {
        self.errors.clear();
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn file_pos(&self) -> u64 {
        self.file_pos
    }

    /// Successful flushes over the handle's lifetime, across restores.
    pub fn flush_count(&self) -> u32 {
        self.flush_count
    }

    /// Size of the next transfer, unless a growth is staged.
    pub fn block_size(&self) -> usize {
        self.sizer.block_size()
    }

    /// Growth waiting to be applied before the next transfer.
    pub fn staged_block_size(&self) -> Option<usize> {
        self.sizer.staged()
    }

    pub fn iosession_id(&self) -> &str {
        &self.session.iosession_id
    }

    async fn try_read(&mut self) -> Result<Option<u8>> {
        self.ensure_usable()?;
        if !self.mode.can_read() {
            return Err(self.fault("read", "file is not opened for read"));
        }

        let block = self.sizer.block_size();
        if self.buffer_pos == block {
            if self.mode.can_write() {
                self.flush_buffer().await?;
            } else {
                self.file_pos = self
                    .file_pos
                    .checked_add(block as u64)
                    .ok_or_else(|| self.fault("read", "position beyond addressable range"))?;
            }
            // An out-of-range answer leaves an empty window: end of data.
            self.fetch_in_range().await?;
        }

        if self.buffer_pos < self.buffer_end {
            let byte = self.buffer[self.buffer_pos];
            self.buffer_pos += 1;
            Ok(Some(byte))
        } else {
            Ok(None)
        }
    }

    async fn try_write(&mut self, byte: u8) -> Result<()> {
        self.ensure_usable()?;
        if !self.mode.can_write() {
            return Err(self.fault("write", "file is not opened for write"));
        }

        if self.buffer_pos == self.sizer.block_size() {
            self.flush_buffer().await?;
            if self.mode.refetches_after_flush() {
                self.fetch_in_range().await?;
            }
        }

        self.buffer[self.buffer_pos] = byte;
        self.buffer_pos += 1;
        Ok(())
    }

    async fn try_seek(&mut self, pos: u64) -> Result<()> {
        self.ensure_usable()?;
        if self.mode.can_write() {
            self.flush_buffer().await?;
        }
        self.file_pos = pos;
        if self.mode.can_read() {
            self.fetch_in_range().await?;
        } else {
            self.buffer_pos = 0;
            self.buffer_end = 0;
        }
        Ok(())
    }

    async fn try_close(&mut self) -> Result<()> {
        if self.mode == AccessMode::Closed {
            return Err(self.fault("close", "file is already closed"));
        }
        self.ensure_usable()?;
        if self.mode.can_write() {
            self.flush_buffer().await?;
        }
        self.mode = AccessMode::Closed;
        self.buffer = Vec::new();
        self.buffer_pos = 0;
        self.buffer_end = 0;
        tracing::debug!(file = %self.filename, flushes = self.flush_count, "Closed remote file");
        Ok(())
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.session.cancel.is_cancelled() {
            return Err(ResourceError::Cancelled);
        }
        if self.mode == AccessMode::Closed {
            return Err(self.fault("access", "file is closed"));
        }
        Ok(())
    }

    /// Delete the object if present, then create it empty.
    async fn create(&mut self) -> Result<()> {
        let url = self
            .session
            .endpoints
            .file(&self.session.iosession_id, &self.filename);

        let deleted = self.session.transport.send(Request::delete(&url)).await?;
        if !deleted.is_ok() && !deleted.is_not_found() {
            return Err(ResourceError::Transport {
                url,
                status: deleted.status,
            });
        }

        let created = self
            .session
            .transport
            .send(Request::put(&url, Bytes::new()))
            .await?
            .require_ok(&url)?;
        created.protocol_ok("create")?;
        Ok(())
    }

    /// Fill the buffer from `file_pos` with one block.
    ///
    /// The requested range is clipped at the end of the address space.
    async fn fetch(&mut self) -> Result<()> {
        self.sizer.apply_staged();
        let block = self.sizer.block_size();
        let url = self.session.endpoints.file_range(
            &self.session.iosession_id,
            &self.filename,
            self.file_pos,
            self.file_pos.saturating_add(block as u64 - 1),
        );

        let started = Instant::now();
        let response = self
            .session
            .transport
            .send(Request::get(&url))
            .await?
            .require_ok(&url)?;

        self.buffer_pos = 0;
        self.buffer_end = 0;
        let payload = response.protocol_ok("fetch")?;
        let received = payload.len().min(block);
        self.buffer[..received].copy_from_slice(&payload[..received]);
        self.buffer_end = received;

        self.observe(received, started);
        Ok(())
    }

    /// Fetch, treating a protocol-level refusal as an empty window.
    async fn fetch_in_range(&mut self) -> Result<()> {
        match self.fetch().await {
            Err(e) if e.is_protocol() => {
                tracing::trace!(file = %self.filename, pos = self.file_pos, "Fetch past end of data");
                Ok(())
            }
            other => other,
        }
    }

    /// Write `buffer[..buffer_pos]` at `file_pos`.
    async fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer_pos == 0 {
            return Ok(());
        }

        let pending = self.buffer_pos;
        let next_pos = self
            .file_pos
            .checked_add(pending as u64)
            .ok_or_else(|| self.fault("flush", "position beyond addressable range"))?;
        let url = self.session.endpoints.file_range(
            &self.session.iosession_id,
            &self.filename,
            self.file_pos,
            next_pos - 1,
        );
        let body = Bytes::copy_from_slice(&self.buffer[..pending]);

        let started = Instant::now();
        let response = self
            .session
            .transport
            .send(Request::put(&url, body))
            .await?
            .require_ok(&url)?;
        response.protocol_ok("flush")?;

        self.observe(pending, started);
        self.sizer.apply_staged();

        self.file_pos = next_pos;
        self.buffer_pos = 0;
        self.buffer_end = 0;
        self.flush_count += 1;
        Ok(())
    }

    fn observe(&mut self, bytes: usize, started: Instant) {
        let sample = self.sizer.record(bytes, started.elapsed());
        tracing::trace!(
            file = %self.filename,
            block_size = sample.block_size,
            bytes,
            elapsed_ms = sample.elapsed_ms,
            ratio = sample.ratio,
            "Transfer finished"
        );
        if let Some(log) = self.transfer_log.as_mut() {
            log.push(sample);
        }
    }

    fn fault(&self, op: &'static str, reason: impl fmt::Display) -> ResourceError {
        ResourceError::File {
            filename: self.filename.clone(),
            op,
            reason: reason.to_string(),
        }
    }

    fn record(&mut self, op: &'static str, err: &ResourceError) {
        let message = render_chain(err);
        tracing::warn!(file = %self.filename, op, error = %message, "Remote file operation failed");
        self.errors.push(op, message);
    }
}
