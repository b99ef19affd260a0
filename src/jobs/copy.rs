use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ResourceError, Result};
use crate::file::{AccessMode, RemoteFile};
use crate::job::{FileId, Job, JobContext};

const USAGE: &str = "usage: copyjob <input> <output> [checkpoint_every_bytes]";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CopyProgress {
    input: Option<FileId>,
    output: Option<FileId>,
    copied: u64,
}

/// Copies one remote file to another byte by byte.
///
/// With a nonzero `checkpoint_every_bytes` a checkpoint is written each
/// time that many bytes have been copied. A restored copy continues from
/// the last checkpoint instead of starting over.
pub struct CopyJob {
    ctx: JobContext,
    progress: CopyProgress,
}

impl CopyJob {
    pub const NAME: &'static str = "copyjob";

    pub fn new(ctx: JobContext) -> Self {
        Self {
            ctx,
            progress: CopyProgress::default(),
        }
    }

    fn parse_args(args: &[String]) -> Result<(&str, &str, u64)> {
        let (input, output) = match args {
            [input, output, ..] if args.len() <= 3 => (input.as_str(), output.as_str()),
            _ => return Err(ResourceError::InvalidArguments(USAGE.to_string())),
        };
        let every = match args.get(2) {
            Some(every) => every
                .parse()
                .map_err(|_| ResourceError::InvalidArguments(format!("{USAGE} (got {every:?})")))?,
            None => 0,
        };
        Ok((input, output, every))
    }
}

fn failure(file: &RemoteFile, op: &'static str) -> ResourceError {
    let reason = file
        .errors()
        .entries()
        .last()
        .map(|entry| entry.message.clone())
        .unwrap_or_else(|| "unknown failure".to_string());
    ResourceError::File {
        filename: file.filename().to_string(),
        op,
        reason,
    }
}

#[async_trait]
impl Job for CopyJob {
    fn context(&self) -> &JobContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut JobContext {
        &mut self.ctx
    }

    fn state(&self) -> Result<Value> {
        Ok(serde_json::to_value(&self.progress)?)
    }

    fn load_state(&mut self, state: Value) -> Result<()> {
        self.progress = serde_json::from_value(state)?;
        Ok(())
    }

    async fn main(&mut self, args: &[String]) -> Result<()> {
        let (src, dst, every) = Self::parse_args(args)?;

        let (input, output) = match (self.progress.input, self.progress.output) {
            (Some(input), Some(output)) => {
                let restored = (
                    self.ctx.file(input)?.filename().to_string(),
                    self.ctx.file(output)?.filename().to_string(),
                );
                if restored.0 != src || restored.1 != dst {
                    return Err(ResourceError::Checkpoint(format!(
                        "restored copy of {} to {} does not match {src} to {dst}",
                        restored.0, restored.1
                    )));
                }
                tracing::info!(src, dst, copied = self.progress.copied, "Resuming copy");
                (input, output)
            }
            _ => {
                let input = self.ctx.open(src, AccessMode::Read).await?;
                let output = self.ctx.open(dst, AccessMode::Write).await?;
                self.progress = CopyProgress {
                    input: Some(input),
                    output: Some(output),
                    copied: 0,
                };
                self.ctx.println(&format!("Copying {src} to {dst}"));
                (input, output)
            }
        };

        loop {
            if self.ctx.is_cancelled() {
                return Err(ResourceError::Cancelled);
            }
            let Some(byte) = self.ctx.file(input)?.read().await else {
                break;
            };
            let out = self.ctx.file(output)?;
            if !out.write(byte).await {
                return Err(failure(out, "write"));
            }

            self.progress.copied += 1;
            if every > 0 && self.progress.copied % every == 0 {
                self.checkpoint().await;
            }
        }

        let source = self.ctx.file(input)?;
        if source.errors().entries().iter().any(|entry| entry.op != "open") {
            return Err(failure(source, "read"));
        }
        source.close().await;

        let out = self.ctx.file(output)?;
        if !out.close().await {
            return Err(failure(out, "close"));
        }

        self.ctx.println(&format!("Copied {} bytes", self.progress.copied));
        Ok(())
    }
}
