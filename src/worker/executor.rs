use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointManager;
use crate::config::FileConfig;
use crate::error::{render_chain, Result};
use crate::file::FileSession;
use crate::job::{ExecuteDirective, ExitClass, Job, JobContext, JobInfo, JobRegistry};
use crate::protocol::Endpoints;
use crate::transport::Transport;

/// Directive handled by the executor itself instead of a job.
pub const SLEEP_COMMAND: &str = "sleep";

/// How long a cancelled job may take to return on its own before its task
/// is aborted.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Output and classification of one directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub class: ExitClass,
}

impl ExecutionResult {
    pub fn ok(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            class: ExitClass::Ok,
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            class: ExitClass::Error,
        }
    }
}

/// Runs directives: `sleep` inline, everything else as a registered job.
///
/// A job is restored from its latest checkpoint when one exists and loaded
/// fresh from the registry otherwise. Job code runs on its own task so a
/// panic is contained. When the directive's cancellation token fires the
/// job gets a grace period to notice and return with its output; after
/// that its task is aborted and the output is lost.
#[derive(Clone)]
pub struct JobExecutor {
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    file_config: FileConfig,
    registry: Arc<JobRegistry>,
    checkpoints: CheckpointManager,
    cancel_grace: Duration,
}

impl JobExecutor {
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Endpoints,
        file_config: FileConfig,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            checkpoints: CheckpointManager::new(registry.clone()),
            transport,
            endpoints,
            file_config,
            registry,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }

    pub fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Execute one directive for job `info`. Never fails: every fault ends
    /// up in the result's stderr with an `Error` classification.
    pub async fn execute(
        &self,
        directive: &ExecuteDirective,
        info: &JobInfo,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        tracing::info!(job_id = %info.job_id, directive = %directive, "Executing directive");

        if directive.command == SLEEP_COMMAND {
            return Self::sleep(&directive.args, &cancel).await;
        }

        let session = FileSession {
            transport: self.transport.clone(),
            endpoints: self.endpoints.clone(),
            iosession_id: info.iosession_id.clone(),
            config: self.file_config.clone(),
            cancel: cancel.clone(),
        };

        let job = match self.load(session, info, directive).await {
            Ok(job) => job,
            Err(e) => {
                let message = render_chain(&e);
                tracing::warn!(job_id = %info.job_id, command = %directive.command, error = %message, "Cannot load job");
                return ExecutionResult::failed(format!("{message}\n"));
            }
        };

        let result = self.run(job, directive.args.clone(), &cancel).await;
        tracing::info!(
            job_id = %info.job_id,
            command = %directive.command,
            class = %result.class,
            "Directive finished"
        );
        result
    }

    async fn load(
        &self,
        session: FileSession,
        info: &JobInfo,
        directive: &ExecuteDirective,
    ) -> Result<Box<dyn Job>> {
        let command = directive.command.as_str();
        match self
            .checkpoints
            .restore_latest(session.clone(), info, directive)
            .await
        {
            Ok(Some(job)) => return Ok(job),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %info.job_id,
                    command,
                    error = %render_chain(&e),
                    "Discarding unusable checkpoint"
                );
            }
        }

        let ctx = JobContext::new(command, info.clone(), session).with_args(directive.args.clone());
        let mut job = self.registry.create(command, ctx)?;
        job.set_info(info.clone());
        Ok(job)
    }

    async fn run(
        &self,
        mut job: Box<dyn Job>,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let mut handle = tokio::spawn(async move {
            let outcome = job.main(&args).await;
            (job, outcome)
        });

        let finished = tokio::select! {
            joined = &mut handle => Some(joined),
            _ = cancel.cancelled() => None,
        };
        let joined = match finished {
            Some(joined) => joined,
            None => match tokio::time::timeout(self.cancel_grace, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return ExecutionResult::failed("Job was cancelled\n");
                }
            },
        };

        match joined {
            Ok((job, Ok(()))) if cancel.is_cancelled() => ExecutionResult {
                stdout: job.stdout().to_string(),
                stderr: format!("{}Job was cancelled\n", job.stderr()),
                class: ExitClass::Error,
            },
            Ok((job, Ok(()))) => ExecutionResult::ok(job.stdout(), job.stderr()),
            Ok((job, Err(e))) => {
                let mut stderr = job.stderr().to_string();
                stderr.push_str(&render_chain(&e));
                stderr.push('\n');
                ExecutionResult {
                    stdout: job.stdout().to_string(),
                    stderr,
                    class: ExitClass::Error,
                }
            }
            Err(e) if e.is_panic() => {
                let reason = panic_message(e.into_panic());
                tracing::error!(reason = %reason, "Job panicked");
                ExecutionResult::failed(format!("Job panicked: {reason}\n"))
            }
            Err(e) => ExecutionResult::failed(format!("Job task failed: {e}\n")),
        }
    }

    async fn sleep(args: &[String], cancel: &CancellationToken) -> ExecutionResult {
        let seconds = match args.first().map(|s| s.parse::<u64>()) {
            Some(Ok(seconds)) => seconds,
            Some(Err(_)) | None => {
                return ExecutionResult::failed(format!(
                    "sleep: expected a number of seconds, got {:?}\n",
                    args.first().map(String::as_str).unwrap_or("")
                ));
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(seconds)) => ExecutionResult::ok("", ""),
            _ = cancel.cancelled() => ExecutionResult::failed("sleep interrupted\n"),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
