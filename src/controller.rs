use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::{ControllerConfig, FileConfig, ResourceIdentity};
use crate::error::{render_chain, Result};
use crate::job::{ExecuteDirective, ExitClass, JobDescriptor, JobInfo, JobRegistry, OutputTargets};
use crate::protocol::Endpoints;
use crate::transport::{Request, Transport};
use crate::worker::{ExecutionResult, JobExecutor, LivenessMonitor};

/// Where the controller is in a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Initializing,
    RetrievingJob,
    ExecutingJob,
    SendingResult,
    JobFinished,
    Failed,
    Stopped,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerState::Initializing => write!(f, "initializing"),
            ControllerState::RetrievingJob => write!(f, "retrieving_job"),
            ControllerState::ExecutingJob => write!(f, "executing_job"),
            ControllerState::SendingResult => write!(f, "sending_result"),
            ControllerState::JobFinished => write!(f, "job_finished"),
            ControllerState::Failed => write!(f, "failed"),
            ControllerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Snapshot published to observers on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub state: ControllerState,
    pub message: String,
    pub jobs_done: u64,
    pub jobs_failed: u64,
}

/// Output of all directives of one job so far.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
    pub stdout: String,
    pub stderr: String,
    pub class: ExitClass,
}

impl Default for JobOutput {
    fn default() -> Self {
        Self {
            stdout: String::new(),
            stderr: String::new(),
            class: ExitClass::Ok,
        }
    }
}

impl JobOutput {
    fn merge(&mut self, result: ExecutionResult) {
        self.stdout.push_str(&result.stdout);
        self.stderr.push_str(&result.stderr);
        self.class = result.class;
    }

    fn fail(&mut self, message: &str) {
        self.stderr.push_str(message);
        self.stderr.push('\n');
        self.class = ExitClass::Error;
    }
}

/// Drives the resource: request a job, run its directives, deliver the
/// output, repeat.
pub struct ResourceController {
    identity: ResourceIdentity,
    config: ControllerConfig,
    transport: Arc<dyn Transport>,
    endpoints: Endpoints,
    executor: JobExecutor,
    status: watch::Sender<ControllerStatus>,
    jobs_done: u64,
    jobs_failed: u64,
}

impl ResourceController {
    pub fn new(
        identity: ResourceIdentity,
        config: ControllerConfig,
        file_config: FileConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<JobRegistry>,
    ) -> Result<Self> {
        let endpoints = Endpoints::new(&identity.server)?;
        let executor = JobExecutor::new(transport.clone(), endpoints.clone(), file_config, registry);
        let (status, _) = watch::channel(ControllerStatus {
            state: ControllerState::Initializing,
            message: "Starting".to_string(),
            jobs_done: 0,
            jobs_failed: 0,
        });

        Ok(Self {
            identity,
            config,
            transport,
            endpoints,
            executor,
            status,
            jobs_done: 0,
            jobs_failed: 0,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.status.subscribe()
    }

    pub fn status(&self) -> ControllerStatus {
        self.status.borrow().clone()
    }

    pub fn jobs_done(&self) -> u64 {
        self.jobs_done
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed
    }

    /// Run jobs until `alive` is cancelled, or a single job in oneshot mode.
    pub async fn run(&mut self, alive: CancellationToken) {
        tracing::info!(
            server = %self.endpoints.server(),
            resource = %self.identity.resource_name,
            oneshot = self.config.oneshot,
            "Resource controller started"
        );

        while !alive.is_cancelled() {
            self.run_once(&alive).await;
            if self.config.oneshot {
                break;
            }
            tokio::select! {
                _ = alive.cancelled() => break,
                _ = tokio::time::sleep(self.config.loop_pause()) => {}
            }
        }

        self.publish(ControllerState::Stopped, "Stopped");
        tracing::info!(
            jobs_done = self.jobs_done,
            jobs_failed = self.jobs_failed,
            "Resource controller stopped"
        );
    }

    /// One pass through the lifecycle. Returns the job's classification,
    /// or `None` when no job was obtained.
    pub async fn run_once(&mut self, alive: &CancellationToken) -> Option<ExitClass> {
        self.publish(ControllerState::RetrievingJob, "Requesting job");
        let descriptor = match self.retrieve_job(alive).await {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => return None,
            Err(e) => {
                let message = render_chain(&e);
                tracing::warn!(error = %message, "Job retrieval failed");
                self.publish(ControllerState::Failed, format!("Job retrieval failed: {e}"));
                return None;
            }
        };

        tracing::info!(
            job_id = %descriptor.job_id,
            iosession_id = %descriptor.iosession_id,
            "Job retrieved"
        );
        self.publish(
            ControllerState::ExecutingJob,
            format!("Executing job {}", descriptor.job_id),
        );

        let monitor = LivenessMonitor::start(
            self.transport.clone(),
            &self.endpoints,
            &descriptor.iosession_id,
            self.config.liveness_interval(),
        );
        let output = self.execute_job(&descriptor, &monitor, alive).await;

        if output.class != ExitClass::ServerInterrupted && !alive.is_cancelled() {
            self.publish(
                ControllerState::SendingResult,
                format!("Sending result of job {}", descriptor.job_id),
            );
            self.send_results(&descriptor, &output, &monitor, alive).await;
        }

        if !alive.is_cancelled() {
            if output.class.is_ok() {
                self.jobs_done += 1;
            } else {
                self.jobs_failed += 1;
            }
        }
        monitor.stop().await;

        tracing::info!(job_id = %descriptor.job_id, class = %output.class, "Job finished");
        self.publish(
            ControllerState::JobFinished,
            format!("Job {} finished: {}", descriptor.job_id, output.class),
        );
        Some(output.class)
    }

    /// Ask for a job and wait for the server to generate its description.
    ///
    /// `Ok(None)` when stopped while waiting.
    async fn retrieve_job(&self, alive: &CancellationToken) -> Result<Option<JobDescriptor>> {
        let local_name = Utc::now().timestamp_millis().to_string();
        let url = self
            .endpoints
            .request_job(&self.identity, &self.config.exe, &local_name);
        self.transport
            .send(Request::get(&url))
            .await?
            .require_ok(&url)?
            .protocol_ok("job request")?;

        let url = self.endpoints.input_files(&local_name);
        loop {
            tokio::select! {
                _ = alive.cancelled() => return Ok(None),
                _ = tokio::time::sleep(self.config.job_generate_wait()) => {}
            }
            let response = self.transport.send(Request::get(&url)).await?;
            if response.is_ok() {
                return JobDescriptor::parse(&local_name, &response.text()).map(Some);
            }
            tracing::debug!(local_name = %local_name, status = response.status, "Job description not ready");
        }
    }

    async fn execute_job(
        &self,
        descriptor: &JobDescriptor,
        monitor: &LivenessMonitor,
        alive: &CancellationToken,
    ) -> JobOutput {
        let mut output = JobOutput::default();

        let url = self.endpoints.job_file(&descriptor.session_id);
        let directives = match self.transport.send(Request::get(&url)).await {
            Ok(response) => match response.require_ok(&url) {
                Ok(response) => ExecuteDirective::parse_job_file(&response.text()),
                Err(e) => {
                    output.fail(&render_chain(&e));
                    return output;
                }
            },
            Err(e) => {
                output.fail(&render_chain(&e));
                return output;
            }
        };

        let info = JobInfo::new(&descriptor.job_id, &descriptor.iosession_id);
        for directive in &directives {
            if alive.is_cancelled() {
                break;
            }
            self.publish(ControllerState::ExecutingJob, format!("Executing: '{directive}'"));
            let result = self.supervise(directive, &info, monitor, alive.child_token()).await;
            output.merge(result);
            if !output.class.is_ok() {
                break;
            }
        }
        output
    }

    /// Run one directive, checking the monitor while it runs.
    async fn supervise(
        &self,
        directive: &ExecuteDirective,
        info: &JobInfo,
        monitor: &LivenessMonitor,
        cancel: CancellationToken,
    ) -> ExecutionResult {
        let period = self.config.finish_check_interval();
        let mut checks = interval_at(Instant::now() + period, period);
        let execution = self.executor.execute(directive, info, cancel.clone());
        tokio::pin!(execution);

        let finished = loop {
            tokio::select! {
                result = &mut execution => break Some(result),
                _ = checks.tick() => {
                    if !monitor.is_active() {
                        break None;
                    }
                }
            }
        };

        let mut result = match finished {
            Some(result) => result,
            None => {
                tracing::warn!(job_id = %info.job_id, directive = %directive, "Job execution terminated by server");
                cancel.cancel();
                execution.await
            }
        };

        if !monitor.is_active() {
            result.class = ExitClass::ServerInterrupted;
        }
        result
    }

    /// Deliver stderr, stdout and the exit code, retrying until it works,
    /// the job is withdrawn or the controller stops.
    async fn send_results(
        &self,
        descriptor: &JobDescriptor,
        output: &JobOutput,
        monitor: &LivenessMonitor,
        alive: &CancellationToken,
    ) -> bool {
        loop {
            match self.deliver(descriptor, output, monitor, alive).await {
                Ok(delivered) => return delivered,
                Err(e) => {
                    tracing::warn!(job_id = %descriptor.job_id, error = %render_chain(&e), "Result delivery failed");
                }
            }
            if !monitor.is_active() {
                return false;
            }
            tokio::select! {
                _ = alive.cancelled() => return false,
                _ = tokio::time::sleep(self.config.send_retry()) => {}
            }
        }
    }

    async fn deliver(
        &self,
        descriptor: &JobDescriptor,
        output: &JobOutput,
        monitor: &LivenessMonitor,
        alive: &CancellationToken,
    ) -> Result<bool> {
        let url = self.endpoints.send_outputs(&descriptor.session_id);
        let targets = loop {
            let response = self.transport.send(Request::get(&url)).await?;
            if !response.is_not_found() {
                break OutputTargets::parse(&response.require_ok(&url)?.text())?;
            }
            tracing::debug!(job_id = %descriptor.job_id, "Output targets not available yet");
            if !monitor.is_active() {
                return Ok(false);
            }
            tokio::select! {
                _ = alive.cancelled() => return Ok(false),
                _ = tokio::time::sleep(self.config.send_retry()) => {}
            }
        };

        let uploads = [
            (&targets.stderr, output.stderr.clone()),
            (&targets.stdout, output.stdout.clone()),
            (&targets.status, output.class.code().to_string()),
        ];
        for (url, body) in uploads {
            self.transport
                .send(Request::put(url.as_str(), body))
                .await?
                .require_ok(url)?;
        }

        tracing::info!(
            job_id = %descriptor.job_id,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            exit_code = output.class.code(),
            "Result delivered"
        );
        Ok(true)
    }

    fn publish(&self, state: ControllerState, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(state = %state, message = %message, "Controller state changed");
        self.status.send_replace(ControllerStatus {
            state,
            message,
            jobs_done: self.jobs_done,
            jobs_failed: self.jobs_failed,
        });
    }
}
