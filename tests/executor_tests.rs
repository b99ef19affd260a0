
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use oneclick::error::{ResourceError, Result};
use oneclick::job::{ExecuteDirective, ExitClass, Job, JobContext, JobInfo, JobRegistry};
use oneclick::worker::JobExecutor;
use test_harness::{endpoints, fixed_block_config, sample_bytes, FakeMig, IOSESSION, JOB_ID};

struct FailingJob {
    ctx: JobContext,
}

#[async_trait]
impl Job for FailingJob {
    fn context(&self) -> &JobContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut JobContext {
        &mut self.ctx
    }

    async fn main(&mut self, _args: &[String]) -> Result<()> {
        self.ctx.println("partial output");
        self.ctx.eprintln("about to fail");
        Err(ResourceError::Internal("disk on fire".to_string()))
    }
}

struct PanickingJob {
    ctx: JobContext,
}

#[async_trait]
impl Job for PanickingJob {
    fn context(&self) -> &JobContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut JobContext {
        &mut self.ctx
    }

    async fn main(&mut self, _args: &[String]) -> Result<()> {
        panic!("boom");
    }
}

struct HangingJob {
    ctx: JobContext,
}

#[async_trait]
impl Job for HangingJob {
    fn context(&self) -> &JobContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut JobContext {
        &mut self.ctx
    }

    async fn main(&mut self, _args: &[String]) -> Result<()> {
        loop {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

struct CooperativeJob {
    ctx: JobContext,
}

#[async_trait]
impl Job for CooperativeJob {
    fn context(&self) -> &JobContext {
        &self.ctx
    }

    fn context_mut(&mut self) -> &mut JobContext {
        &mut self.ctx
    }

    async fn main(&mut self, _args: &[String]) -> Result<()> {
        self.ctx.println("working");
        while !self.ctx.is_cancelled() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.ctx.eprintln("stopping early");
        Err(ResourceError::Cancelled)
    }
}

fn test_registry() -> JobRegistry {
    let mut registry = JobRegistry::with_builtins();
    registry.register("fails", |ctx| Box::new(FailingJob { ctx }));
    registry.register("panics", |ctx| Box::new(PanickingJob { ctx }));
    registry.register("hangs", |ctx| Box::new(HangingJob { ctx }));
    registry.register("cooperates", |ctx| Box::new(CooperativeJob { ctx }));
    registry
}

/// Create a test executor backed by a fake server
fn test_executor(fake: &Arc<FakeMig>) -> JobExecutor {
    JobExecutor::new(
        fake.transport(),
        endpoints(),
        fixed_block_config(64),
        Arc::new(test_registry()),
    )
}

fn info() -> JobInfo {
    JobInfo::new(JOB_ID, IOSESSION)
}

fn directive(line: &str) -> ExecuteDirective {
    ExecuteDirective::parse(line).unwrap()
}

#[tokio::test]
async fn test_sleep_directive() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);

    let start = Instant::now();
    let result = executor
        .execute(&directive("sleep 1"), &info(), CancellationToken::new())
        .await;

    assert!(start.elapsed() >= Duration::from_millis(1000));
    assert_eq!(result.class, ExitClass::Ok);
    assert!(result.stdout.is_empty());
    assert!(result.stderr.is_empty());
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_sleep_with_bad_argument() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("sleep soon"), &info(), CancellationToken::new())
        .await;
    assert_eq!(result.class, ExitClass::Error);
    assert!(result.stderr.contains("soon"));

    let result = executor
        .execute(&directive("sleep"), &info(), CancellationToken::new())
        .await;
    assert_eq!(result.class, ExitClass::Error);
}

#[tokio::test]
async fn test_sleep_ends_on_cancel() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let result = executor.execute(&directive("sleep 30"), &info(), cancel).await;
    assert!(start.elapsed() < Duration::from_secs(5));
    assert_eq!(result.class, ExitClass::Error);
}

#[tokio::test]
async fn test_echo_job() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("echo hello world"), &info(), CancellationToken::new())
        .await;

    assert_eq!(result.class, ExitClass::Ok);
    assert_eq!(result.stdout, "hello world\n");
    assert!(result.stderr.is_empty());
    // Looked for a checkpoint before loading fresh
    assert_eq!(fake.requests().len(), 1);
    assert!(fake.requests()[0].1.contains("echo.checkpoint.latest"));
}

#[tokio::test]
async fn test_unknown_job_is_load_fault() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("nope 1 2"), &info(), CancellationToken::new())
        .await;

    assert_eq!(result.class, ExitClass::Error);
    assert!(result.stderr.contains("Cannot load job 'nope'"));
    assert!(result.stdout.is_empty());
}

#[tokio::test]
async fn test_job_error_keeps_output() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("fails"), &info(), CancellationToken::new())
        .await;

    assert_eq!(result.class, ExitClass::Error);
    assert_eq!(result.stdout, "partial output\n");
    assert!(result.stderr.starts_with("about to fail\n"));
    assert!(result.stderr.contains("disk on fire"));
}

#[tokio::test]
async fn test_job_panic_is_contained() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("panics"), &info(), CancellationToken::new())
        .await;

    assert_eq!(result.class, ExitClass::Error);
    assert!(result.stderr.contains("Job panicked: boom"));
}

#[tokio::test]
async fn test_cancel_aborts_running_job() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let executor = executor.with_cancel_grace(Duration::from_millis(50));
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        executor.execute(&directive("hangs"), &info(), cancel),
    )
    .await
    .expect("cancelled job should return");

    assert_eq!(result.class, ExitClass::Error);
    assert!(result.stderr.contains("cancelled"));
}

#[tokio::test]
async fn test_cancelled_job_that_returns_keeps_output() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake).with_cancel_grace(Duration::from_secs(5));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let result = executor
        .execute(&directive("cooperates"), &info(), cancel)
        .await;

    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(result.class, ExitClass::Error);
    assert_eq!(result.stdout, "working\n");
    assert!(result.stderr.starts_with("stopping early\n"));
    assert!(result.stderr.contains("cancelled"));
}

#[tokio::test]
async fn test_copy_job() {
    let fake = FakeMig::new();
    let data = sample_bytes(1000);
    fake.put_object(IOSESSION, "in.txt", &data);
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("copyjob in.txt out.txt"), &info(), CancellationToken::new())
        .await;

    assert_eq!(result.class, ExitClass::Ok, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "Copying in.txt to out.txt\nCopied 1000 bytes\n");
    assert_eq!(fake.object(IOSESSION, "out.txt").unwrap(), data);
}

#[tokio::test]
async fn test_copy_job_bad_arguments() {
    let fake = FakeMig::new();
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("copyjob only-one"), &info(), CancellationToken::new())
        .await;

    assert_eq!(result.class, ExitClass::Error);
    assert!(result.stderr.contains("usage: copyjob"));
}

#[tokio::test]
async fn test_copy_job_empty_input() {
    let fake = FakeMig::new();
    fake.put_object(IOSESSION, "empty.txt", b"");
    let executor = test_executor(&fake);

    let result = executor
        .execute(&directive("copyjob empty.txt out.txt"), &info(), CancellationToken::new())
        .await;

    assert_eq!(result.class, ExitClass::Ok, "stderr: {}", result.stderr);
    assert_eq!(fake.object(IOSESSION, "out.txt").unwrap(), Vec::<u8>::new());
}
