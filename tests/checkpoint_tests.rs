
use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use oneclick::checkpoint::{CheckpointManager, JobSnapshot, SNAPSHOT_VERSION};
use oneclick::file::AccessMode;
use oneclick::job::{ExecuteDirective, ExitClass, Job, JobContext, JobInfo, JobRegistry};
use oneclick::transport::Method;
use oneclick::worker::JobExecutor;
use test_harness::{
    endpoints, file_session, fixed_block_config, sample_bytes, FakeMig, Fault, IOSESSION, JOB_ID,
};

fn info() -> JobInfo {
    JobInfo::new(JOB_ID, IOSESSION)
}

fn directive(line: &str) -> ExecuteDirective {
    ExecuteDirective::parse(line).unwrap()
}

fn executor(fake: &Arc<FakeMig>) -> JobExecutor {
    JobExecutor::new(
        fake.transport(),
        endpoints(),
        fixed_block_config(64),
        Arc::new(JobRegistry::with_builtins()),
    )
}

async fn context_with_written_file(fake: &Arc<FakeMig>) -> JobContext {
    let mut ctx = JobContext::new("copyjob", info(), file_session(fake, fixed_block_config(16)));
    let id = ctx.open("out.txt", AccessMode::Write).await.unwrap();
    assert!(ctx.file(id).unwrap().write_all(&sample_bytes(100)).await);
    ctx.println("progress line");
    ctx
}

#[tokio::test]
async fn test_checkpoint_writes_copies_snapshot_then_marker() {
    let fake = FakeMig::new();
    let mut ctx = context_with_written_file(&fake).await;
    fake.clear_requests();

    let number = CheckpointManager::checkpoint(&mut ctx, json!({ "copied": 100 }))
        .await
        .unwrap();
    assert_eq!(number, 1);
    assert_eq!(ctx.checkpoint_id(), 1);

    let requests = fake.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].0, Method::Get);
    assert!(requests[0].1.contains("/cgi-sid/cp.py"));
    assert!(requests[1].1.ends_with("/job-1.copyjob.checkpoint.1"));
    assert!(requests[2].1.ends_with("/job-1.copyjob.checkpoint.latest"));

    // Six full blocks were flushed; the copy holds exactly those.
    let copy = fake.object(IOSESSION, "job-1.out.txt.checkpoint.1").unwrap();
    assert_eq!(copy, &sample_bytes(100)[..96]);
    assert_eq!(
        fake.object(IOSESSION, "job-1.copyjob.checkpoint.latest").unwrap(),
        b"1"
    );

    let raw = fake.object(IOSESSION, "job-1.copyjob.checkpoint.1").unwrap();
    let snapshot: JobSnapshot = serde_json::from_slice(&raw).unwrap();
    assert_eq!(snapshot.version, SNAPSHOT_VERSION);
    assert_eq!(snapshot.command, "copyjob");
    assert_eq!(snapshot.job_id, JOB_ID);
    assert_eq!(snapshot.checkpoint_id, 1);
    assert_eq!(snapshot.state, json!({ "copied": 100 }));
    assert_eq!(snapshot.stdout, "progress line\n");
    assert_eq!(snapshot.files.len(), 1);
    let saved = &snapshot.files[0].file;
    assert_eq!(saved.filename, "out.txt");
    assert_eq!(saved.file_pos, 96);
    assert_eq!(saved.flush_count, 6);
    assert_eq!(saved.window, &sample_bytes(100)[96..]);
}

#[tokio::test]
async fn test_checkpoint_numbers_increase() {
    let fake = FakeMig::new();
    let mut ctx = context_with_written_file(&fake).await;

    assert_eq!(CheckpointManager::checkpoint(&mut ctx, json!(null)).await.unwrap(), 1);
    assert_eq!(CheckpointManager::checkpoint(&mut ctx, json!(null)).await.unwrap(), 2);
    assert_eq!(
        fake.object(IOSESSION, "job-1.copyjob.checkpoint.latest").unwrap(),
        b"2"
    );
    assert!(fake.object(IOSESSION, "job-1.out.txt.checkpoint.2").is_some());
}

#[tokio::test]
async fn test_failed_copy_leaves_no_marker() {
    let fake = FakeMig::new();
    let mut ctx = context_with_written_file(&fake).await;
    fake.fail(Fault::new("/cgi-sid/cp.py", 500));

    assert!(CheckpointManager::checkpoint(&mut ctx, json!(null)).await.is_err());
    assert!(fake.object(IOSESSION, "job-1.copyjob.checkpoint.1").is_none());
    assert!(fake.object(IOSESSION, "job-1.copyjob.checkpoint.latest").is_none());
}

#[tokio::test]
async fn test_failed_snapshot_upload_leaves_no_marker() {
    let fake = FakeMig::new();
    let mut ctx = context_with_written_file(&fake).await;
    fake.fail(Fault::new("copyjob.checkpoint.1", 507).method(Method::Put));

    assert!(CheckpointManager::checkpoint(&mut ctx, json!(null)).await.is_err());
    assert!(fake.object(IOSESSION, "job-1.copyjob.checkpoint.latest").is_none());
}

#[tokio::test]
async fn test_cancelled_context_cannot_checkpoint() {
    let fake = FakeMig::new();
    let mut ctx = context_with_written_file(&fake).await;
    ctx.cancel_token().cancel();

    assert!(CheckpointManager::checkpoint(&mut ctx, json!(null)).await.is_err());
    assert_eq!(ctx.checkpoint_id(), 0);
}

#[tokio::test]
async fn test_no_marker_means_no_checkpoint() {
    let fake = FakeMig::new();
    let manager = CheckpointManager::new(Arc::new(JobRegistry::with_builtins()));

    let restored = manager
        .restore_latest(file_session(&fake, fixed_block_config(64)), &info(), &directive("copyjob"))
        .await
        .unwrap();
    assert!(restored.is_none());
}

#[tokio::test]
async fn test_snapshot_of_other_command_is_rejected() {
    let fake = FakeMig::new();
    let mut ctx = context_with_written_file(&fake).await;
    CheckpointManager::checkpoint(&mut ctx, json!(null)).await.unwrap();

    // Point the echo marker at the copyjob snapshot.
    let snapshot = fake.object(IOSESSION, "job-1.copyjob.checkpoint.1").unwrap();
    fake.put_object(IOSESSION, "job-1.echo.checkpoint.1", &snapshot);
    fake.put_object(IOSESSION, "job-1.echo.checkpoint.latest", b"1");

    let manager = CheckpointManager::new(Arc::new(JobRegistry::with_builtins()));
    let result = manager
        .restore_latest(file_session(&fake, fixed_block_config(64)), &info(), &directive("echo"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_snapshot_for_other_arguments_is_rejected() {
    let fake = FakeMig::new();
    let mut ctx = JobContext::new("copyjob", info(), file_session(&fake, fixed_block_config(16)))
        .with_args(vec!["in.txt".to_string(), "out.txt".to_string()]);
    let id = ctx.open("out.txt", AccessMode::Write).await.unwrap();
    assert!(ctx.file(id).unwrap().write_all(&sample_bytes(40)).await);
    let state = json!({ "input": null, "output": id, "copied": 40 });
    CheckpointManager::checkpoint(&mut ctx, state).await.unwrap();

    let raw = fake.object(IOSESSION, "job-1.copyjob.checkpoint.1").unwrap();
    let snapshot: JobSnapshot = serde_json::from_slice(&raw).unwrap();
    assert_eq!(snapshot.args, vec!["in.txt", "out.txt"]);

    let manager = CheckpointManager::new(Arc::new(JobRegistry::with_builtins()));
    let other = manager
        .restore_latest(
            file_session(&fake, fixed_block_config(16)),
            &info(),
            &directive("copyjob other.txt copy.txt"),
        )
        .await;
    assert!(other.is_err());

    let same = manager
        .restore_latest(
            file_session(&fake, fixed_block_config(16)),
            &info(),
            &directive("copyjob in.txt out.txt"),
        )
        .await
        .unwrap()
        .expect("checkpoint of the same directive restores");
    assert_eq!(same.context().args(), ["in.txt", "out.txt"]);
    assert_eq!(same.context().checkpoint_id(), 1);
}

#[tokio::test]
async fn test_crashed_copy_resumes_with_identical_output() {
    let data = sample_bytes(1000);
    let line = "copyjob in.txt out.txt 300";
    let directive = ExecuteDirective::parse(line).unwrap();

    // Reference run without interruption.
    let reference = FakeMig::new();
    reference.put_object(IOSESSION, "in.txt", &data);
    let expected = executor(&reference)
        .execute(&directive, &info(), CancellationToken::new())
        .await;
    assert_eq!(expected.class, ExitClass::Ok, "stderr: {}", expected.stderr);
    assert_eq!(reference.object(IOSESSION, "out.txt").unwrap(), data);

    // Same job, but output writes break after 8 blocks: past the first
    // checkpoint (300 bytes), before the second.
    let fake = FakeMig::new();
    fake.put_object(IOSESSION, "in.txt", &data);
    fake.fail(Fault::new("filename=out.txt&file_startpos", 503).method(Method::Put).after(8));

    let crashed = executor(&fake)
        .execute(&directive, &info(), CancellationToken::new())
        .await;
    assert_eq!(crashed.class, ExitClass::Error);
    assert_eq!(
        fake.object(IOSESSION, "job-1.copyjob.checkpoint.latest").unwrap(),
        b"1"
    );
    assert_eq!(fake.object(IOSESSION, "out.txt").unwrap().len(), 512);

    // Server recovers; running the directive again resumes from the checkpoint.
    fake.clear_faults();
    fake.clear_requests();
    let resumed = executor(&fake)
        .execute(&directive, &info(), CancellationToken::new())
        .await;

    assert_eq!(resumed.class, ExitClass::Ok, "stderr: {}", resumed.stderr);
    assert_eq!(resumed.stdout, expected.stdout);
    assert_eq!(resumed.stderr, expected.stderr);
    assert_eq!(fake.object(IOSESSION, "out.txt").unwrap(), data);

    // Restored instead of starting over: no fresh open of the output.
    assert_eq!(fake.count(Method::Delete, "filename=out.txt"), 0);
    assert_eq!(fake.count(Method::Get, "src=job-1.out.txt.checkpoint.1"), 1);
}

#[tokio::test]
async fn test_unreadable_checkpoint_falls_back_to_fresh_run() {
    let data = sample_bytes(200);
    let fake = FakeMig::new();
    fake.put_object(IOSESSION, "in.txt", &data);
    fake.put_object(IOSESSION, "job-1.copyjob.checkpoint.latest", b"1");
    fake.put_object(IOSESSION, "job-1.copyjob.checkpoint.1", b"{not json");

    let result = executor(&fake)
        .execute(
            &ExecuteDirective::parse("copyjob in.txt out.txt").unwrap(),
            &info(),
            CancellationToken::new(),
        )
        .await;

    assert_eq!(result.class, ExitClass::Ok, "stderr: {}", result.stderr);
    assert_eq!(result.stdout, "Copying in.txt to out.txt\nCopied 200 bytes\n");
    assert_eq!(fake.object(IOSESSION, "out.txt").unwrap(), data);
}

#[tokio::test]
async fn test_failed_file_restore_discards_checkpoint() {
    let fake = FakeMig::new();
    let mut ctx = context_with_written_file(&fake).await;
    CheckpointManager::checkpoint(&mut ctx, json!({ "input": null, "output": null, "copied": 0 }))
        .await
        .unwrap();
    fake.fail(Fault::new("src=job-1.out.txt.checkpoint.1", 500));

    let manager = CheckpointManager::new(Arc::new(JobRegistry::with_builtins()));
    let result = manager
        .restore_latest(file_session(&fake, fixed_block_config(64)), &info(), &directive("copyjob"))
        .await;
    assert!(result.is_err());
}
