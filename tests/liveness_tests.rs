
use std::sync::Arc;
use std::time::Duration;

use oneclick::transport::Method;
use oneclick::worker::LivenessMonitor;
use test_harness::{endpoints, FakeMig, Fault, IOSESSION};

fn start(fake: &Arc<FakeMig>, interval_ms: u64) -> LivenessMonitor {
    LivenessMonitor::start(
        fake.transport(),
        &endpoints(),
        IOSESSION,
        Duration::from_millis(interval_ms),
    )
}

/// Poll `monitor` until it reports inactive or `limit` passes.
async fn wait_inactive(monitor: &LivenessMonitor, limit: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if !monitor.is_active() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_stays_active_while_server_wants_job() {
    let fake = FakeMig::new();
    let monitor = start(&fake, 10);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(monitor.is_active());
    assert!(fake.count(Method::Get, "isjobactive.py?iosessionid=io-1") >= 2);

    monitor.stop().await;
}

#[tokio::test]
async fn test_withdrawn_job_flips_flag_and_ends_polling() {
    let fake = FakeMig::new();
    fake.set_inactive(IOSESSION);
    let monitor = start(&fake, 10);

    assert!(wait_inactive(&monitor, Duration::from_secs(5)).await);
    let polls = fake.count(Method::Get, "isjobactive");
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(fake.count(Method::Get, "isjobactive"), polls);
    assert!(!monitor.is_active());

    monitor.stop().await;
}

#[tokio::test]
async fn test_http_error_counts_as_inactive() {
    let fake = FakeMig::new();
    fake.fail(Fault::new("isjobactive", 500).after(2));
    let monitor = start(&fake, 10);

    assert!(wait_inactive(&monitor, Duration::from_secs(5)).await);
    assert_eq!(fake.count(Method::Get, "isjobactive"), 3);
    monitor.stop().await;
}

#[tokio::test]
async fn test_unreachable_server_counts_as_inactive() {
    let fake = FakeMig::new();
    fake.set_offline(true);
    let monitor = start(&fake, 10);

    assert!(wait_inactive(&monitor, Duration::from_secs(5)).await);
    monitor.stop().await;
}

#[tokio::test]
async fn test_stop_is_prompt() {
    let fake = FakeMig::new();
    let monitor = start(&fake, 60_000);

    tokio::time::timeout(Duration::from_secs(1), monitor.stop())
        .await
        .expect("stop should not wait for the next poll");
    assert!(fake.requests().is_empty());
}
