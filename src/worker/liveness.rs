use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::protocol::Endpoints;
use crate::transport::{Request, Transport};

/// Background poller that tells whether the server still wants a job.
///
/// Polls the liveness endpoint of the job's io-session every `interval`.
/// The first answer that is not HTTP 200 with protocol code OK clears the
/// active flag for good and ends polling.
pub struct LivenessMonitor {
    active: Arc<AtomicBool>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    pub fn start(
        transport: Arc<dyn Transport>,
        endpoints: &Endpoints,
        iosession_id: &str,
        interval: Duration,
    ) -> Self {
        let active = Arc::new(AtomicBool::new(true));
        let stop = CancellationToken::new();
        let url = endpoints.liveness(iosession_id);
        let iosession_id = iosession_id.to_string();

        let handle = tokio::spawn({
            let active = active.clone();
            let stop = stop.clone();
            async move {
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }

                    let still_active = tokio::select! {
                        _ = stop.cancelled() => break,
                        answer = Self::poll(transport.as_ref(), &url) => answer,
                    };
                    if !still_active {
                        active.store(false, Ordering::Release);
                        tracing::info!(iosession_id = %iosession_id, "Server no longer wants the job");
                        break;
                    }
                }
            }
        });

        Self {
            active,
            stop,
            handle: Some(handle),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// End polling and wait for the poll task to return.
    pub async fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Liveness task ended abnormally");
            }
        }
    }

    async fn poll(transport: &dyn Transport, url: &str) -> bool {
        match transport.send(Request::get(url)).await {
            Ok(response) if response.is_ok() => match response.protocol_ok("liveness") {
                Ok(_) => true,
                Err(e) => {
                    tracing::debug!(error = %e, "Liveness check answered negatively");
                    false
                }
            },
            Ok(response) => {
                tracing::debug!(status = response.status, "Liveness check rejected");
                false
            }
            Err(e) => {
                tracing::warn!(error = %e, "Liveness check failed");
                false
            }
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
