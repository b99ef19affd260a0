use std::time::Duration;

/// Who this resource is, as issued by the grid server.
///
/// Fixed for the lifetime of a controller.
#[derive(Debug, Clone)]
pub struct ResourceIdentity {
    /// Base URL of the grid server, e.g. `https://grid.example.org`
    pub server: String,
    /// Long-lived credential identifying this resource across job requests
    pub sandbox_key: String,
    /// Unique resource name registered with the server
    pub resource_name: String,
    /// CPU time budget (seconds) advertised with each job request
    pub cputime: u64,
}

impl ResourceIdentity {
    pub fn new(server: impl Into<String>, sandbox_key: impl Into<String>) -> Self {
        Self {
            server: server.into().trim_end_matches('/').to_string(),
            sandbox_key: sandbox_key.into(),
            resource_name: String::new(),
            cputime: 3600,
        }
    }

    pub fn with_resource_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = name.into();
        self
    }

    pub fn with_cputime(mut self, cputime: u64) -> Self {
        self.cputime = cputime;
        self
    }
}

/// Timing and looping behaviour of the resource controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Wait before each poll for the generated job description
    pub job_generate_wait_ms: u64,
    /// Delay between result delivery attempts
    pub send_retry_ms: u64,
    /// How often a running directive is checked against the liveness flag
    pub finish_check_interval_ms: u64,
    /// How often the liveness monitor asks the server about the job
    pub liveness_interval_ms: u64,
    /// Pause at the end of each controller loop iteration
    pub loop_pause_ms: u64,
    /// Run a single job and return
    pub oneshot: bool,
    /// Execution environment tag sent with job requests
    pub exe: String,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            job_generate_wait_ms: 1000,
            send_retry_ms: 1000,
            finish_check_interval_ms: 15_000,
            liveness_interval_ms: 60_000,
            loop_pause_ms: 1000,
            oneshot: false,
            exe: "oneclick".to_string(),
        }
    }
}

impl ControllerConfig {
    pub fn job_generate_wait(&self) -> Duration {
        Duration::from_millis(self.job_generate_wait_ms)
    }

    pub fn send_retry(&self) -> Duration {
        Duration::from_millis(self.send_retry_ms)
    }

    pub fn finish_check_interval(&self) -> Duration {
        Duration::from_millis(self.finish_check_interval_ms)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn loop_pause(&self) -> Duration {
        Duration::from_millis(self.loop_pause_ms)
    }
}

/// Buffering and block-size tuning for remote files.
#[derive(Debug, Clone)]
pub struct FileConfig {
    /// Size of the in-memory buffer; also the block size cap
    pub buffer_capacity: usize,
    /// Block size used for the first transfer
    pub initial_block_size: usize,
    /// Seed bandwidth estimate in bytes/ms
    pub initial_bandwidth: f64,
    /// Bandwidth growth ratio that doubles the block size
    pub ratchet_ratio: f64,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: 1024 * 1024,
            initial_block_size: 2048,
            initial_bandwidth: 1.0,
            ratchet_ratio: 1.65,
        }
    }
}

/// Settings for the reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Whole-request timeout; `None` leaves requests unbounded
    pub request_timeout_ms: Option<u64>,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: None,
            user_agent: concat!("oneclick/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}
