use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::FileConfig;

/// One completed transfer as seen by the block sizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferSample {
    pub block_size: usize,
    pub elapsed_ms: u64,
    pub bytes: usize,
    /// Bytes per millisecond
    pub bandwidth: f64,
    /// `bandwidth` over the estimate it was compared against
    pub ratio: f64,
}

/// Adaptive transfer size: a one-way ratchet driven by bandwidth growth.
///
/// Each transfer's bandwidth is compared with the estimate recorded at the
/// last growth. A ratio at or above the configured threshold stages a
/// doubling, which the file applies before its next transfer. The size is
/// never reduced.
///
/// Only the measured state is serialized. The cap and threshold come from
/// [`FileConfig`] and are put back with [`BlockSizer::configure`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSizer {
    block_size: usize,
    staged: Option<usize>,
    last_bandwidth: f64,
    #[serde(skip)]
    cap: usize,
    #[serde(skip)]
    threshold: f64,
}

impl BlockSizer {
    pub fn new(config: &FileConfig) -> Self {
        Self {
            block_size: config.initial_block_size.min(config.buffer_capacity).max(1),
            staged: None,
            last_bandwidth: config.initial_bandwidth,
            cap: config.buffer_capacity,
            threshold: config.ratchet_ratio,
        }
    }

    /// Take the cap and growth threshold from `config`, keeping the
    /// measured block size and bandwidth.
    pub fn configure(&mut self, config: &FileConfig) {
        self.cap = config.buffer_capacity;
        self.threshold = config.ratchet_ratio;
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn staged(&self) -> Option<usize> {
        self.staged
    }

    pub fn last_bandwidth(&self) -> f64 {
        self.last_bandwidth
    }

    /// Make a staged growth current. Returns true if the size changed.
    pub fn apply_staged(&mut self) -> bool {
        match self.staged.take() {
            Some(next) if next > self.block_size => {
                self.block_size = next;
                true
            }
            _ => false,
        }
    }

    /// Feed a finished transfer of `bytes` that took `elapsed`.
    pub fn record(&mut self, bytes: usize, elapsed: Duration) -> TransferSample {
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let bandwidth = bytes as f64 / elapsed_ms.max(1) as f64;
        let ratio = bandwidth / self.last_bandwidth;

        if self.block_size < self.cap && ratio >= self.threshold {
            self.staged = Some((self.block_size * 2).min(self.cap));
            self.last_bandwidth = bandwidth;
        }

        TransferSample {
            block_size: self.block_size,
            elapsed_ms,
            bytes,
            bandwidth,
            ratio,
        }
    }
}
