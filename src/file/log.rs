use chrono::{DateTime, Utc};

/// A failure recorded by a remote file operation.
#[derive(Debug, Clone)]
pub struct ErrorEntry {
    pub op: &'static str,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Accumulated failures of one file handle.
///
/// File operations report failure through their return value only; the
/// details end up here for the job to inspect.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    entries: Vec<ErrorEntry>,
}

impl ErrorLog {
    pub fn push(&mut self, op: &'static str, message: impl Into<String>) {
        self.entries.push(ErrorEntry {
            op,
            message: message.into(),
            at: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[ErrorEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The log as delimited text blocks, oldest first.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str("\n================= Begin message =================\n");
            out.push_str(&format!(
                "[{}] {}: {}",
                entry.at.format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                entry.op,
                entry.message
            ));
            out.push_str("\n================== End message ==================\n");
        }
        out
    }
}
