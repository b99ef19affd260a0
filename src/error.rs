use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("HTTP {status} from {url}")]
    Transport { url: String, status: u16 },

    #[error("{context} returned protocol code {code}")]
    Protocol { context: String, code: i32 },

    #[error("Malformed response from {context}: {detail}")]
    Malformed { context: String, detail: String },

    #[error("File '{filename}' {op} failed: {reason}")]
    File {
        filename: String,
        op: &'static str,
        reason: String,
    },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Cannot load job '{0}'")]
    Load(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResourceError {
    /// True for the inner-code failures the range file service uses to
    /// report a read past the end of the object.
    pub fn is_protocol(&self) -> bool {
        matches!(self, ResourceError::Protocol { .. })
    }
}

pub type Result<T> = std::result::Result<T, ResourceError>;

/// Render an error with its `source()` chain, one cause per line.
pub fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n  caused by: ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
