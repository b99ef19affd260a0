use serde::{Deserialize, Serialize};

/// How a remote file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessMode {
    /// Read only.
    Read,
    /// Write only; the object is recreated empty at open.
    Write,
    /// Write only, keeping existing content.
    Update,
    /// Read and write; the object is recreated empty at open.
    ReadWrite,
    /// Read and write, keeping existing content.
    ReadUpdate,
    Closed,
}

impl AccessMode {
    pub fn can_read(self) -> bool {
        matches!(
            self,
            AccessMode::Read | AccessMode::ReadWrite | AccessMode::ReadUpdate
        )
    }

    pub fn can_write(self) -> bool {
        matches!(
            self,
            AccessMode::Write | AccessMode::Update | AccessMode::ReadWrite | AccessMode::ReadUpdate
        )
    }

    /// Opening deletes and recreates the object.
    pub fn truncates(self) -> bool {
        matches!(self, AccessMode::Write | AccessMode::ReadWrite)
    }

    /// Read/write modes refill the buffer after a flush so unwritten tail
    /// bytes of the block are preserved.
    pub fn refetches_after_flush(self) -> bool {
        self.can_read() && self.can_write()
    }
}

impl std::fmt::Display for AccessMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessMode::Read => write!(f, "read"),
            AccessMode::Write => write!(f, "write"),
            AccessMode::Update => write!(f, "update"),
            AccessMode::ReadWrite => write!(f, "read-write"),
            AccessMode::ReadUpdate => write!(f, "read-update"),
            AccessMode::Closed => write!(f, "closed"),
        }
    }
}
