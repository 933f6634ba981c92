use thiserror::Error;

use super::types::PageId;

/// Storage engine error types
#[derive(Error, Debug)]
pub enum PageKvError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Key {0} not found")]
    KeyNotFound(u64),

    #[error("Buffer pool exhausted: all {0} frames are pinned")]
    PoolExhausted(usize),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(u64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Disk scheduler error: {0}")]
    DiskScheduler(String),
}

impl PageKvError {
    /// True for a missing page or a missing key.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PageNotFound(_) | Self::KeyNotFound(_))
    }

    /// Invariant violations mean corrupted internal state and must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }

    pub(crate) fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, PageKvError>;
