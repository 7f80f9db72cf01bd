use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EwsxError {
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("invalid archive: {0}")]
    InvalidFormat(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("CRC mismatch in {name}: expected {expected:08x}, got {actual:08x}")]
    Checksum {
        name: String,
        expected: u32,
        actual: u32,
    },

    #[error("refusing to extract unsafe path: {0}")]
    UnsafePath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EwsxError {
    /// Wrap an I/O error raised while opening `path`, turning `NotFound` into the
    /// typed variant so callers can tell a missing input from other failures.
    pub fn from_open(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            EwsxError::NotFound(path.into())
        } else {
            EwsxError::Io(err)
        }
    }
}

// Convenient crate-wide result type
pub type Result<T> = std::result::Result<T, EwsxError>;
