#![forbid(unsafe_code)]
//! Error types for pagecore.
//!
//! Defines `PcError` and a `Result<T>` alias used throughout the workspace.
//! Worker-facing operations return these instead of panicking; the worker
//! loop treats everything except startup errors as recoverable.

use pagecore_types::{ConfigError, PageOffset};
use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for all pagecore operations.
#[derive(Debug, Error)]
pub enum PcError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("cannot open swap image {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed at offset {offset}: {source}")]
    Read {
        offset: PageOffset,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed at offset {offset}: {source}")]
    Write {
        offset: PageOffset,
        #[source]
        source: std::io::Error,
    },

    #[error("short write at offset {offset}: {written} of {expected} bytes")]
    PartialWrite {
        offset: PageOffset,
        written: usize,
        expected: usize,
    },

    #[error("page buffer allocation failed")]
    Alloc,

    #[error("unaligned page offset {0}")]
    Unaligned(PageOffset),

    #[error("compression failed: {0}")]
    Compress(String),

    #[error("decompression failed: {0}")]
    Decompress(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PcError {
    /// Errno of the underlying syscall failure, when one exists.
    ///
    /// Used by log fields; partial writes and non-I/O errors have none.
    #[must_use]
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Open { source, .. }
            | Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::Io(source) => source.raw_os_error(),
            _ => None,
        }
    }

    /// True for errors that must abort startup rather than one iteration.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Open { .. })
    }
}

/// Result alias using `PcError`.
pub type Result<T> = std::result::Result<T, PcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_is_fatal_read_is_not() {
        let open = PcError::Open {
            path: PathBuf::from("/no/such/image"),
            source: std::io::Error::from_raw_os_error(2),
        };
        assert!(open.is_fatal());
        assert_eq!(open.raw_os_error(), Some(2));

        let read = PcError::Read {
            offset: PageOffset(4096),
            source: std::io::Error::from_raw_os_error(5),
        };
        assert!(!read.is_fatal());
        assert_eq!(read.raw_os_error(), Some(5));
    }

    #[test]
    fn partial_write_formats_counts() {
        let err = PcError::PartialWrite {
            offset: PageOffset(0),
            written: 904,
            expected: 4096,
        };
        let text = err.to_string();
        assert!(text.contains("904"));
        assert!(text.contains("4096"));
        assert!(err.raw_os_error().is_none());
    }
}
