//! Error taxonomy shared by the loader, the lexer/parsers and the region layer.
//!
//! Lexers and parsers run over anonymous readers, so they report errors with an
//! empty path and a reader-relative offset. The region layer re-attaches the real
//! file path and absolute offset with [`Error::with_path`] and [`Error::shifted`].

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Source directory or data file does not exist.
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// Input bytes that cannot be tokenized or whose sizes do not reconcile.
    #[error("malformed input in {} at offset {offset}: {reason}", path.display())]
    MalformedInput {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    /// Short read, seek failure, permission failure.
    #[error("I/O error in {} at offset {offset}: {source}", path.display())]
    Io {
        path: PathBuf,
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Configuration could not be parsed or is out of range.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedInput {
            path: PathBuf::new(),
            offset,
            reason: reason.into(),
        }
    }

    pub fn io(path: &Path, offset: u64, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            return Error::NotFound {
                path: path.to_path_buf(),
            };
        }
        Error::Io {
            path: path.to_path_buf(),
            offset,
            source,
        }
    }

    /// Attach a file path to an error raised by a reader-level component.
    pub fn with_path(self, file: &Path) -> Self {
        match self {
            Error::MalformedInput {
                path,
                offset,
                reason,
            } if path.as_os_str().is_empty() => Error::MalformedInput {
                path: file.to_path_buf(),
                offset,
                reason,
            },
            Error::Io {
                path,
                offset,
                source,
            } if path.as_os_str().is_empty() => Error::Io {
                path: file.to_path_buf(),
                offset,
                source,
            },
            other => other,
        }
    }

    /// Translate a reader-relative offset into a file offset.
    pub fn shifted(self, base: u64) -> Self {
        match self {
            Error::MalformedInput {
                path,
                offset,
                reason,
            } => Error::MalformedInput {
                path,
                offset: offset + base,
                reason,
            },
            Error::Io {
                path,
                offset,
                source,
            } => Error::Io {
                path,
                offset: offset + base,
                source,
            },
            other => other,
        }
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, Error::MalformedInput { .. })
    }

    /// Byte offset the error refers to, if any.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Error::MalformedInput { offset, .. } | Error::Io { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}
