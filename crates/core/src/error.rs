//! Centralized error types for the acctmerge workspace.

use crate::record::RecordFormatError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error enum. Variants map to failure classes of a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AcctError {
    /// File-system failure. Fatal when it hits the working directory or the
    /// live files, local to one source otherwise.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Format error: {0}")]
    Format(#[from] RecordFormatError),

    #[error("Invalid progress flag in {}: {value:?}", path.display())]
    InvalidFlag { path: PathBuf, value: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl AcctError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AcctError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type AcctResult<T> = Result<T, AcctError>;
