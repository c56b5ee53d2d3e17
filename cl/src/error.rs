//! Ledger error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while reading or appending to the ledger
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("I/O error on ledger {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to acquire lock on ledger {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid cost for run {run_id}: {cost_usd}")]
    InvalidCost { run_id: String, cost_usd: f64 },
}

impl LedgerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn lock(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        LedgerError::Lock {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came from the filesystem rather than the data
    pub fn is_io(&self) -> bool {
        matches!(self, LedgerError::Io { .. } | LedgerError::Lock { .. })
    }
}
