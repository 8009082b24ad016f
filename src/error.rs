//! Error taxonomy for code-ledger.
//!
//! Each variant corresponds to a failure policy described in the design docs:
//! store failures are fatal to the operation that raised them, parse failures
//! are contained per-file, coordinator failures abort the in-flight run but
//! always release the indexing lock, and usage failures are programmer errors
//! surfaced synchronously.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store failure: {0}")]
    StoreFailure(#[source] anyhow::Error),

    #[error("watcher failure: {0}")]
    WatcherFailure(#[source] anyhow::Error),

    #[error("parse failure for {path}: {source}")]
    ParseFailure {
        path: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("coordinator failure: {0}")]
    CoordinatorFailure(#[source] anyhow::Error),

    #[error("lifecycle failure: {0}")]
    LifecycleFailure(String),

    #[error("usage failure: {0}")]
    UsageFailure(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    pub fn store(cause: impl Into<anyhow::Error>) -> Self {
        LedgerError::StoreFailure(cause.into())
    }

    pub fn watcher(cause: impl Into<anyhow::Error>) -> Self {
        LedgerError::WatcherFailure(cause.into())
    }

    pub fn coordinator(cause: impl Into<anyhow::Error>) -> Self {
        LedgerError::CoordinatorFailure(cause.into())
    }

    pub fn parse(path: impl Into<String>, cause: impl Into<anyhow::Error>) -> Self {
        LedgerError::ParseFailure {
            path: path.into(),
            source: cause.into(),
        }
    }
}
