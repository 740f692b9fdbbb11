//! Error taxonomy of the sync engine.
//!
//! Module errors (`StoreError`, `BackendError`, `ExecutorError`,
//! `ConfigError`) convert into [`SyncError`] with `?`. Callers decide what to
//! do with a failure through [`SyncError::kind`]:
//!
//! | Kind | Source | Policy |
//! |---|---|---|
//! | `TransientIo` | list/get/put/delete/head, local file I/O | abort the album; rerun resumes |
//! | `TransformFailure` | the image backend rejected or crashed on an input | abort the album's transform stage |
//! | `InternalConsistency` | pagination non-progress, double completion | always fatal |
//! | `Configuration` | invalid config | fails before any remote I/O |
//!
//! Nothing is retried inside the engine. Staleness detection and publishing
//! are pure functions of the current remote and local state, so running the
//! engine again picks up wherever the failed run stopped.

use crate::config::ConfigError;
use crate::executor::ExecutorError;
use crate::imaging::BackendError;
use crate::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transform failed for {key}: {source}")]
    Transform {
        key: String,
        #[source]
        source: BackendError,
    },
    #[error("internal consistency error: {0}")]
    Consistency(String),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Classification of a [`SyncError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TransientIo,
    TransformFailure,
    InternalConsistency,
    Configuration,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Store(StoreError::InvalidKey(_)) => ErrorKind::Configuration,
            SyncError::Store(_) | SyncError::Io(_) => ErrorKind::TransientIo,
            SyncError::Transform { .. } => ErrorKind::TransformFailure,
            SyncError::Consistency(_) | SyncError::Executor(_) | SyncError::Join(_) => {
                ErrorKind::InternalConsistency
            }
            SyncError::Config(_) => ErrorKind::Configuration,
            // We produce every JSON document ourselves.
            SyncError::Json(_) => ErrorKind::InternalConsistency,
        }
    }

    /// Errors that must stop the whole run, not just the current album.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InternalConsistency | ErrorKind::Configuration
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_failures_are_transient() {
        let err = SyncError::from(StoreError::Request {
            key: "a.jpg".into(),
            reason: "timeout".into(),
        });
        assert_eq!(err.kind(), ErrorKind::TransientIo);
        assert!(!err.is_fatal());
    }

    #[test]
    fn transform_failures_are_not_fatal() {
        let err = SyncError::Transform {
            key: "a.jpg".into(),
            source: BackendError::ProcessingFailed("corrupt".into()),
        };
        assert_eq!(err.kind(), ErrorKind::TransformFailure);
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("a.jpg"));
    }

    #[test]
    fn consistency_and_config_are_fatal() {
        let double = SyncError::from(ExecutorError::DoubleCompletion { index: 2 });
        assert_eq!(double.kind(), ErrorKind::InternalConsistency);
        assert!(double.is_fatal());

        let config = SyncError::from(ConfigError::Validation("bad".into()));
        assert_eq!(config.kind(), ErrorKind::Configuration);
        assert!(config.is_fatal());
    }
}
