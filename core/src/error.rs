//! Crate-level error for failures that escape a check: configuration,
//! persisted files, the REST API and log capture.

use thiserror::Error;

use crate::api::ApiError;
use crate::cluster::QueryError;
use crate::config::ConfigError;
use crate::credentials::StoreError;
use crate::infrastructure::RunError;
use crate::logs::LogError;
use crate::snapshot::SnapshotError;

#[derive(Debug, Error)]
pub enum OpsError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Log(#[from] LogError),
    #[error(transparent)]
    Query(#[from] QueryError),
    #[error(transparent)]
    Run(#[from] RunError),
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl OpsError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        OpsError::Io {
            context: context.into(),
            source,
        }
    }

    /// Bad configuration or unfilled credentials; everything else is a failed run.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            OpsError::Config(_) | OpsError::Store(StoreError::Missing(_))
        )
    }
}
