//! Typed outcomes of a deployment attempt.
//!
//! Fatal failures end the attempt and are returned to the caller. Warnings are
//! reported and collected, but the deployment still counts as successful.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::ObjectLocation;
use crate::io::storage::StorageError;

/// What happened to the previous app version when an attempt failed after staging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackStatus {
    /// Nothing was held aside, so there was nothing to restore.
    NotNeeded,
    /// The previous version is back at its original path.
    Restored,
    /// Rollback was disabled by policy; the previous version stays in holding.
    Skipped { holding: PathBuf },
    /// Rollback was attempted and failed.
    Failed { holding: PathBuf, reason: String },
}

impl RollbackStatus {
    /// True when the previous version is not at its original path anymore.
    pub fn left_in_holding(&self) -> bool {
        matches!(self, Self::Skipped { .. } | Self::Failed { .. })
    }
}

impl fmt::Display for RollbackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotNeeded => write!(f, "no previous version to restore"),
            Self::Restored => write!(f, "previous version restored"),
            Self::Skipped { holding } => {
                write!(f, "previous version left in {}", holding.display())
            }
            Self::Failed { holding, reason } => write!(
                f,
                "rollback failed, previous version left in {}: {reason}",
                holding.display()
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to fetch pointer {location}: {source}")]
    PointerFetch {
        location: ObjectLocation,
        #[source]
        source: StorageError,
    },

    #[error("invalid pointer {location}: {reason}")]
    PointerParse {
        location: ObjectLocation,
        reason: String,
    },

    #[error("failed to remove stale holding directory {}: {source}", path.display())]
    StaleHolding {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    StageMove {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to download artifact {location} ({rollback}): {source}")]
    ArtifactDownload {
        location: ObjectLocation,
        #[source]
        source: StorageError,
        rollback: RollbackStatus,
    },

    #[error("unpack failed after {attempts} attempts ({rollback}): {last_failure}")]
    UnpackExhausted {
        attempts: u32,
        last_failure: String,
        rollback: RollbackStatus,
    },
}

impl DeployError {
    /// True when the failure left the previous version outside its original path.
    pub fn left_in_holding(&self) -> bool {
        match self {
            Self::ArtifactDownload { rollback, .. } | Self::UnpackExhausted { rollback, .. } => {
                rollback.left_in_holding()
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeployWarning {
    #[error("failed to remove holding directory {}: {reason}", path.display())]
    Commit { path: PathBuf, reason: String },

    #[error("failed to remove downloaded archive {}: {reason}", path.display())]
    ArchiveCleanup { path: PathBuf, reason: String },

    #[error("dependency install failed in {}: {reason}", dir.display())]
    DependencyInstall { dir: PathBuf, reason: String },
}
