//! Shared deterministic types for the deployment core.
//!
//! These types carry no I/O. Storage coordinates and derived targets are plain
//! values so the pipeline can pass them between steps without hidden state.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Bucket/key coordinates of an object in remote storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// True when both coordinates are present (ignoring surrounding whitespace).
    pub fn is_complete(&self) -> bool {
        !self.bucket.trim().is_empty() && !self.key.trim().is_empty()
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Pointer object naming the artifact that should currently be deployed.
///
/// Unknown fields are ignored so publishers can attach extra metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerDocument {
    pub bucket: String,
    pub key: String,
}

impl PointerDocument {
    pub fn artifact(&self) -> ObjectLocation {
        ObjectLocation::new(self.bucket.clone(), self.key.clone())
    }
}

/// Where the artifact lives and where it unpacks to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentTarget {
    pub artifact: ObjectLocation,
    /// File-name portion of the artifact key, e.g. `myapp-ab12cd34.zip`.
    pub zip_file_name: String,
    /// App directory name relative to the working directory, e.g. `myapp`.
    pub output_path: String,
}
