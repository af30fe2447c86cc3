//! Object storage access for pointers and artifacts.
//!
//! The [`StorageClient`] trait is the narrow seam the pipeline calls through:
//! a buffered read for the small pointer document and a streamed read to a file
//! for the artifact. [`ObjectStoreClient`] implements it on top of
//! `object_store`, driving the async store on a private current-thread runtime
//! so the pipeline itself stays synchronous.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use object_store::ObjectStore;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Runtime;
use tracing::{debug, info, instrument};

use crate::core::types::ObjectLocation;
use crate::io::config::{StorageBackend, StorageConfig};

/// Failure modes surfaced to the pipeline.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {0} not found")]
    NotFound(ObjectLocation),

    #[error("transfer of {location} failed: {message}")]
    Transfer {
        location: ObjectLocation,
        message: String,
    },

    #[error("transfer of {location} timed out after {}s", timeout.as_secs())]
    Timeout {
        location: ObjectLocation,
        timeout: Duration,
    },

    #[error("local I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    fn from_store(location: &ObjectLocation, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => Self::NotFound(location.clone()),
            other => Self::Transfer {
                location: location.clone(),
                message: other.to_string(),
            },
        }
    }

    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Abstraction over remote object storage.
pub trait StorageClient {
    /// Read a whole object into memory.
    fn fetch_object(&self, location: &ObjectLocation) -> Result<Vec<u8>, StorageError>;

    /// Stream an object into `dest`, returning the number of bytes written.
    fn download_object(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError>;
}

/// `object_store`-backed client for S3-compatible or local directory storage.
pub struct ObjectStoreClient {
    config: StorageConfig,
    runtime: Runtime,
}

impl ObjectStoreClient {
    pub fn new(config: &StorageConfig) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("build storage runtime")?;
        Ok(Self {
            config: config.clone(),
            runtime,
        })
    }

    fn store_for(&self, location: &ObjectLocation) -> Result<Arc<dyn ObjectStore>, StorageError> {
        match self.config.backend {
            StorageBackend::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(&location.bucket);
                if let Some(region) = &self.config.region {
                    builder = builder.with_region(region);
                }
                if let Some(endpoint) = &self.config.endpoint {
                    builder = builder
                        .with_endpoint(endpoint)
                        .with_allow_http(endpoint.starts_with("http://"));
                }
                let store = builder.build().map_err(|e| StorageError::Transfer {
                    location: location.clone(),
                    message: format!("failed to create S3 client: {e}"),
                })?;
                Ok(Arc::new(store))
            }
            StorageBackend::Local => {
                let root = self.config.root.clone().unwrap_or_default();
                let bucket_dir = root.join(&location.bucket);
                if !bucket_dir.is_dir() {
                    return Err(StorageError::NotFound(location.clone()));
                }
                let store = LocalFileSystem::new_with_prefix(&bucket_dir)
                    .map_err(|e| StorageError::from_store(location, e))?;
                Ok(Arc::new(store))
            }
        }
    }

    fn block_on_with_timeout<T, F>(
        &self,
        location: &ObjectLocation,
        timeout: Duration,
        fut: F,
    ) -> Result<T, StorageError>
    where
        F: Future<Output = Result<T, StorageError>>,
    {
        self.runtime.block_on(async {
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => Err(StorageError::Timeout {
                    location: location.clone(),
                    timeout,
                }),
            }
        })
    }
}

fn object_path(location: &ObjectLocation) -> Result<ObjectPath, StorageError> {
    ObjectPath::parse(&location.key).map_err(|e| StorageError::Transfer {
        location: location.clone(),
        message: format!("invalid object key: {e}"),
    })
}

impl StorageClient for ObjectStoreClient {
    #[instrument(skip_all, fields(location = %location))]
    fn fetch_object(&self, location: &ObjectLocation) -> Result<Vec<u8>, StorageError> {
        debug!("fetching object");
        let store = self.store_for(location)?;
        let path = object_path(location)?;

        let bytes = self.block_on_with_timeout(location, self.config.pointer_timeout(), async {
            let result = store
                .get(&path)
                .await
                .map_err(|e| StorageError::from_store(location, e))?;
            result
                .bytes()
                .await
                .map_err(|e| StorageError::from_store(location, e))
        })?;

        debug!(size = bytes.len(), "fetched object");
        Ok(bytes.to_vec())
    }

    #[instrument(skip_all, fields(location = %location, dest = %dest.display()))]
    fn download_object(&self, location: &ObjectLocation, dest: &Path) -> Result<u64, StorageError> {
        debug!("downloading object");
        let store = self.store_for(location)?;
        let path = object_path(location)?;

        let written = self.block_on_with_timeout(location, self.config.download_timeout(), async {
            let result = store
                .get(&path)
                .await
                .map_err(|e| StorageError::from_store(location, e))?;
            let mut stream = result.into_stream();
            let mut file = tokio::fs::File::create(dest)
                .await
                .map_err(|e| StorageError::io(dest, e))?;

            let mut written = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(|e| StorageError::from_store(location, e))?;
                file.write_all(&chunk)
                    .await
                    .map_err(|e| StorageError::io(dest, e))?;
                written += chunk.len() as u64;
            }
            file.flush().await.map_err(|e| StorageError::io(dest, e))?;
            file.sync_all().await.map_err(|e| StorageError::io(dest, e))?;
            Ok(written)
        })?;

        info!(size = written, "downloaded object");
        Ok(written)
    }
}
