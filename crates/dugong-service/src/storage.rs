// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The object storage adapter.
//!
//! The engines speak [`BlobStore`], a small object-level contract over
//! bucket-absolute logical paths. [`ObjectBlobStore`] implements it on top
//! of the `object_store` crate and hides the bucket split: the live data
//! plane and the backups may sit in different buckets, with paths under the
//! backup root routed to the backup bucket and everything else to the data
//! bucket.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};

use dugong_core::paths::{self, SEPARATOR};

use crate::config::StorageConfig;

/// Region handed to deployments that do not care about one (MinIO and
/// friends).
const DEFAULT_REGION: &str = "us-east-1";

/// Errors raised by the blob store adapter.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {path}")]
    NotFound {
        /// The missing logical path.
        path: String,
    },
    /// The store rejected the credentials.
    #[error("storage authentication failed: {0}")]
    Auth(#[source] object_store::Error),
    /// A retriable store failure.
    #[error("transient storage failure: {0}")]
    Transient(#[source] object_store::Error),
    /// Any other store failure, propagated verbatim.
    #[error("storage failure: {0}")]
    Other(#[source] object_store::Error),
}

/// One entry of a prefix listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    /// Logical path; common prefixes carry a trailing separator.
    pub path: String,
    /// Object size in bytes; zero for common prefixes.
    pub size: u64,
}

impl ListEntry {
    /// Whether this entry names a common prefix rather than an object.
    pub fn is_dir(&self) -> bool {
        self.path.ends_with(SEPARATOR)
    }
}

/// Object-level operations the engines need.
///
/// All paths are logical `/`-separated strings. A path with a trailing
/// separator names a prefix: `exist` on such a path asks whether any object
/// lives under it. Non-recursive listings return the immediate children,
/// with sub-prefixes marked by a trailing separator.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Whether an object (or, for a trailing-separator path, any object
    /// under the prefix) exists.
    async fn exist(&self, path: &str) -> Result<bool, StoreError>;

    /// Reads a whole object.
    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Writes a whole object, replacing any previous content.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Copies an object, server-side where the store supports it.
    async fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError>;

    /// Lists objects under a prefix, flat or recursive.
    async fn list_with_prefix(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ListEntry>, StoreError>;

    /// Best-effort bulk removal of every object under a prefix.
    async fn remove_with_prefix(&self, prefix: &str) -> Result<(), StoreError>;
}

fn map_store_error(path: &str, err: object_store::Error) -> StoreError {
    match err {
        object_store::Error::NotFound { .. } => StoreError::NotFound {
            path: path.to_owned(),
        },
        err @ (object_store::Error::Unauthenticated { .. }
        | object_store::Error::PermissionDenied { .. }) => StoreError::Auth(err),
        err @ object_store::Error::Generic { .. } => StoreError::Transient(err),
        err => StoreError::Other(err),
    }
}

fn to_location(path: &str) -> StorePath {
    StorePath::from(path)
}

/// [`BlobStore`] over `object_store` backends.
pub struct ObjectBlobStore {
    data: Arc<dyn ObjectStore>,
    backup: Arc<dyn ObjectStore>,
    backup_root: String,
    backup_root_dir: String,
}

impl ObjectBlobStore {
    /// Creates an adapter over explicit data and backup stores. Pass the
    /// same handle twice when both sides share a bucket.
    pub fn new(
        data: Arc<dyn ObjectStore>,
        backup: Arc<dyn ObjectStore>,
        root_path: &str,
    ) -> Self {
        Self {
            data,
            backup,
            backup_root: paths::backup_root(root_path),
            backup_root_dir: paths::backup_root_dir(root_path),
        }
    }

    /// Creates an adapter over a single in-memory store, for tests.
    pub fn in_memory(root_path: &str) -> Self {
        let store: Arc<dyn ObjectStore> = Arc::new(InMemory::new());
        Self::new(Arc::clone(&store), store, root_path)
    }

    /// Connects to the configured S3-compatible deployment.
    pub fn from_config(config: &StorageConfig) -> Result<Self, StoreError> {
        let data: Arc<dyn ObjectStore> = Arc::new(build_s3(config, &config.bucket_name)?);
        let backup = if config.backup_bucket() == config.bucket_name {
            Arc::clone(&data)
        } else {
            Arc::new(build_s3(config, config.backup_bucket())?) as Arc<dyn ObjectStore>
        };
        Ok(Self::new(data, backup, &config.root_path))
    }

    fn store_for(&self, path: &str) -> &Arc<dyn ObjectStore> {
        if path == self.backup_root || path.starts_with(&self.backup_root_dir) {
            &self.backup
        } else {
            &self.data
        }
    }
}

fn build_s3(config: &StorageConfig, bucket: &str) -> Result<impl ObjectStore, StoreError> {
    let mut builder = AmazonS3Builder::new()
        .with_endpoint(config.endpoint())
        .with_bucket_name(bucket)
        .with_region(DEFAULT_REGION)
        .with_allow_http(!config.use_ssl)
        .with_virtual_hosted_style_request(false);
    if config.use_iam {
        if !config.iam_endpoint.is_empty() {
            builder = builder.with_metadata_endpoint(&config.iam_endpoint);
        }
    } else {
        builder = builder
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key);
    }
    builder.build().map_err(StoreError::Other)
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    async fn exist(&self, path: &str) -> Result<bool, StoreError> {
        let store = self.store_for(path);
        if path.ends_with(SEPARATOR) {
            let listing = store
                .list_with_delimiter(Some(&to_location(path)))
                .await
                .map_err(|err| map_store_error(path, err))?;
            return Ok(!listing.objects.is_empty() || !listing.common_prefixes.is_empty());
        }
        match store.head(&to_location(path)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(err) => Err(map_store_error(path, err)),
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        let store = self.store_for(path);
        let result = store
            .get(&to_location(path))
            .await
            .map_err(|err| map_store_error(path, err))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|err| map_store_error(path, err))?;
        Ok(bytes.to_vec())
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        self.store_for(path)
            .put(&to_location(path), PutPayload::from(data.to_vec()))
            .await
            .map(|_| ())
            .map_err(|err| map_store_error(path, err))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let src_store = self.store_for(src);
        let dst_store = self.store_for(dst);
        if Arc::ptr_eq(src_store, dst_store) {
            return src_store
                .copy(&to_location(src), &to_location(dst))
                .await
                .map_err(|err| map_store_error(src, err));
        }
        // Different buckets: fall back to read-then-write.
        let bytes = src_store
            .get(&to_location(src))
            .await
            .map_err(|err| map_store_error(src, err))?
            .bytes()
            .await
            .map_err(|err| map_store_error(src, err))?;
        dst_store
            .put(&to_location(dst), PutPayload::from(bytes))
            .await
            .map(|_| ())
            .map_err(|err| map_store_error(dst, err))
    }

    async fn list_with_prefix(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ListEntry>, StoreError> {
        let store = self.store_for(prefix);
        let location = to_location(prefix);
        if recursive {
            let objects: Vec<_> = store
                .list(Some(&location))
                .try_collect()
                .await
                .map_err(|err| map_store_error(prefix, err))?;
            return Ok(objects
                .into_iter()
                .map(|meta| ListEntry {
                    path: meta.location.to_string(),
                    size: meta.size as u64,
                })
                .collect());
        }

        let listing = store
            .list_with_delimiter(Some(&location))
            .await
            .map_err(|err| map_store_error(prefix, err))?;
        let mut entries: Vec<ListEntry> = listing
            .common_prefixes
            .into_iter()
            .map(|prefix| ListEntry {
                path: format!("{prefix}{SEPARATOR}"),
                size: 0,
            })
            .collect();
        entries.extend(listing.objects.into_iter().map(|meta| ListEntry {
            path: meta.location.to_string(),
            size: meta.size as u64,
        }));
        Ok(entries)
    }

    async fn remove_with_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        let store = self.store_for(prefix);
        let objects: Vec<_> = store
            .list(Some(&to_location(prefix)))
            .try_collect()
            .await
            .map_err(|err| map_store_error(prefix, err))?;
        for meta in objects {
            match store.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(err) => return Err(map_store_error(prefix, err)),
            }
        }
        Ok(())
    }
}
