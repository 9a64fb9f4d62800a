// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The backup catalog: reading, listing, and deleting backups by their
//! well-known prefix layout.

use std::sync::Arc;

use dugong_core::meta::{self, BackupInfo, BackupMetaBytes};
use dugong_core::paths;

use crate::error::BackupError;
use crate::storage::BlobStore;

/// Read/delete access to the persisted backups of one storage root.
///
/// The catalog observes only fully written backups: a backup becomes visible
/// the moment its root meta blob lands, which the snapshot engine writes
/// last.
pub(crate) struct Catalog {
    store: Arc<dyn BlobStore>,
    root_path: String,
}

impl Catalog {
    pub(crate) fn new(store: Arc<dyn BlobStore>, root_path: impl Into<String>) -> Self {
        Self {
            store,
            root_path: root_path.into(),
        }
    }

    /// Reads one backup from its four meta blobs.
    ///
    /// Returns `Ok(None)` when the root meta blob is absent — the backup
    /// does not exist from the catalog's perspective, even if partial data
    /// sits under its prefix. A backup whose root blob exists but whose
    /// other blobs are missing or unreadable is an error.
    pub(crate) async fn read_backup(&self, name: &str) -> Result<Option<BackupInfo>, BackupError> {
        let root_meta = paths::backup_meta_path(&self.root_path, name);
        if !self.store.exist(&root_meta).await? {
            return Ok(None);
        }

        let blobs = BackupMetaBytes {
            backup_meta: self.store.read(&root_meta).await?,
            collection_meta: self
                .store
                .read(&paths::collection_meta_path(&self.root_path, name))
                .await?,
            partition_meta: self
                .store
                .read(&paths::partition_meta_path(&self.root_path, name))
                .await?,
            segment_meta: self
                .store
                .read(&paths::segment_meta_path(&self.root_path, name))
                .await?,
        };

        Ok(Some(meta::deserialize(&blobs)?))
    }

    /// Lists every readable backup, collecting the names of unreadable ones.
    ///
    /// With a collection filter, only backups containing a collection of
    /// that name are returned. Per-backup read failures never fail the
    /// listing.
    pub(crate) async fn list_backups(
        &self,
        collection_filter: Option<&str>,
    ) -> Result<(Vec<BackupInfo>, Vec<String>), BackupError> {
        let prefix = paths::backup_root_dir(&self.root_path);
        let entries = self.store.list_with_prefix(&prefix, false).await?;

        let mut backups = Vec::new();
        let mut fail_backups = Vec::new();
        for entry in entries {
            if !entry.is_dir() {
                continue;
            }
            let name = paths::backup_path_to_name(&entry.path);
            match self.read_backup(&name).await {
                Ok(Some(backup)) => {
                    let matches = collection_filter.is_none_or(|collection| {
                        backup
                            .collections
                            .iter()
                            .any(|c| c.collection_name == collection)
                    });
                    if matches {
                        backups.push(backup);
                    }
                }
                Ok(None) => {
                    // No root meta blob: in progress or abandoned, not a
                    // catalog entry.
                    tracing::debug!(name = %name, "skipping backup without a root meta blob");
                }
                Err(error) => {
                    tracing::warn!(name = %name, %error, "failed to read backup");
                    fail_backups.push(name);
                }
            }
        }

        Ok((backups, fail_backups))
    }

    /// Removes every object under the backup's prefix.
    pub(crate) async fn delete_backup(&self, name: &str) -> Result<(), BackupError> {
        self.store
            .remove_with_prefix(&paths::backup_dir(&self.root_path, name))
            .await?;
        Ok(())
    }
}
