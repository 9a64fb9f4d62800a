// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The snapshot engine behind `CreateBackup`.
//!
//! A snapshot binds a logical backup point to the set of segments sealed by
//! a synchronous flush, captures their binary logs into the backup's own
//! prefix, and finalizes by writing the four meta blobs — the root blob
//! last, since writing it is what makes the backup visible to the catalog.
//!
//! Any failure aborts the whole backup; data already copied is left in the
//! bucket for the caller to delete.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use dugong_core::meta::{
    self, BackupInfo, BackupStatus, Binlog, CollectionBackupInfo, FieldBinlog,
    LeveledBackupInfo, PartitionBackupInfo, SegmentBackupInfo,
};
use dugong_core::paths::{self, LogKind, SEPARATOR};
use dugong_core::{compose_ts, FieldId, SegmentId};

use crate::catalog::Catalog;
use crate::config::BackupConfig;
use crate::engine::{CollectionDescription, DataEngineClient, SegmentDescription};
use crate::error::{ensure_active, BackupError};
use crate::storage::BlobStore;

pub(crate) struct SnapshotEngine<'a> {
    pub store: &'a Arc<dyn BlobStore>,
    pub engine: &'a Arc<dyn DataEngineClient>,
    pub config: &'a BackupConfig,
    pub cancel: &'a CancellationToken,
}

fn unix_now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

impl SnapshotEngine<'_> {
    /// Runs a whole backup and returns the finalized tree.
    pub(crate) async fn run(
        &self,
        request_name: &str,
        collection_names: &[String],
        catalog: &Catalog,
    ) -> Result<BackupInfo, BackupError> {
        // Admission: the name must pass policy and be free in the catalog.
        if !request_name.is_empty() {
            paths::validate_backup_name(request_name)?;
            if catalog.read_backup(request_name).await?.is_some() {
                return Err(BackupError::InputInvalid(format!(
                    "backup already exist with the name: {request_name}"
                )));
            }
        }

        let targets = self.enumerate_collections(collection_names).await?;
        tracing::info!(
            collections = ?targets.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "collections to back up"
        );

        // Collect complete collection metadata. Listing results are
        // incomplete, so every collection is described again.
        let mut completes = Vec::with_capacity(targets.len());
        let mut collection_infos = Vec::with_capacity(targets.len());
        for target in &targets {
            ensure_active(self.cancel)?;
            let complete = self.engine.describe_collection(&target.name).await?;
            collection_infos.push(CollectionBackupInfo {
                collection_id: complete.id,
                db_name: String::new(),
                collection_name: complete.name.clone(),
                schema: complete.schema.clone(),
                shards_num: complete.shards_num,
                consistency_level: complete.consistency_level,
                backup_timestamp: 0,
                partitions: Vec::new(),
            });
            completes.push(complete);
        }

        let partition_infos = self.enumerate_partitions(&completes).await?;

        // Seal the snapshot. The flush result defines the segment set; the
        // seal time becomes the collection's backup timestamp.
        let mut snapshot_sets: BTreeMap<String, BTreeSet<SegmentId>> = BTreeMap::new();
        let mut seal_times: BTreeMap<String, i64> = BTreeMap::new();
        for collection in &completes {
            ensure_active(self.cancel)?;
            let flush = self.engine.flush(&collection.name, false).await?;
            tracing::info!(
                collection = %collection.name,
                new_sealed = ?flush.new_sealed,
                already_sealed = ?flush.already_sealed,
                seal_time = flush.seal_time,
                "flushed collection"
            );
            snapshot_sets.insert(collection.name.clone(), flush.sealed_segment_ids().collect());
            seal_times.insert(collection.name.clone(), flush.seal_time);
        }
        for info in &mut collection_infos {
            if let Some(&seal_time) = seal_times.get(&info.collection_name) {
                info.backup_timestamp = compose_ts(seal_time, 0);
            }
        }

        // Enumerate the segment layout of everything inside the snapshot
        // set. Segments that appear only now post-date the seal and are
        // skipped.
        let mut segment_infos = Vec::new();
        for collection in &completes {
            ensure_active(self.cancel)?;
            let snapshot_set = &snapshot_sets[&collection.name];
            for segment in self
                .engine
                .get_persistent_segment_info(&collection.name)
                .await?
            {
                if !snapshot_set.contains(&segment.id) {
                    tracing::debug!(
                        segment_id = segment.id,
                        "segment sealed after the snapshot flush, skipping"
                    );
                    continue;
                }
                let info = self.read_segment_layout(&segment).await?;
                if info.binlogs.is_empty() {
                    tracing::warn!(segment_id = segment.id, "segment has no insert binlogs");
                }
                segment_infos.push(info);
            }
        }
        tracing::info!(segments = segment_infos.len(), "collected segment layout");

        let name = if request_name.is_empty() {
            format!("backup_{}", unix_now_seconds())
        } else {
            request_name.to_owned()
        };

        self.copy_binlogs(&segment_infos, &name).await?;

        let mut backup = LeveledBackupInfo {
            root: BackupInfo::new(name),
            collections: collection_infos,
            partitions: partition_infos,
            segments: segment_infos,
        }
        .into_tree()?;

        self.finalize(&mut backup).await?;
        Ok(backup)
    }

    async fn enumerate_collections(
        &self,
        collection_names: &[String],
    ) -> Result<Vec<CollectionDescription>, BackupError> {
        if collection_names.is_empty() {
            return Ok(self.engine.list_collections().await?);
        }
        let mut targets = Vec::with_capacity(collection_names.len());
        for name in collection_names {
            ensure_active(self.cancel)?;
            if !self.engine.has_collection(name).await? {
                return Err(BackupError::InputInvalid(format!(
                    "request backup collection does not exist: {name}"
                )));
            }
            targets.push(self.engine.describe_collection(name).await?);
        }
        Ok(targets)
    }

    async fn enumerate_partitions(
        &self,
        collections: &[CollectionDescription],
    ) -> Result<Vec<PartitionBackupInfo>, BackupError> {
        let mut partitions = Vec::new();
        for collection in collections {
            ensure_active(self.cancel)?;
            for partition in self.engine.show_partitions(&collection.name).await? {
                partitions.push(PartitionBackupInfo {
                    partition_id: partition.id,
                    partition_name: partition.name,
                    collection_id: collection.id,
                    segments: Vec::new(),
                });
            }
        }
        Ok(partitions)
    }

    /// Reads one segment's binlog layout from the live store.
    async fn read_segment_layout(
        &self,
        segment: &SegmentDescription,
    ) -> Result<SegmentBackupInfo, BackupError> {
        let binlogs = self.read_field_binlogs(LogKind::Insert, segment).await?;
        let mut deltalogs = self.read_field_binlogs(LogKind::Delta, segment).await?;
        if deltalogs.is_empty() {
            // A segment without deletions still records an empty delta entry.
            deltalogs.push(FieldBinlog {
                field_id: 0,
                binlogs: Vec::new(),
            });
        }
        let statslogs = self.read_field_binlogs(LogKind::Stats, segment).await?;

        Ok(SegmentBackupInfo {
            segment_id: segment.id,
            collection_id: segment.collection_id,
            partition_id: segment.partition_id,
            num_of_rows: segment.num_rows,
            binlogs,
            deltalogs,
            statslogs,
        })
    }

    async fn read_field_binlogs(
        &self,
        kind: LogKind,
        segment: &SegmentDescription,
    ) -> Result<Vec<FieldBinlog>, BackupError> {
        let segment_dir = paths::segment_log_dir(
            &self.config.storage.root_path,
            kind,
            segment.collection_id,
            segment.partition_id,
            segment.id,
        );

        let mut fields = Vec::new();
        for entry in self.store.list_with_prefix(&segment_dir, false).await? {
            let Some(field_dir) = entry.path.strip_suffix(SEPARATOR) else {
                continue;
            };
            let field_name = field_dir.rsplit(SEPARATOR).next().unwrap_or_default();
            let Ok(field_id) = field_name.parse::<FieldId>() else {
                tracing::warn!(path = %entry.path, "unexpected entry in segment log directory");
                continue;
            };

            let binlogs = self
                .store
                .list_with_prefix(&entry.path, false)
                .await?
                .into_iter()
                .filter(|record| !record.is_dir())
                .map(|record| Binlog {
                    log_path: record.path,
                })
                .collect();
            fields.push(FieldBinlog { field_id, binlogs });
        }
        Ok(fields)
    }

    /// Copies every insert and delta log into the backup prefix with a
    /// bounded fan-out. All copies complete before the meta is written.
    async fn copy_binlogs(
        &self,
        segments: &[SegmentBackupInfo],
        backup_name: &str,
    ) -> Result<(), BackupError> {
        let root = &self.config.storage.root_path;
        let mut copies = Vec::new();
        for segment in segments {
            // Stats logs are intentionally absent: the restore side never
            // reads them from the backup.
            for field in segment.binlogs.iter().chain(segment.deltalogs.iter()) {
                for log in &field.binlogs {
                    let Some(target) =
                        paths::rewrite_to_backup_path(&log.log_path, root, backup_name)
                    else {
                        tracing::error!(
                            path = %log.log_path,
                            root = %root,
                            "binlog path not under the configured storage root"
                        );
                        return Err(BackupError::PathOutsideRoot {
                            path: log.log_path.clone(),
                        });
                    };
                    copies.push((log.log_path.clone(), target));
                }
            }
        }
        tracing::info!(files = copies.len(), "copying binary logs into the backup");

        stream::iter(copies)
            .map(|(src, dst)| {
                let store = Arc::clone(self.store);
                let cancel = self.cancel.clone();
                async move {
                    ensure_active(&cancel)?;
                    if !store.exist(&src).await? {
                        tracing::error!(file = %src, "binlog vanished between flush and copy");
                        return Err(BackupError::MissingSourceBlob { path: src });
                    }
                    store.copy(&src, &dst).await?;
                    tracing::debug!(from = %src, to = %dst, "copied binlog");
                    Ok(())
                }
            })
            .buffer_unordered(self.config.copy_concurrency.max(1))
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    /// Marks the backup successful and writes the four meta blobs, the root
    /// blob last.
    async fn finalize(&self, backup: &mut BackupInfo) -> Result<(), BackupError> {
        ensure_active(self.cancel)?;
        backup.status = BackupStatus::Success;
        backup.backup_timestamp = unix_now_seconds();

        let root = &self.config.storage.root_path;
        let blobs = meta::serialize(backup)?;
        self.store
            .write(
                &paths::collection_meta_path(root, &backup.name),
                &blobs.collection_meta,
            )
            .await?;
        self.store
            .write(
                &paths::partition_meta_path(root, &backup.name),
                &blobs.partition_meta,
            )
            .await?;
        self.store
            .write(
                &paths::segment_meta_path(root, &backup.name),
                &blobs.segment_meta,
            )
            .await?;
        self.store
            .write(
                &paths::backup_meta_path(root, &backup.name),
                &blobs.backup_meta,
            )
            .await?;

        tracing::info!(
            name = %backup.name,
            collections = backup.collections.len(),
            "backup finalized"
        );
        Ok(())
    }
}
