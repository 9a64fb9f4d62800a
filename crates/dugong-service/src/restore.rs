// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The restore engine behind `LoadBackup`.
//!
//! Restoring plans one task per selected collection, admits the whole plan
//! only when none of the target names exists in the cluster, and then
//! executes sequentially: recreate the schema, ensure the partitions, and
//! drive one column-based bulk ingest per partition to a terminal state.
//! Nothing is rolled back on failure; collections created before the
//! failing task stay in the cluster.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use dugong_core::meta::{BackupInfo, CollectionBackupInfo, PartitionBackupInfo};
use dugong_core::paths::{self, LogKind};

use crate::api::{CollectionLoadTask, LoadBackupRequest, LoadState};
use crate::catalog::Catalog;
use crate::config::BackupConfig;
use crate::engine::{
    BulkIngestState, DataEngineClient, INGEST_OPTION_BACKUP, INGEST_OPTION_END_TS,
};
use crate::error::{ensure_active, BackupError};
use crate::storage::BlobStore;

/// Bulk ingest during restore is always column-based: row-based ingest
/// cannot reproduce the internal segment layout.
pub(crate) const BACKUP_ROW_BASED: bool = false;

pub(crate) struct RestoreEngine<'a> {
    pub store: &'a Arc<dyn BlobStore>,
    pub engine: &'a Arc<dyn DataEngineClient>,
    pub config: &'a BackupConfig,
    pub cancel: &'a CancellationToken,
}

/// Outcome of a restore that got past planning: the tasks with their
/// terminal states, and the error that aborted execution, if any.
pub(crate) struct LoadReport {
    pub backup: BackupInfo,
    pub tasks: Vec<CollectionLoadTask>,
    pub failure: Option<BackupError>,
}

impl RestoreEngine<'_> {
    pub(crate) async fn run(
        &self,
        request: &LoadBackupRequest,
        catalog: &Catalog,
    ) -> Result<LoadReport, BackupError> {
        // Validate the suffix before touching anything.
        let suffix = request
            .collection_suffix
            .as_deref()
            .filter(|suffix| !suffix.is_empty());
        if let Some(suffix) = suffix {
            paths::validate_collection_suffix(suffix)?;
        }

        let backup = catalog
            .read_backup(&request.backup_name)
            .await?
            .ok_or_else(|| BackupError::BackupNotFound {
                name: request.backup_name.clone(),
            })?;
        tracing::info!(backup = %backup.name, "loaded backup to restore");

        // Plan: select collections and compute target names. An explicit
        // rename wins over the suffix; with neither, the target keeps the
        // original name.
        let selected: Vec<CollectionBackupInfo> = if request.collection_names.is_empty() {
            backup.collections.clone()
        } else {
            backup
                .collections
                .iter()
                .filter(|collection| {
                    request
                        .collection_names
                        .iter()
                        .any(|name| *name == collection.collection_name)
                })
                .cloned()
                .collect()
        };
        tracing::info!(collections = selected.len(), "collections to restore");

        let mut tasks = Vec::with_capacity(selected.len());
        for collection in &selected {
            let source = collection.collection_name.clone();
            let target = match request
                .collection_renames
                .get(&source)
                .filter(|renamed| !renamed.is_empty())
            {
                Some(renamed) => renamed.clone(),
                None => match suffix {
                    Some(suffix) => format!("{source}{suffix}"),
                    None => source.clone(),
                },
            };

            // Admission: reject the entire restore on any live target.
            ensure_active(self.cancel)?;
            if self.engine.has_collection(&target).await? {
                tracing::error!(
                    source = %source,
                    target_collection = %target,
                    "restore target collection already exists"
                );
                return Err(BackupError::InputInvalid(format!(
                    "load target collection already exists in the cluster: {target}"
                )));
            }

            tasks.push(CollectionLoadTask {
                state: LoadState::Initial,
                collection_name: source,
                target_collection_name: target,
                error_message: None,
            });
        }

        // Execute sequentially; the first failure aborts the restore.
        for (task, collection) in tasks.iter_mut().zip(&selected) {
            task.state = LoadState::Executing;
            match self
                .restore_collection(&backup.name, collection, &task.target_collection_name)
                .await
            {
                Ok(()) => task.state = LoadState::Success,
                Err(error) => {
                    task.state = LoadState::Fail;
                    task.error_message = Some(error.to_string());
                    tracing::error!(
                        collection = %task.collection_name,
                        target_collection = %task.target_collection_name,
                        %error,
                        "restore task failed"
                    );
                    return Ok(LoadReport {
                        backup,
                        tasks,
                        failure: Some(error),
                    });
                }
            }
        }

        Ok(LoadReport {
            backup,
            tasks,
            failure: None,
        })
    }

    /// Restores one collection under its target name.
    async fn restore_collection(
        &self,
        backup_name: &str,
        collection: &CollectionBackupInfo,
        target: &str,
    ) -> Result<(), BackupError> {
        ensure_active(self.cancel)?;

        // The saved schema round-trips verbatim, only the name changes.
        let mut schema = collection.schema.clone();
        schema.name = target.to_owned();
        self.engine
            .create_collection(&schema, collection.shards_num, collection.consistency_level)
            .await?;
        tracing::info!(target_collection = %target, shards = collection.shards_num, "created collection");

        for partition in &collection.partitions {
            ensure_active(self.cancel)?;
            if !self
                .engine
                .has_partition(target, &partition.partition_name)
                .await?
            {
                self.engine
                    .create_partition(target, &partition.partition_name)
                    .await?;
            }

            let files = self.partition_files(backup_name, partition).await?;
            let mut options = BTreeMap::new();
            options.insert(
                INGEST_OPTION_END_TS.to_owned(),
                collection.backup_timestamp.to_string(),
            );
            options.insert(INGEST_OPTION_BACKUP.to_owned(), "true".to_owned());

            tracing::debug!(
                target_collection = %target,
                partition = %partition.partition_name,
                ?files,
                "submitting bulk ingest"
            );
            let task_ids = self
                .engine
                .bulk_ingest(
                    target,
                    &partition.partition_name,
                    BACKUP_ROW_BASED,
                    &files,
                    &options,
                )
                .await?;
            for task_id in task_ids {
                self.watch_bulk_ingest(task_id).await?;
            }
        }
        Ok(())
    }

    /// Derives the bulk ingest file arguments from the backup's
    /// per-partition directories. A missing delta directory is passed as an
    /// empty argument.
    async fn partition_files(
        &self,
        backup_name: &str,
        partition: &PartitionBackupInfo,
    ) -> Result<Vec<String>, BackupError> {
        let root = &self.config.storage.root_path;
        let insert_dir = paths::partition_log_dir(
            root,
            backup_name,
            LogKind::Insert,
            partition.collection_id,
            partition.partition_id,
        );
        let delta_dir = paths::partition_log_dir(
            root,
            backup_name,
            LogKind::Delta,
            partition.collection_id,
            partition.partition_id,
        );

        if self.store.exist(&delta_dir).await? {
            Ok(vec![insert_dir, delta_dir])
        } else {
            Ok(vec![insert_dir, String::new()])
        }
    }

    /// Polls one bulk ingest task to a terminal state, bounded by the
    /// configured wall-clock deadline.
    async fn watch_bulk_ingest(&self, task_id: i64) -> Result<(), BackupError> {
        let started = Instant::now();
        loop {
            ensure_active(self.cancel)?;
            let progress = self.engine.get_bulk_ingest_state(task_id).await?;
            tracing::debug!(task_id, state = ?progress.state, "bulk ingest state");
            match progress.state {
                BulkIngestState::Completed => return Ok(()),
                BulkIngestState::Failed => {
                    return Err(BackupError::IngestFailed {
                        task_id,
                        reason: progress.reason.unwrap_or_else(|| "unknown".to_owned()),
                    });
                }
                BulkIngestState::Pending | BulkIngestState::Running => {
                    if started.elapsed() >= self.config.bulk_ingest_timeout {
                        return Err(BackupError::Timeout {
                            task_id,
                            timeout: self.config.bulk_ingest_timeout,
                        });
                    }
                    tokio::time::sleep(self.config.bulk_ingest_poll_interval).await;
                }
            }
        }
    }
}
