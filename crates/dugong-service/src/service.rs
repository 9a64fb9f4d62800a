// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The five-operation backup service.
//!
//! `CreateBackup` and `LoadBackup` are serialized by a process-wide mutex:
//! at most one mutating operation runs at a time. The read-side operations
//! run without the lock and observe only fully written backups.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::{
    CreateBackupRequest, CreateBackupResponse, DeleteBackupRequest, DeleteBackupResponse,
    GetBackupRequest, GetBackupResponse, ListBackupsRequest, ListBackupsResponse,
    LoadBackupRequest, LoadBackupResponse, Status,
};
use crate::catalog::Catalog;
use crate::config::BackupConfig;
use crate::engine::DataEngineClient;
use crate::error::BackupError;
use crate::restore::RestoreEngine;
use crate::snapshot::SnapshotEngine;
use crate::storage::{BlobStore, ObjectBlobStore, StoreError};

/// Backup service over one object storage deployment and one data engine
/// cluster.
pub struct BackupService {
    config: BackupConfig,
    store: Arc<dyn BlobStore>,
    engine: Arc<dyn DataEngineClient>,
    /// Serializes the mutating operations.
    mutating: Mutex<()>,
    /// Guards the lazy engine connection.
    started: Mutex<bool>,
    cancel: CancellationToken,
}

impl BackupService {
    /// Creates a service over explicit adapters.
    pub fn new(
        config: BackupConfig,
        store: Arc<dyn BlobStore>,
        engine: Arc<dyn DataEngineClient>,
    ) -> Self {
        Self {
            config,
            store,
            engine,
            mutating: Mutex::new(()),
            started: Mutex::new(false),
            cancel: CancellationToken::new(),
        }
    }

    /// Creates a service over the configured object storage deployment and
    /// the given engine client.
    pub fn connect(
        config: BackupConfig,
        engine: Arc<dyn DataEngineClient>,
    ) -> Result<Self, StoreError> {
        let store = Arc::new(ObjectBlobStore::from_config(&config.storage)?);
        Ok(Self::new(config, store, engine))
    }

    /// A token that cancels in-flight snapshot and restore work when
    /// triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Closes the engine connection.
    pub async fn close(&self) -> Result<(), BackupError> {
        let mut started = self.started.lock().await;
        if *started {
            self.engine.close().await?;
            *started = false;
        }
        Ok(())
    }

    /// Connects the engine client on the first operation that needs it.
    async fn ensure_started(&self) -> Result<(), BackupError> {
        let mut started = self.started.lock().await;
        if !*started {
            tracing::debug!(
                address = %self.config.engine.proxy_addr(),
                "starting data engine client"
            );
            self.engine.start().await?;
            *started = true;
        }
        Ok(())
    }

    fn catalog(&self) -> Catalog {
        Catalog::new(Arc::clone(&self.store), self.config.storage.root_path.clone())
    }

    /// Captures a new backup of the requested collections.
    pub async fn create_backup(&self, request: &CreateBackupRequest) -> CreateBackupResponse {
        let _mutating = self.mutating.lock().await;

        if let Err(error) = self.ensure_started().await {
            return CreateBackupResponse {
                status: Status::connect_failed(error.to_string()),
                backup_info: None,
            };
        }

        let snapshot = SnapshotEngine {
            store: &self.store,
            engine: &self.engine,
            config: &self.config,
            cancel: &self.cancel,
        };
        match snapshot
            .run(
                &request.backup_name,
                &request.collection_names,
                &self.catalog(),
            )
            .await
        {
            Ok(backup) => CreateBackupResponse {
                status: Status::success(),
                backup_info: Some(backup),
            },
            Err(error) => {
                tracing::error!(name = %request.backup_name, %error, "create backup failed");
                CreateBackupResponse {
                    status: Status::unexpected(error.to_string()),
                    backup_info: None,
                }
            }
        }
    }

    /// Reads one backup by name. A missing backup yields a successful
    /// status with no `backup_info`.
    pub async fn get_backup(&self, request: &GetBackupRequest) -> GetBackupResponse {
        if let Err(error) = self.ensure_started().await {
            return GetBackupResponse {
                status: Status::connect_failed(error.to_string()),
                backup_info: None,
            };
        }

        if request.backup_name.is_empty() {
            return GetBackupResponse {
                status: Status::unexpected("empty backup name"),
                backup_info: None,
            };
        }

        match self.catalog().read_backup(&request.backup_name).await {
            Ok(backup_info) => GetBackupResponse {
                status: Status::success(),
                backup_info,
            },
            Err(error) => {
                tracing::warn!(name = %request.backup_name, %error, "failed to read backup");
                GetBackupResponse {
                    status: Status::unexpected(error.to_string()),
                    backup_info: None,
                }
            }
        }
    }

    /// Lists all readable backups, optionally filtered by contained
    /// collection.
    pub async fn list_backups(&self, request: &ListBackupsRequest) -> ListBackupsResponse {
        if let Err(error) = self.ensure_started().await {
            return ListBackupsResponse {
                status: Status::connect_failed(error.to_string()),
                backup_infos: Vec::new(),
                fail_backups: Vec::new(),
            };
        }

        match self
            .catalog()
            .list_backups(request.collection_name.as_deref())
            .await
        {
            Ok((backup_infos, fail_backups)) => ListBackupsResponse {
                status: Status::success(),
                backup_infos,
                fail_backups,
            },
            Err(error) => {
                tracing::error!(%error, "failed to list backups");
                ListBackupsResponse {
                    status: Status::unexpected(error.to_string()),
                    backup_infos: Vec::new(),
                    fail_backups: Vec::new(),
                }
            }
        }
    }

    /// Deletes one backup and everything under its prefix.
    pub async fn delete_backup(&self, request: &DeleteBackupRequest) -> DeleteBackupResponse {
        if let Err(error) = self.ensure_started().await {
            return DeleteBackupResponse {
                status: Status::connect_failed(error.to_string()),
            };
        }

        if request.backup_name.is_empty() {
            return DeleteBackupResponse {
                status: Status::unexpected("empty backup name"),
            };
        }

        match self.catalog().delete_backup(&request.backup_name).await {
            Ok(()) => DeleteBackupResponse {
                status: Status::success(),
            },
            Err(error) => {
                tracing::error!(name = %request.backup_name, %error, "failed to delete backup");
                DeleteBackupResponse {
                    status: Status::unexpected(error.to_string()),
                }
            }
        }
    }

    /// Restores a backup into the cluster, possibly under new collection
    /// names.
    pub async fn load_backup(&self, request: &LoadBackupRequest) -> LoadBackupResponse {
        let _mutating = self.mutating.lock().await;

        if let Err(error) = self.ensure_started().await {
            return LoadBackupResponse {
                status: Status::connect_failed(error.to_string()),
                backup_info: None,
                collection_load_tasks: Vec::new(),
            };
        }

        let restore = RestoreEngine {
            store: &self.store,
            engine: &self.engine,
            config: &self.config,
            cancel: &self.cancel,
        };
        match restore.run(request, &self.catalog()).await {
            Ok(report) => {
                let status = match &report.failure {
                    None => Status::success(),
                    Some(error) => Status::unexpected(error.to_string()),
                };
                LoadBackupResponse {
                    status,
                    backup_info: Some(report.backup),
                    collection_load_tasks: report.tasks,
                }
            }
            Err(error) => {
                tracing::error!(name = %request.backup_name, %error, "load backup failed");
                LoadBackupResponse {
                    status: Status::unexpected(error.to_string()),
                    backup_info: None,
                    collection_load_tasks: Vec::new(),
                }
            }
        }
    }
}
