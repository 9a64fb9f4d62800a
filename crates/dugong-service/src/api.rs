// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Request and response surface of the five backup operations.
//!
//! These are the types an RPC or CLI facade maps onto; the service itself
//! never returns a transport error — every outcome is carried in the
//! response [`Status`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use dugong_core::meta::BackupInfo;

/// Outcome class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    /// The operation completed.
    Success,
    /// The data engine or the blob store could not be reached on startup.
    ConnectFailed,
    /// Anything else; the reason carries the details.
    UnexpectedError,
}

/// Status attached to every response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Outcome class.
    pub status_code: StatusCode,
    /// Human-readable failure reason, absent on success.
    pub reason: Option<String>,
}

impl Status {
    /// A successful status.
    pub fn success() -> Self {
        Self {
            status_code: StatusCode::Success,
            reason: None,
        }
    }

    /// A connect-failure status with the given reason.
    pub fn connect_failed(reason: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::ConnectFailed,
            reason: Some(reason.into()),
        }
    }

    /// An unexpected-error status with the given reason.
    pub fn unexpected(reason: impl Into<String>) -> Self {
        Self {
            status_code: StatusCode::UnexpectedError,
            reason: Some(reason.into()),
        }
    }

    /// Whether the status reports success.
    pub fn is_success(&self) -> bool {
        self.status_code == StatusCode::Success
    }
}

/// Requests a new backup of the named collections (or of the whole cluster
/// when empty).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateBackupRequest {
    /// Backup name; auto-assigned from the current time when empty.
    pub backup_name: String,
    /// Collections to capture; empty means all.
    pub collection_names: Vec<String>,
}

/// Response of [`CreateBackupRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateBackupResponse {
    /// Operation status.
    pub status: Status,
    /// The finalized backup on success.
    pub backup_info: Option<BackupInfo>,
}

/// Requests one backup by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetBackupRequest {
    /// Backup name.
    pub backup_name: String,
}

/// Response of [`GetBackupRequest`]. A missing backup yields a successful
/// status with no `backup_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetBackupResponse {
    /// Operation status.
    pub status: Status,
    /// The backup, when it exists and is readable.
    pub backup_info: Option<BackupInfo>,
}

/// Lists the catalog, optionally restricted to backups containing a
/// collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBackupsRequest {
    /// When set, only backups containing this collection are returned.
    pub collection_name: Option<String>,
}

/// Response of [`ListBackupsRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListBackupsResponse {
    /// Operation status.
    pub status: Status,
    /// All readable backups.
    pub backup_infos: Vec<BackupInfo>,
    /// Names of backups that exist but could not be read.
    pub fail_backups: Vec<String>,
}

/// Deletes one backup by name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteBackupRequest {
    /// Backup name.
    pub backup_name: String,
}

/// Response of [`DeleteBackupRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteBackupResponse {
    /// Operation status.
    pub status: Status,
}

/// Restores a backup into the target cluster, possibly under new collection
/// names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBackupRequest {
    /// Backup to restore.
    pub backup_name: String,
    /// Collections to restore; empty means every collection in the backup.
    pub collection_names: Vec<String>,
    /// Per-collection renames; takes precedence over the suffix.
    pub collection_renames: BTreeMap<String, String>,
    /// Suffix appended to collection names without an explicit rename.
    pub collection_suffix: Option<String>,
}

/// Response of [`LoadBackupRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBackupResponse {
    /// Operation status.
    pub status: Status,
    /// The backup that was restored (or attempted).
    pub backup_info: Option<BackupInfo>,
    /// Per-collection restore tasks with their terminal states.
    pub collection_load_tasks: Vec<CollectionLoadTask>,
}

/// State of one per-collection restore task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    /// Planned but not started.
    Initial,
    /// Currently executing.
    Executing,
    /// Completed.
    Success,
    /// Aborted; `error_message` carries the reason.
    Fail,
}

/// One collection's restore task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionLoadTask {
    /// Task state.
    pub state: LoadState,
    /// Collection name inside the backup.
    pub collection_name: String,
    /// Name the collection is restored under.
    pub target_collection_name: String,
    /// Failure detail when the task failed.
    pub error_message: Option<String>,
}
