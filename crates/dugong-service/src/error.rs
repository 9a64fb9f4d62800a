// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The error taxonomy surfaced through operation statuses.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use dugong_core::paths::NameError;
use dugong_core::MetaError;

use crate::engine::EngineError;
use crate::storage::StoreError;

/// Errors that abort a backup, restore, or catalog operation.
///
/// The display form of an error becomes the `reason` of the operation
/// status, so the messages here are the ones operators grep for.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// A request argument failed validation or admission.
    #[error("{0}")]
    InputInvalid(String),

    /// No backup with the requested name exists in the catalog.
    #[error("backup doesn't exist: {name}")]
    BackupNotFound {
        /// The requested backup name.
        name: String,
    },

    /// A binary log referenced by the segment meta vanished before it could
    /// be copied. Almost always a race between flush and copy, or a
    /// misconfigured storage root.
    #[error("Binlog file not exist: {path}")]
    MissingSourceBlob {
        /// The missing source path.
        path: String,
    },

    /// A binary log path reported by the engine is not under the configured
    /// storage root, so no backup destination can be derived for it.
    #[error("binlog path is not under the configured storage root: {path}")]
    PathOutsideRoot {
        /// The offending source path.
        path: String,
    },

    /// A bulk ingest task reported failure.
    #[error("bulk ingest task {task_id} failed: {reason}")]
    IngestFailed {
        /// The failed task.
        task_id: i64,
        /// Engine-reported failure reason.
        reason: String,
    },

    /// A bulk ingest task did not reach a terminal state in time.
    #[error("bulk ingest task {task_id} did not finish within {timeout:?}")]
    Timeout {
        /// The task that timed out.
        task_id: i64,
        /// The configured wall-clock deadline.
        timeout: Duration,
    },

    /// The ambient cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    /// Blob store failure, propagated verbatim.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Data engine failure, propagated verbatim.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Metadata codec failure, propagated verbatim.
    #[error(transparent)]
    Meta(#[from] MetaError),
}

impl From<NameError> for BackupError {
    fn from(err: NameError) -> Self {
        BackupError::InputInvalid(err.to_string())
    }
}

/// Returns [`BackupError::Cancelled`] once the ambient token has fired.
///
/// Called between I/O steps so a cancelled snapshot or restore stops at the
/// next step boundary.
pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<(), BackupError> {
    if cancel.is_cancelled() {
        Err(BackupError::Cancelled)
    } else {
        Ok(())
    }
}
