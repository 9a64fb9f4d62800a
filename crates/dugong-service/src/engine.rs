// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Contract of the live data engine cluster.
//!
//! The cluster is an external collaborator; the engines only consume the
//! capabilities below. An implementation wraps the engine's client SDK and
//! is created lazily: [`DataEngineClient::start`] connects on the first
//! operation and [`DataEngineClient::close`] tears the connection down.

use std::collections::BTreeMap;

use async_trait::async_trait;

use dugong_core::meta::{CollectionSchema, ConsistencyLevel};
use dugong_core::{CollectionId, PartitionId, SegmentId};

/// Bulk ingest option carrying the logical timestamp up to which the data is
/// visible.
pub const INGEST_OPTION_END_TS: &str = "end_ts";
/// Bulk ingest option marking the job as a backup restore.
pub const INGEST_OPTION_BACKUP: &str = "backup";

/// Errors raised by the data engine adapter.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The cluster could not be reached.
    #[error("failed to connect to the data engine at {address}: {reason}")]
    Connect {
        /// The proxy address that was dialed.
        address: String,
        /// Transport-level detail.
        reason: String,
    },
    /// An engine RPC failed.
    #[error("data engine {op} failed: {reason}")]
    Rpc {
        /// The failing operation.
        op: &'static str,
        /// Engine-reported detail.
        reason: String,
    },
}

/// A collection as described by the engine.
///
/// Always obtained from a describe call; listing results are incomplete and
/// must not be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDescription {
    /// Engine-assigned collection id.
    pub id: CollectionId,
    /// Collection name.
    pub name: String,
    /// Complete schema.
    pub schema: CollectionSchema,
    /// Shard count.
    pub shards_num: i32,
    /// Consistency level.
    pub consistency_level: ConsistencyLevel,
}

/// A partition as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionDescription {
    /// Engine-assigned partition id.
    pub id: PartitionId,
    /// Partition name.
    pub name: String,
}

/// Result of a synchronous flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushResult {
    /// Segments the flush just sealed.
    pub new_sealed: Vec<SegmentId>,
    /// Segments that were already sealed beforehand.
    pub already_sealed: Vec<SegmentId>,
    /// Physical seal time in milliseconds, monotonically meaningful within
    /// the collection.
    pub seal_time: i64,
}

impl FlushResult {
    /// The snapshot segment set: everything sealed at or before the flush.
    pub fn sealed_segment_ids(&self) -> impl Iterator<Item = SegmentId> + '_ {
        self.new_sealed
            .iter()
            .chain(self.already_sealed.iter())
            .copied()
    }
}

/// A persistent segment as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentDescription {
    /// Engine-assigned segment id.
    pub id: SegmentId,
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Owning partition.
    pub partition_id: PartitionId,
    /// Row count at seal time.
    pub num_rows: i64,
}

/// Terminal and transient states of a bulk ingest task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkIngestState {
    /// Queued, not yet running.
    Pending,
    /// Running.
    Running,
    /// Finished successfully.
    Completed,
    /// Failed; the progress carries the reason.
    Failed,
}

/// State snapshot of one bulk ingest task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkIngestProgress {
    /// Current state.
    pub state: BulkIngestState,
    /// Failure reason, when failed.
    pub reason: Option<String>,
}

/// Capabilities of the live cluster consumed by the backup engines.
#[async_trait]
pub trait DataEngineClient: Send + Sync {
    /// Connects the underlying client. Called lazily before the first
    /// operation.
    async fn start(&self) -> Result<(), EngineError>;

    /// Tears the underlying client down.
    async fn close(&self) -> Result<(), EngineError>;

    /// Lists all collections. Results are incomplete; describe before
    /// persisting.
    async fn list_collections(&self) -> Result<Vec<CollectionDescription>, EngineError>;

    /// Whether a collection with the given name exists.
    async fn has_collection(&self, name: &str) -> Result<bool, EngineError>;

    /// Describes one collection completely.
    async fn describe_collection(&self, name: &str)
        -> Result<CollectionDescription, EngineError>;

    /// Lists the partitions of a collection.
    async fn show_partitions(
        &self,
        collection: &str,
    ) -> Result<Vec<PartitionDescription>, EngineError>;

    /// Seals the growing segments of a collection. With `async_flush` false
    /// the call returns only once the seal is durable.
    async fn flush(&self, collection: &str, async_flush: bool)
        -> Result<FlushResult, EngineError>;

    /// Lists the persistent segments of a collection.
    async fn get_persistent_segment_info(
        &self,
        collection: &str,
    ) -> Result<Vec<SegmentDescription>, EngineError>;

    /// Creates a collection from a saved schema. The schema's `name` is the
    /// target collection name.
    async fn create_collection(
        &self,
        schema: &CollectionSchema,
        shards_num: i32,
        consistency_level: ConsistencyLevel,
    ) -> Result<(), EngineError>;

    /// Whether a partition exists in a collection.
    async fn has_partition(&self, collection: &str, partition: &str)
        -> Result<bool, EngineError>;

    /// Creates a partition.
    async fn create_partition(
        &self,
        collection: &str,
        partition: &str,
    ) -> Result<(), EngineError>;

    /// Submits a bulk ingest job over the given file arguments and returns
    /// the task ids to poll.
    async fn bulk_ingest(
        &self,
        collection: &str,
        partition: &str,
        row_based: bool,
        files: &[String],
        options: &BTreeMap<String, String>,
    ) -> Result<Vec<i64>, EngineError>;

    /// Reads the state of one bulk ingest task.
    async fn get_bulk_ingest_state(&self, task_id: i64)
        -> Result<BulkIngestProgress, EngineError>;
}
