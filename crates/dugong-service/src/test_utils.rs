// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a scriptable in-memory data engine and helpers for
//! seeding binlog layouts into a blob store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;

use dugong_core::meta::{CollectionSchema, ConsistencyLevel, DataType, FieldSchema};
use dugong_core::paths::{self, LogKind};
use dugong_core::{CollectionId, FieldId, PartitionId, SegmentId};

use crate::engine::{
    BulkIngestProgress, BulkIngestState, CollectionDescription, DataEngineClient, EngineError,
    FlushResult, PartitionDescription, SegmentDescription,
};
use crate::storage::BlobStore;

/// A collection the mock cluster serves to the snapshot engine.
#[derive(Debug, Clone)]
pub struct MockCollection {
    /// Complete description returned by describe calls.
    pub description: CollectionDescription,
    /// Partitions returned by `show_partitions`.
    pub partitions: Vec<PartitionDescription>,
    /// Result of the snapshot flush.
    pub flush: FlushResult,
    /// Segments returned by `get_persistent_segment_info`; may contain
    /// segments sealed after the flush.
    pub persistent_segments: Vec<SegmentDescription>,
}

/// A collection created through the restore path.
#[derive(Debug, Clone)]
pub struct CreatedCollection {
    /// The schema handed to `create_collection`; its name is the target.
    pub schema: CollectionSchema,
    /// Requested shard count.
    pub shards_num: i32,
    /// Requested consistency level.
    pub consistency_level: ConsistencyLevel,
}

/// A recorded bulk ingest submission.
#[derive(Debug, Clone)]
pub struct IngestJob {
    /// Target collection.
    pub collection: String,
    /// Target partition.
    pub partition: String,
    /// Whether row-based ingest was requested.
    pub row_based: bool,
    /// File arguments.
    pub files: Vec<String>,
    /// Ingest options.
    pub options: BTreeMap<String, String>,
}

/// How the mock engine drives submitted ingest tasks.
#[derive(Debug, Clone, Default)]
pub enum IngestOutcome {
    /// Tasks complete immediately.
    #[default]
    Complete,
    /// Tasks fail with the given reason.
    Fail(String),
    /// Tasks stay running forever; used to exercise the poll deadline.
    Hang,
}

#[derive(Default)]
struct MockState {
    fail_start: Option<String>,
    collections: Vec<MockCollection>,
    live: BTreeSet<String>,
    created: Vec<CreatedCollection>,
    created_partitions: Vec<(String, String)>,
    ingest_jobs: Vec<IngestJob>,
    ingest_outcome: IngestOutcome,
    next_task_id: i64,
}

/// A scriptable [`DataEngineClient`] backed by in-memory state.
#[derive(Default)]
pub struct MockDataEngine {
    state: Mutex<MockState>,
}

impl MockDataEngine {
    /// Creates an empty mock cluster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `start` fail with the given reason.
    pub fn fail_start(&self, reason: impl Into<String>) {
        self.state.lock().unwrap().fail_start = Some(reason.into());
    }

    /// Adds a collection to the cluster.
    pub fn add_collection(&self, collection: MockCollection) {
        let mut state = self.state.lock().unwrap();
        state.live.insert(collection.description.name.clone());
        state.collections.push(collection);
    }

    /// Marks a bare collection name as live, without any backing data.
    pub fn add_live_name(&self, name: impl Into<String>) {
        self.state.lock().unwrap().live.insert(name.into());
    }

    /// Scripts the outcome of submitted ingest tasks.
    pub fn set_ingest_outcome(&self, outcome: IngestOutcome) {
        self.state.lock().unwrap().ingest_outcome = outcome;
    }

    /// Collections created through the restore path so far.
    pub fn created_collections(&self) -> Vec<CreatedCollection> {
        self.state.lock().unwrap().created.clone()
    }

    /// Partitions created through the restore path so far.
    pub fn created_partitions(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().created_partitions.clone()
    }

    /// Ingest jobs submitted so far.
    pub fn ingest_jobs(&self) -> Vec<IngestJob> {
        self.state.lock().unwrap().ingest_jobs.clone()
    }
}

fn rpc(op: &'static str, reason: impl Into<String>) -> EngineError {
    EngineError::Rpc {
        op,
        reason: reason.into(),
    }
}

#[async_trait]
impl DataEngineClient for MockDataEngine {
    async fn start(&self) -> Result<(), EngineError> {
        match &self.state.lock().unwrap().fail_start {
            Some(reason) => Err(EngineError::Connect {
                address: "mock:19530".to_owned(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionDescription>, EngineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .collections
            .iter()
            .map(|collection| collection.description.clone())
            .collect())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, EngineError> {
        Ok(self.state.lock().unwrap().live.contains(name))
    }

    async fn describe_collection(
        &self,
        name: &str,
    ) -> Result<CollectionDescription, EngineError> {
        self.state
            .lock()
            .unwrap()
            .collections
            .iter()
            .find(|collection| collection.description.name == name)
            .map(|collection| collection.description.clone())
            .ok_or_else(|| rpc("describe_collection", format!("collection not found: {name}")))
    }

    async fn show_partitions(
        &self,
        collection: &str,
    ) -> Result<Vec<PartitionDescription>, EngineError> {
        self.state
            .lock()
            .unwrap()
            .collections
            .iter()
            .find(|c| c.description.name == collection)
            .map(|c| c.partitions.clone())
            .ok_or_else(|| rpc("show_partitions", format!("collection not found: {collection}")))
    }

    async fn flush(
        &self,
        collection: &str,
        _async_flush: bool,
    ) -> Result<FlushResult, EngineError> {
        self.state
            .lock()
            .unwrap()
            .collections
            .iter()
            .find(|c| c.description.name == collection)
            .map(|c| c.flush.clone())
            .ok_or_else(|| rpc("flush", format!("collection not found: {collection}")))
    }

    async fn get_persistent_segment_info(
        &self,
        collection: &str,
    ) -> Result<Vec<SegmentDescription>, EngineError> {
        self.state
            .lock()
            .unwrap()
            .collections
            .iter()
            .find(|c| c.description.name == collection)
            .map(|c| c.persistent_segments.clone())
            .ok_or_else(|| {
                rpc(
                    "get_persistent_segment_info",
                    format!("collection not found: {collection}"),
                )
            })
    }

    async fn create_collection(
        &self,
        schema: &CollectionSchema,
        shards_num: i32,
        consistency_level: ConsistencyLevel,
    ) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap();
        if state.live.contains(&schema.name) {
            return Err(rpc(
                "create_collection",
                format!("collection already exists: {}", schema.name),
            ));
        }
        state.live.insert(schema.name.clone());
        state.created.push(CreatedCollection {
            schema: schema.clone(),
            shards_num,
            consistency_level,
        });
        Ok(())
    }

    async fn has_partition(
        &self,
        collection: &str,
        partition: &str,
    ) -> Result<bool, EngineError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .created_partitions
            .iter()
            .any(|(c, p)| c == collection && p == partition))
    }

    async fn create_partition(
        &self,
        collection: &str,
        partition: &str,
    ) -> Result<(), EngineError> {
        self.state
            .lock()
            .unwrap()
            .created_partitions
            .push((collection.to_owned(), partition.to_owned()));
        Ok(())
    }

    async fn bulk_ingest(
        &self,
        collection: &str,
        partition: &str,
        row_based: bool,
        files: &[String],
        options: &BTreeMap<String, String>,
    ) -> Result<Vec<i64>, EngineError> {
        let mut state = self.state.lock().unwrap();
        state.next_task_id += 1;
        let task_id = state.next_task_id;
        state.ingest_jobs.push(IngestJob {
            collection: collection.to_owned(),
            partition: partition.to_owned(),
            row_based,
            files: files.to_vec(),
            options: options.clone(),
        });
        Ok(vec![task_id])
    }

    async fn get_bulk_ingest_state(
        &self,
        _task_id: i64,
    ) -> Result<BulkIngestProgress, EngineError> {
        let outcome = self.state.lock().unwrap().ingest_outcome.clone();
        Ok(match outcome {
            IngestOutcome::Complete => BulkIngestProgress {
                state: BulkIngestState::Completed,
                reason: None,
            },
            IngestOutcome::Fail(reason) => BulkIngestProgress {
                state: BulkIngestState::Failed,
                reason: Some(reason),
            },
            IngestOutcome::Hang => BulkIngestProgress {
                state: BulkIngestState::Running,
                reason: None,
            },
        })
    }
}

/// A two-field schema (an int64 primary key and a float vector) for tests.
pub fn sample_schema(name: &str) -> CollectionSchema {
    CollectionSchema {
        name: name.to_owned(),
        description: String::new(),
        auto_id: false,
        fields: vec![
            FieldSchema {
                field_id: 100,
                name: "id".to_owned(),
                is_primary_key: true,
                auto_id: false,
                description: String::new(),
                data_type: DataType::Int64,
                type_params: BTreeMap::new(),
                index_params: BTreeMap::new(),
            },
            FieldSchema {
                field_id: 101,
                name: "embedding".to_owned(),
                is_primary_key: false,
                auto_id: false,
                description: String::new(),
                data_type: DataType::FloatVector,
                type_params: BTreeMap::from([("dim".to_owned(), "128".to_owned())]),
                index_params: BTreeMap::new(),
            },
        ],
    }
}

/// A complete collection description over [`sample_schema`].
pub fn sample_collection_description(id: CollectionId, name: &str) -> CollectionDescription {
    CollectionDescription {
        id,
        name: name.to_owned(),
        schema: sample_schema(name),
        shards_num: 2,
        consistency_level: ConsistencyLevel::Bounded,
    }
}

/// Writes a segment's binlog files of one kind into the live store layout
/// and returns the written paths.
pub async fn seed_segment_logs(
    store: &dyn BlobStore,
    root_path: &str,
    kind: LogKind,
    collection_id: CollectionId,
    partition_id: PartitionId,
    segment_id: SegmentId,
    field_ids: &[FieldId],
    records_per_field: usize,
) -> Vec<String> {
    let segment_dir =
        paths::segment_log_dir(root_path, kind, collection_id, partition_id, segment_id);
    let mut written = Vec::new();
    for field_id in field_ids {
        for record in 0..records_per_field {
            let path = format!("{segment_dir}{field_id}/{record}");
            store
                .write(&path, format!("{kind:?}-{segment_id}-{field_id}-{record}").as_bytes())
                .await
                .expect("seeding a binlog into the test store succeeds");
            written.push(path);
        }
    }
    written
}
