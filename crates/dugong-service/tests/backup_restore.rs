// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! End-to-end tests of the backup service over an in-memory object store
//! and a scriptable mock cluster.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use dugong_core::compose_ts;
use dugong_core::meta::BackupStatus;
use dugong_core::paths::LogKind;
use dugong_service::api::{
    CreateBackupRequest, DeleteBackupRequest, GetBackupRequest, ListBackupsRequest,
    LoadBackupRequest, LoadState, StatusCode,
};
use dugong_service::config::{BackupConfig, EngineConfig, StorageConfig};
use dugong_service::engine::{DataEngineClient, FlushResult, PartitionDescription, SegmentDescription};
use dugong_service::storage::{BlobStore, ListEntry, ObjectBlobStore, StoreError};
use dugong_service::test_utils::{
    sample_collection_description, seed_segment_logs, IngestOutcome, MockCollection,
    MockDataEngine,
};
use dugong_service::BackupService;

const ROOT: &str = "files";
const COLLECTION: &str = "c";
const COLL_ID: i64 = 44;
const PART_ID: i64 = 440;
const SEAL_TIME_MS: i64 = 1_700_000_000_000;

fn test_config() -> BackupConfig {
    let mut config =
        BackupConfig::new_with_defaults(StorageConfig::default(), EngineConfig::default());
    config.bulk_ingest_timeout = Duration::from_millis(300);
    config.bulk_ingest_poll_interval = Duration::from_millis(10);
    config
}

fn service_over(store: Arc<dyn BlobStore>, engine: Arc<MockDataEngine>) -> BackupService {
    let engine: Arc<dyn DataEngineClient> = engine;
    BackupService::new(test_config(), store, engine)
}

fn test_service() -> (BackupService, Arc<dyn BlobStore>, Arc<MockDataEngine>) {
    let store: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::in_memory(ROOT));
    let engine = Arc::new(MockDataEngine::new());
    let service = service_over(Arc::clone(&store), Arc::clone(&engine));
    (service, store, engine)
}

fn segment(id: i64) -> SegmentDescription {
    SegmentDescription {
        id,
        collection_id: COLL_ID,
        partition_id: PART_ID,
        num_rows: 100,
    }
}

/// Registers collection `c` with sealed segments 101 and 102 and the given
/// persistent-segment listing.
fn register_collection(engine: &MockDataEngine, persistent: &[i64]) {
    engine.add_collection(MockCollection {
        description: sample_collection_description(COLL_ID, COLLECTION),
        partitions: vec![PartitionDescription {
            id: PART_ID,
            name: "_default".to_owned(),
        }],
        flush: FlushResult {
            new_sealed: vec![101],
            already_sealed: vec![102],
            seal_time: SEAL_TIME_MS,
        },
        persistent_segments: persistent.iter().copied().map(segment).collect(),
    });
}

/// Seeds the live binlog layout for segments 101 and 102 and returns the
/// seeded insert-log paths. Segment 101 also gets a delta log when asked.
async fn seed_live_segments(store: &dyn BlobStore, with_delta: bool) -> Vec<String> {
    let mut insert_paths = Vec::new();
    for segment_id in [101, 102] {
        insert_paths.extend(
            seed_segment_logs(
                store,
                ROOT,
                LogKind::Insert,
                COLL_ID,
                PART_ID,
                segment_id,
                &[100, 101],
                2,
            )
            .await,
        );
    }
    if with_delta {
        seed_segment_logs(store, ROOT, LogKind::Delta, COLL_ID, PART_ID, 101, &[100], 1).await;
    }
    insert_paths
}

async fn create_backup(service: &BackupService, name: &str) -> dugong_core::meta::BackupInfo {
    let response = service
        .create_backup(&CreateBackupRequest {
            backup_name: name.to_owned(),
            collection_names: vec![COLLECTION.to_owned()],
        })
        .await;
    assert!(response.status.is_success(), "{:?}", response.status);
    response.backup_info.expect("backup info is present")
}

#[tokio::test]
async fn snapshot_of_an_empty_cluster_succeeds() {
    let (service, store, _engine) = test_service();

    let response = service
        .create_backup(&CreateBackupRequest {
            backup_name: "b1".to_owned(),
            collection_names: vec![],
        })
        .await;

    assert!(response.status.is_success(), "{:?}", response.status);
    let info = response.backup_info.expect("backup info is present");
    assert_eq!(info.name, "b1");
    assert_eq!(info.status, BackupStatus::Success);
    assert!(info.collections.is_empty());

    for blob in [
        "backup_meta.json",
        "collection_meta.json",
        "partition_meta.json",
        "segment_meta.json",
    ] {
        assert!(
            store
                .exist(&format!("files/backup/b1/meta/{blob}"))
                .await
                .expect("exist succeeds"),
            "{blob} should be written"
        );
    }
}

#[tokio::test]
async fn snapshot_captures_exactly_the_sealed_segment_set() {
    let (service, store, engine) = test_service();
    // Segment 103 shows up in the persistent listing only after the flush.
    register_collection(&engine, &[101, 102, 103]);
    let insert_paths = seed_live_segments(store.as_ref(), true).await;
    seed_segment_logs(store.as_ref(), ROOT, LogKind::Insert, COLL_ID, PART_ID, 103, &[100], 1)
        .await;

    let info = create_backup(&service, "b2").await;

    assert_eq!(info.collections.len(), 1);
    let collection = &info.collections[0];
    assert_eq!(collection.collection_id, COLL_ID);
    assert_eq!(collection.backup_timestamp, compose_ts(SEAL_TIME_MS, 0));
    assert_eq!(collection.partitions.len(), 1);

    let mut segment_ids: Vec<i64> = collection.partitions[0]
        .segments
        .iter()
        .map(|segment| segment.segment_id)
        .collect();
    segment_ids.sort_unstable();
    assert_eq!(segment_ids, [101, 102]);

    // Every captured insert log has a copy under the backup prefix; the
    // late segment has none.
    for path in &insert_paths {
        let target = path.replacen("files", "files/backup/b2/binlogs", 1);
        assert!(store.exist(&target).await.expect("exist succeeds"), "{target}");
    }
    assert!(
        !store
            .exist("files/backup/b2/binlogs/insert_log/44/440/103/100/0")
            .await
            .expect("exist succeeds"),
        "segments sealed after the flush must not be copied"
    );
}

/// A store in which one object vanishes between enumeration and copy.
struct VanishingStore {
    inner: Arc<dyn BlobStore>,
    missing: String,
}

#[async_trait]
impl BlobStore for VanishingStore {
    async fn exist(&self, path: &str) -> Result<bool, StoreError> {
        if path == self.missing {
            return Ok(false);
        }
        self.inner.exist(path).await
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.read(path).await
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StoreError> {
        self.inner.write(path, data).await
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        self.inner.copy(src, dst).await
    }

    async fn list_with_prefix(
        &self,
        prefix: &str,
        recursive: bool,
    ) -> Result<Vec<ListEntry>, StoreError> {
        self.inner.list_with_prefix(prefix, recursive).await
    }

    async fn remove_with_prefix(&self, prefix: &str) -> Result<(), StoreError> {
        self.inner.remove_with_prefix(prefix).await
    }
}

#[tokio::test]
async fn vanished_source_binlog_aborts_without_meta() {
    let inner: Arc<dyn BlobStore> = Arc::new(ObjectBlobStore::in_memory(ROOT));
    let engine = Arc::new(MockDataEngine::new());
    register_collection(&engine, &[101, 102]);
    let insert_paths = seed_live_segments(inner.as_ref(), false).await;

    let store: Arc<dyn BlobStore> = Arc::new(VanishingStore {
        inner,
        missing: insert_paths[0].clone(),
    });
    let service = service_over(Arc::clone(&store), engine);

    let response = service
        .create_backup(&CreateBackupRequest {
            backup_name: "b2".to_owned(),
            collection_names: vec![COLLECTION.to_owned()],
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::UnexpectedError);
    let reason = response.status.reason.expect("reason is present");
    assert!(
        reason.contains("Binlog file not exist"),
        "unexpected reason: {reason}"
    );
    assert!(response.backup_info.is_none());
    assert!(
        !store
            .exist("files/backup/b2/meta/backup_meta.json")
            .await
            .expect("exist succeeds"),
        "no meta may be written for an aborted backup"
    );
}

#[tokio::test]
async fn restore_with_suffix_recreates_the_collection() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;

    let response = service
        .load_backup(&LoadBackupRequest {
            backup_name: "b2".to_owned(),
            collection_names: vec![],
            collection_renames: BTreeMap::new(),
            collection_suffix: Some("_r".to_owned()),
        })
        .await;

    assert!(response.status.is_success(), "{:?}", response.status);
    assert_eq!(response.collection_load_tasks.len(), 1);
    let task = &response.collection_load_tasks[0];
    assert_eq!(task.state, LoadState::Success);
    assert_eq!(task.collection_name, "c");
    assert_eq!(task.target_collection_name, "c_r");

    let created = engine.created_collections();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].schema.name, "c_r");
    assert_eq!(created[0].shards_num, 2);
    // The schema round-trips except for the target name.
    let saved = dugong_service::test_utils::sample_schema(COLLECTION);
    assert_eq!(created[0].schema.fields, saved.fields);
    assert_eq!(created[0].schema.auto_id, saved.auto_id);

    let jobs = engine.ingest_jobs();
    assert_eq!(jobs.len(), 1, "one bulk ingest per partition");
    let job = &jobs[0];
    assert_eq!(job.collection, "c_r");
    assert_eq!(job.partition, "_default");
    assert!(!job.row_based);
    assert_eq!(
        job.files,
        [
            "files/backup/b2/binlogs/insert_log/44/440/",
            "files/backup/b2/binlogs/delta_log/44/440/"
        ]
    );
    assert_eq!(
        job.options.get("end_ts"),
        Some(&compose_ts(SEAL_TIME_MS, 0).to_string())
    );
    assert_eq!(job.options.get("backup"), Some(&"true".to_owned()));
}

#[tokio::test]
async fn restore_without_delta_logs_passes_an_empty_argument() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), false).await;
    create_backup(&service, "b2").await;

    let response = service
        .load_backup(&LoadBackupRequest {
            backup_name: "b2".to_owned(),
            collection_suffix: Some("_r".to_owned()),
            ..Default::default()
        })
        .await;

    assert!(response.status.is_success(), "{:?}", response.status);
    let jobs = engine.ingest_jobs();
    assert_eq!(
        jobs[0].files,
        ["files/backup/b2/binlogs/insert_log/44/440/", ""]
    );
}

#[tokio::test]
async fn restore_aborts_when_a_target_collection_exists() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;
    engine.add_live_name("c_r");

    let response = service
        .load_backup(&LoadBackupRequest {
            backup_name: "b2".to_owned(),
            collection_suffix: Some("_r".to_owned()),
            ..Default::default()
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::UnexpectedError);
    assert_eq!(
        response.status.reason.as_deref(),
        Some("load target collection already exists in the cluster: c_r")
    );
    assert!(response.collection_load_tasks.is_empty());
    assert!(engine.created_collections().is_empty());
}

#[tokio::test]
async fn rename_takes_precedence_over_suffix() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;

    let response = service
        .load_backup(&LoadBackupRequest {
            backup_name: "b2".to_owned(),
            collection_renames: BTreeMap::from([("c".to_owned(), "c_two".to_owned())]),
            collection_suffix: Some("_r".to_owned()),
            ..Default::default()
        })
        .await;

    assert!(response.status.is_success(), "{:?}", response.status);
    assert_eq!(
        response.collection_load_tasks[0].target_collection_name,
        "c_two"
    );
    assert_eq!(engine.created_collections()[0].schema.name, "c_two");
}

#[tokio::test]
async fn failed_bulk_ingest_fails_the_task() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;
    engine.set_ingest_outcome(IngestOutcome::Fail("disk full".to_owned()));

    let response = service
        .load_backup(&LoadBackupRequest {
            backup_name: "b2".to_owned(),
            collection_suffix: Some("_r".to_owned()),
            ..Default::default()
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::UnexpectedError);
    let task = &response.collection_load_tasks[0];
    assert_eq!(task.state, LoadState::Fail);
    let message = task.error_message.as_deref().expect("error message is set");
    assert!(message.contains("disk full"), "unexpected message: {message}");
}

#[tokio::test]
async fn stuck_bulk_ingest_times_out() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;
    engine.set_ingest_outcome(IngestOutcome::Hang);

    let response = service
        .load_backup(&LoadBackupRequest {
            backup_name: "b2".to_owned(),
            collection_suffix: Some("_r".to_owned()),
            ..Default::default()
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::UnexpectedError);
    let reason = response.status.reason.expect("reason is present");
    assert!(reason.contains("did not finish"), "unexpected reason: {reason}");
    assert_eq!(response.collection_load_tasks[0].state, LoadState::Fail);
}

#[tokio::test]
async fn loading_a_missing_backup_fails() {
    let (service, _store, _engine) = test_service();

    let response = service
        .load_backup(&LoadBackupRequest {
            backup_name: "nope".to_owned(),
            ..Default::default()
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::UnexpectedError);
    let reason = response.status.reason.expect("reason is present");
    assert!(
        reason.contains("backup doesn't exist"),
        "unexpected reason: {reason}"
    );
}

#[tokio::test]
async fn listing_skips_backups_without_a_root_meta_blob() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;

    // An in-flight backup: binlogs (and even one meta blob) but no root
    // meta yet.
    store
        .write("files/backup/b3/binlogs/insert_log/1/2/3/100/1", b"x")
        .await
        .expect("write succeeds");
    store
        .write("files/backup/b3/meta/collection_meta.json", b"{\"infos\":[]}")
        .await
        .expect("write succeeds");
    // A corrupt backup: a root meta blob with the other levels missing.
    store
        .write("files/backup/b4/meta/backup_meta.json", b"{}")
        .await
        .expect("write succeeds");

    let response = service.list_backups(&ListBackupsRequest::default()).await;

    assert!(response.status.is_success(), "{:?}", response.status);
    let names: Vec<&str> = response
        .backup_infos
        .iter()
        .map(|info| info.name.as_str())
        .collect();
    assert_eq!(names, ["b2"]);
    assert_eq!(response.fail_backups, ["b4"]);
}

#[tokio::test]
async fn listing_filters_by_contained_collection() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;

    let all = service.list_backups(&ListBackupsRequest::default()).await;
    assert_eq!(all.backup_infos.len(), 1);

    let matching = service
        .list_backups(&ListBackupsRequest {
            collection_name: Some(COLLECTION.to_owned()),
        })
        .await;
    assert_eq!(matching.backup_infos.len(), 1);

    let none = service
        .list_backups(&ListBackupsRequest {
            collection_name: Some("other".to_owned()),
        })
        .await;
    assert!(none.backup_infos.is_empty());
    assert!(none.status.is_success());
}

#[tokio::test]
async fn duplicate_backup_names_are_rejected() {
    let (service, _store, _engine) = test_service();
    let request = CreateBackupRequest {
        backup_name: "b1".to_owned(),
        collection_names: vec![],
    };

    assert!(service.create_backup(&request).await.status.is_success());

    let second = service.create_backup(&request).await;
    assert_eq!(second.status.status_code, StatusCode::UnexpectedError);
    let reason = second.status.reason.expect("reason is present");
    assert!(
        reason.contains("backup already exist with the name: b1"),
        "unexpected reason: {reason}"
    );
}

#[tokio::test]
async fn malformed_backup_names_are_rejected() {
    let (service, _store, _engine) = test_service();

    let response = service
        .create_backup(&CreateBackupRequest {
            backup_name: "1bad".to_owned(),
            collection_names: vec![],
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::UnexpectedError);
    let reason = response.status.reason.expect("reason is present");
    assert!(
        reason.contains("must start with an ASCII letter"),
        "unexpected reason: {reason}"
    );
}

#[tokio::test]
async fn empty_request_names_are_auto_assigned() {
    let (service, _store, _engine) = test_service();

    let response = service
        .create_backup(&CreateBackupRequest::default())
        .await;

    assert!(response.status.is_success(), "{:?}", response.status);
    let info = response.backup_info.expect("backup info is present");
    assert!(
        info.name.starts_with("backup_"),
        "unexpected auto name: {}",
        info.name
    );
}

#[tokio::test]
async fn unknown_requested_collections_fail_fast() {
    let (service, _store, _engine) = test_service();

    let response = service
        .create_backup(&CreateBackupRequest {
            backup_name: "b1".to_owned(),
            collection_names: vec!["ghost".to_owned()],
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::UnexpectedError);
    let reason = response.status.reason.expect("reason is present");
    assert!(
        reason.contains("request backup collection does not exist: ghost"),
        "unexpected reason: {reason}"
    );
}

#[tokio::test]
async fn get_backup_is_idempotent() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    let created = create_backup(&service, "b2").await;

    let request = GetBackupRequest {
        backup_name: "b2".to_owned(),
    };
    let first = service.get_backup(&request).await;
    let second = service.get_backup(&request).await;

    assert!(first.status.is_success());
    assert_eq!(first, second);
    assert_eq!(first.backup_info, Some(created));
}

#[tokio::test]
async fn delete_backup_empties_the_prefix() {
    let (service, store, engine) = test_service();
    register_collection(&engine, &[101, 102]);
    seed_live_segments(store.as_ref(), true).await;
    create_backup(&service, "b2").await;

    let response = service
        .delete_backup(&DeleteBackupRequest {
            backup_name: "b2".to_owned(),
        })
        .await;
    assert!(response.status.is_success(), "{:?}", response.status);

    assert!(store
        .list_with_prefix("files/backup/b2/", true)
        .await
        .expect("list succeeds")
        .is_empty());
    let lookup = service
        .get_backup(&GetBackupRequest {
            backup_name: "b2".to_owned(),
        })
        .await;
    assert!(lookup.status.is_success());
    assert!(lookup.backup_info.is_none());
}

#[tokio::test]
async fn unreachable_cluster_reports_connect_failed() {
    let (service, _store, engine) = test_service();
    engine.fail_start("connection refused");

    let response = service
        .create_backup(&CreateBackupRequest {
            backup_name: "b1".to_owned(),
            collection_names: vec![],
        })
        .await;

    assert_eq!(response.status.status_code, StatusCode::ConnectFailed);
}
