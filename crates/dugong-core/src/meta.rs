// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The backup metadata model.
//!
//! A backup is described by a strict four-level tree: backup → collection →
//! partition → segment. The tree form is what the engines work with in
//! memory; on disk the same content is stored in a *leveled* form of four
//! flat lists, serialized to four independent JSON blobs. Keeping the blobs
//! independent bounds their individual size, allows selective reads, and
//! leaves three of the four levels intact when one blob is damaged and needs
//! manual repair.
//!
//! [`LeveledBackupInfo::from_tree`] and [`LeveledBackupInfo::into_tree`] are
//! mutually inverse on well-formed inputs; [`serialize`] and [`deserialize`]
//! wrap them with the JSON codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{CollectionId, FieldId, LogicalTimestamp, MetaError, PartitionId, SegmentId};

/// Scalar and vector data types supported by the data engine's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// Boolean scalar.
    Bool,
    /// 8-bit signed integer scalar.
    Int8,
    /// 16-bit signed integer scalar.
    Int16,
    /// 32-bit signed integer scalar.
    Int32,
    /// 64-bit signed integer scalar.
    Int64,
    /// 32-bit float scalar.
    Float,
    /// 64-bit float scalar.
    Double,
    /// Fixed-length string scalar.
    String,
    /// Variable-length string scalar.
    VarChar,
    /// Packed binary vector.
    BinaryVector,
    /// 32-bit float vector.
    FloatVector,
}

/// Read-after-write consistency knob of a collection, preserved verbatim by
/// backup and restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    /// Reads observe all prior writes.
    Strong,
    /// Reads observe the session's own writes.
    Session,
    /// Reads may lag writes by a bounded staleness window.
    Bounded,
    /// Reads carry no ordering guarantee.
    Eventually,
    /// Engine-specific custom level.
    Customized,
}

/// Terminal state of a persisted backup.
///
/// Only [`BackupStatus::Success`] marks a complete backup; anything else in
/// the bucket reflects an incomplete or abandoned attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackupStatus {
    /// The backup is still being written or was abandoned.
    #[default]
    Unknown,
    /// The snapshot completed and all four meta blobs were written.
    Success,
    /// The snapshot aborted after writing data.
    Failed,
}

/// One field of a collection schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    /// Engine-assigned field identifier.
    pub field_id: FieldId,
    /// Field name.
    pub name: String,
    /// Whether the field is the primary key.
    pub is_primary_key: bool,
    /// Whether the engine auto-assigns values for this field.
    pub auto_id: bool,
    /// Free-form description.
    pub description: String,
    /// The field's data type.
    pub data_type: DataType,
    /// Type parameters, e.g. the dimension of a vector field.
    pub type_params: BTreeMap<String, String>,
    /// Index parameters recorded on the field.
    pub index_params: BTreeMap<String, String>,
}

/// Complete schema of a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    /// Collection name; on restore this carries the *target* name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Whether primary keys are auto-assigned.
    pub auto_id: bool,
    /// The schema fields in engine order.
    pub fields: Vec<FieldSchema>,
}

/// A single binary-log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binlog {
    /// Object path of the log file, as reported by the store.
    pub log_path: String,
}

/// The ordered log records of one field within one segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBinlog {
    /// The field the logs belong to.
    pub field_id: FieldId,
    /// Log records in store-returned order.
    pub binlogs: Vec<Binlog>,
}

/// Backup record of one sealed segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentBackupInfo {
    /// Engine-assigned segment identifier.
    pub segment_id: SegmentId,
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Owning partition.
    pub partition_id: PartitionId,
    /// Row count reported by the engine at seal time.
    pub num_of_rows: i64,
    /// Insert binary logs per field.
    pub binlogs: Vec<FieldBinlog>,
    /// Delete binary logs per field.
    pub deltalogs: Vec<FieldBinlog>,
    /// Per-field statistics logs; enumerated but never copied by the
    /// snapshot.
    pub statslogs: Vec<FieldBinlog>,
}

/// Backup record of one partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionBackupInfo {
    /// Engine-assigned partition identifier.
    pub partition_id: PartitionId,
    /// Partition name.
    pub partition_name: String,
    /// Owning collection.
    pub collection_id: CollectionId,
    /// Segments captured for this partition. Empty in the leveled form.
    pub segments: Vec<SegmentBackupInfo>,
}

/// Backup record of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionBackupInfo {
    /// Engine-assigned collection identifier.
    pub collection_id: CollectionId,
    /// Database name. The engine does not use this yet; it is persisted as
    /// an empty placeholder.
    pub db_name: String,
    /// Collection name at snapshot time.
    pub collection_name: String,
    /// Complete schema as reported by a describe call.
    pub schema: CollectionSchema,
    /// Shard count of the collection.
    pub shards_num: i32,
    /// Consistency level of the collection.
    pub consistency_level: ConsistencyLevel,
    /// Seal timestamp of the snapshot flush, composite-encoded with a zero
    /// logical part.
    pub backup_timestamp: LogicalTimestamp,
    /// Partitions of the collection. Empty in the leveled form.
    pub partitions: Vec<PartitionBackupInfo>,
}

/// Root of a backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupInfo {
    /// Reserved catalog identifier; always zero until an identifier policy
    /// exists.
    pub id: u64,
    /// Backup name, unique within the catalog.
    pub name: String,
    /// Unix seconds at which the snapshot finalized.
    pub backup_timestamp: u64,
    /// Terminal state of the backup.
    pub status: BackupStatus,
    /// Collections captured by the backup. Empty in the leveled form.
    pub collections: Vec<CollectionBackupInfo>,
}

impl BackupInfo {
    /// Creates an empty, in-progress backup root with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            backup_timestamp: 0,
            status: BackupStatus::Unknown,
            collections: Vec::new(),
        }
    }
}

/// The leveled form of a backup: the same content as [`BackupInfo`] with all
/// parent→child links flattened into four lists.
#[derive(Debug, Clone, PartialEq)]
pub struct LeveledBackupInfo {
    /// The root entry, with `collections` empty.
    pub root: BackupInfo,
    /// All collections, with `partitions` empty.
    pub collections: Vec<CollectionBackupInfo>,
    /// All partitions, with `segments` empty.
    pub partitions: Vec<PartitionBackupInfo>,
    /// All segments.
    pub segments: Vec<SegmentBackupInfo>,
}

impl LeveledBackupInfo {
    /// Flattens a tree into its leveled form.
    ///
    /// List order is preserved level by level, which makes the transform
    /// invertible: [`Self::into_tree`] rebuilds exactly the input tree.
    pub fn from_tree(info: &BackupInfo) -> Self {
        let mut collections = Vec::with_capacity(info.collections.len());
        let mut partitions = Vec::new();
        let mut segments = Vec::new();

        for collection in &info.collections {
            let mut collection = collection.clone();
            for mut partition in collection.partitions.drain(..) {
                segments.append(&mut partition.segments);
                partitions.push(partition);
            }
            collections.push(collection);
        }

        let mut root = info.clone();
        root.collections = Vec::new();

        Self {
            root,
            collections,
            partitions,
            segments,
        }
    }

    /// Re-links the leveled form into a tree by joining foreign keys in a
    /// single pass.
    ///
    /// Fails with a [`MetaError`] when a partition or segment references an
    /// entity that is not part of the backup.
    pub fn into_tree(self) -> Result<BackupInfo, MetaError> {
        let Self {
            mut root,
            collections,
            partitions,
            segments,
        } = self;

        root.collections = collections;

        let collection_slots: BTreeMap<CollectionId, usize> = root
            .collections
            .iter()
            .enumerate()
            .map(|(slot, collection)| (collection.collection_id, slot))
            .collect();

        let mut partition_slots: BTreeMap<PartitionId, (usize, usize)> = BTreeMap::new();
        for partition in partitions {
            let Some(&collection_slot) = collection_slots.get(&partition.collection_id) else {
                return Err(MetaError::UnknownCollection {
                    partition_id: partition.partition_id,
                    collection_id: partition.collection_id,
                });
            };
            let collection = &mut root.collections[collection_slot];
            partition_slots.insert(
                partition.partition_id,
                (collection_slot, collection.partitions.len()),
            );
            collection.partitions.push(partition);
        }

        for segment in segments {
            let Some(&(collection_slot, partition_slot)) =
                partition_slots.get(&segment.partition_id)
            else {
                return Err(MetaError::UnknownPartition {
                    segment_id: segment.segment_id,
                    partition_id: segment.partition_id,
                });
            };
            let partition = &mut root.collections[collection_slot].partitions[partition_slot];
            if partition.collection_id != segment.collection_id {
                return Err(MetaError::CollectionMismatch {
                    segment_id: segment.segment_id,
                    expected: partition.collection_id,
                    actual: segment.collection_id,
                });
            }
            partition.segments.push(segment);
        }

        Ok(root)
    }
}

/// The four serialized meta blobs of a backup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupMetaBytes {
    /// The root entry (`backup_meta.json`).
    pub backup_meta: Vec<u8>,
    /// The collection level (`collection_meta.json`).
    pub collection_meta: Vec<u8>,
    /// The partition level (`partition_meta.json`).
    pub partition_meta: Vec<u8>,
    /// The segment level (`segment_meta.json`).
    pub segment_meta: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
struct Level<T> {
    infos: Vec<T>,
}

/// Serializes a backup tree into its four meta blobs.
///
/// All four blobs are produced from the same in-memory tree, so a reader
/// that loads all four observes one consistent snapshot of the metadata.
pub fn serialize(info: &BackupInfo) -> Result<BackupMetaBytes, MetaError> {
    let leveled = LeveledBackupInfo::from_tree(info);
    Ok(BackupMetaBytes {
        backup_meta: serde_json::to_vec(&leveled.root)?,
        collection_meta: serde_json::to_vec(&Level {
            infos: leveled.collections,
        })?,
        partition_meta: serde_json::to_vec(&Level {
            infos: leveled.partitions,
        })?,
        segment_meta: serde_json::to_vec(&Level {
            infos: leveled.segments,
        })?,
    })
}

/// Re-assembles a backup tree from its four meta blobs.
pub fn deserialize(bytes: &BackupMetaBytes) -> Result<BackupInfo, MetaError> {
    let root: BackupInfo = serde_json::from_slice(&bytes.backup_meta)?;
    let collections: Level<CollectionBackupInfo> = serde_json::from_slice(&bytes.collection_meta)?;
    let partitions: Level<PartitionBackupInfo> = serde_json::from_slice(&bytes.partition_meta)?;
    let segments: Level<SegmentBackupInfo> = serde_json::from_slice(&bytes.segment_meta)?;

    LeveledBackupInfo {
        root,
        collections: collections.infos,
        partitions: partitions.infos,
        segments: segments.infos,
    }
    .into_tree()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(id: FieldId, name: &str, data_type: DataType) -> FieldSchema {
        FieldSchema {
            field_id: id,
            name: name.to_owned(),
            is_primary_key: id == 100,
            auto_id: false,
            description: String::new(),
            data_type,
            type_params: BTreeMap::new(),
            index_params: BTreeMap::new(),
        }
    }

    fn segment(id: SegmentId, collection: CollectionId, partition: PartitionId) -> SegmentBackupInfo {
        SegmentBackupInfo {
            segment_id: id,
            collection_id: collection,
            partition_id: partition,
            num_of_rows: 1000,
            binlogs: vec![FieldBinlog {
                field_id: 100,
                binlogs: vec![Binlog {
                    log_path: format!("files/insert_log/{collection}/{partition}/{id}/100/1"),
                }],
            }],
            deltalogs: vec![FieldBinlog {
                field_id: 0,
                binlogs: vec![],
            }],
            statslogs: vec![],
        }
    }

    fn sample_backup() -> BackupInfo {
        let schema = CollectionSchema {
            name: "books".to_owned(),
            description: String::new(),
            auto_id: false,
            fields: vec![
                field(100, "id", DataType::Int64),
                field(101, "embedding", DataType::FloatVector),
            ],
        };
        BackupInfo {
            id: 0,
            name: "nightly".to_owned(),
            backup_timestamp: 1_690_000_000,
            status: BackupStatus::Success,
            collections: vec![
                CollectionBackupInfo {
                    collection_id: 7,
                    db_name: String::new(),
                    collection_name: "books".to_owned(),
                    schema: schema.clone(),
                    shards_num: 2,
                    consistency_level: ConsistencyLevel::Bounded,
                    backup_timestamp: crate::compose_ts(1_690_000_000_000, 0),
                    partitions: vec![
                        PartitionBackupInfo {
                            partition_id: 70,
                            partition_name: "_default".to_owned(),
                            collection_id: 7,
                            segments: vec![segment(701, 7, 70), segment(702, 7, 70)],
                        },
                        PartitionBackupInfo {
                            partition_id: 71,
                            partition_name: "archive".to_owned(),
                            collection_id: 7,
                            segments: vec![segment(711, 7, 71)],
                        },
                    ],
                },
                CollectionBackupInfo {
                    collection_id: 8,
                    db_name: String::new(),
                    collection_name: "films".to_owned(),
                    schema,
                    shards_num: 1,
                    consistency_level: ConsistencyLevel::Strong,
                    backup_timestamp: crate::compose_ts(1_690_000_001_000, 0),
                    partitions: vec![PartitionBackupInfo {
                        partition_id: 80,
                        partition_name: "_default".to_owned(),
                        collection_id: 8,
                        segments: vec![segment(801, 8, 80)],
                    }],
                },
            ],
        }
    }

    #[test]
    fn tree_of_level_is_identity() {
        let tree = sample_backup();
        let rebuilt = LeveledBackupInfo::from_tree(&tree)
            .into_tree()
            .expect("re-linking a well-formed backup succeeds");
        assert_eq!(rebuilt, tree);
    }

    #[test]
    fn level_of_tree_is_identity() {
        let leveled = LeveledBackupInfo::from_tree(&sample_backup());
        let round_tripped = LeveledBackupInfo::from_tree(
            &leveled
                .clone()
                .into_tree()
                .expect("re-linking a well-formed backup succeeds"),
        );
        assert_eq!(round_tripped, leveled);
    }

    #[test]
    fn leveled_form_has_no_children() {
        let leveled = LeveledBackupInfo::from_tree(&sample_backup());
        assert!(leveled.root.collections.is_empty());
        assert!(leveled.collections.iter().all(|c| c.partitions.is_empty()));
        assert!(leveled.partitions.iter().all(|p| p.segments.is_empty()));
        assert_eq!(leveled.segments.len(), 4);
    }

    #[test]
    fn codec_round_trips() {
        let tree = sample_backup();
        let blobs = serialize(&tree).expect("serialization succeeds");
        let decoded = deserialize(&blobs).expect("deserialization succeeds");
        assert_eq!(decoded, tree);
    }

    #[test]
    fn serialization_is_deterministic() {
        let tree = sample_backup();
        assert_eq!(
            serialize(&tree).expect("serialization succeeds"),
            serialize(&tree).expect("serialization succeeds"),
        );
    }

    #[test]
    fn dangling_partition_is_rejected() {
        let mut leveled = LeveledBackupInfo::from_tree(&sample_backup());
        leveled.partitions[0].collection_id = 999;

        let err = leveled.into_tree().expect_err("re-linking should fail");
        assert!(matches!(
            err,
            MetaError::UnknownCollection {
                collection_id: 999,
                ..
            }
        ));
    }

    #[test]
    fn dangling_segment_is_rejected() {
        let mut leveled = LeveledBackupInfo::from_tree(&sample_backup());
        leveled.segments[0].partition_id = 999;

        let err = leveled.into_tree().expect_err("re-linking should fail");
        assert!(matches!(
            err,
            MetaError::UnknownPartition {
                partition_id: 999,
                ..
            }
        ));
    }

    #[test]
    fn segment_collection_mismatch_is_rejected() {
        let mut leveled = LeveledBackupInfo::from_tree(&sample_backup());
        leveled.segments[0].collection_id = 8;

        let err = leveled.into_tree().expect_err("re-linking should fail");
        assert!(matches!(
            err,
            MetaError::CollectionMismatch {
                expected: 7,
                actual: 8,
                ..
            }
        ));
    }

    #[test]
    fn empty_backup_round_trips() {
        let mut tree = BackupInfo::new("empty");
        tree.status = BackupStatus::Success;

        let blobs = serialize(&tree).expect("serialization succeeds");
        let decoded = deserialize(&blobs).expect("deserialization succeeds");
        assert_eq!(decoded, tree);
        assert!(decoded.collections.is_empty());
    }
}
