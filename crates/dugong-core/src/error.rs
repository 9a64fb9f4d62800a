// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Errors raised by the metadata model and codec.

use crate::{CollectionId, PartitionId, SegmentId};

/// Errors raised while encoding, decoding, or re-linking backup metadata.
#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    /// A meta blob could not be encoded or decoded as JSON.
    #[error("failed to encode or decode backup metadata: {0}")]
    Json(#[from] serde_json::Error),

    /// A partition entry references a collection that is not part of the
    /// backup.
    #[error("partition {partition_id} references unknown collection {collection_id}")]
    UnknownCollection {
        /// The dangling partition.
        partition_id: PartitionId,
        /// The collection id it points at.
        collection_id: CollectionId,
    },

    /// A segment entry references a partition that is not part of the
    /// backup.
    #[error("segment {segment_id} references unknown partition {partition_id}")]
    UnknownPartition {
        /// The dangling segment.
        segment_id: SegmentId,
        /// The partition id it points at.
        partition_id: PartitionId,
    },

    /// A segment's collection id disagrees with the collection owning its
    /// partition.
    #[error(
        "segment {segment_id} claims collection {actual} but its partition \
         belongs to collection {expected}"
    )]
    CollectionMismatch {
        /// The inconsistent segment.
        segment_id: SegmentId,
        /// The collection owning the segment's partition.
        expected: CollectionId,
        /// The collection id recorded on the segment.
        actual: CollectionId,
    },
}
