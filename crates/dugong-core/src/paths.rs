// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Name validation and backup path layout.
//!
//! Every path a backup reads or writes is derived here, so the snapshot and
//! restore sides always agree on the directory conventions:
//!
//! ```text
//! <root>/backup/<name>/meta/backup_meta.json
//! <root>/backup/<name>/meta/collection_meta.json
//! <root>/backup/<name>/meta/partition_meta.json
//! <root>/backup/<name>/meta/segment_meta.json
//! <root>/backup/<name>/binlogs/insert_log/<collection>/<partition>/<segment>/<field>/<record>
//! <root>/backup/<name>/binlogs/delta_log/<collection>/<partition>/<segment>/<field>/<record>
//! ```
//!
//! Paths use `/` as the separator and never contain double slashes. Values
//! that name a directory used as a listing prefix carry a trailing `/`.

use crate::{CollectionId, PartitionId, SegmentId};

/// Path separator used for all object paths.
pub const SEPARATOR: char = '/';
/// Top-level prefix under which all backups live.
pub const BACKUP_PREFIX: &str = "backup";
/// Meta directory of a backup.
pub const META_DIR: &str = "meta";
/// Binlog directory of a backup.
pub const BINLOG_DIR: &str = "binlogs";

/// File name of the root meta blob. Writing this blob is what makes a backup
/// visible to the catalog.
pub const BACKUP_META_FILE: &str = "backup_meta.json";
/// File name of the collection-level meta blob.
pub const COLLECTION_META_FILE: &str = "collection_meta.json";
/// File name of the partition-level meta blob.
pub const PARTITION_META_FILE: &str = "partition_meta.json";
/// File name of the segment-level meta blob.
pub const SEGMENT_META_FILE: &str = "segment_meta.json";

/// Maximum length of a backup name.
pub const MAX_BACKUP_NAME_LENGTH: usize = 255;
/// Maximum length of a collection rename suffix.
pub const MAX_SUFFIX_LENGTH: usize = 64;

/// The binary-log variants produced by the data engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    /// Insert logs: the row payload of a segment.
    Insert,
    /// Delta logs: deletions applied to a segment.
    Delta,
    /// Statistics logs; never copied into a backup.
    Stats,
}

impl LogKind {
    /// Directory name of this log kind, identical on the live and backup
    /// sides.
    pub fn dir_name(self) -> &'static str {
        match self {
            LogKind::Insert => "insert_log",
            LogKind::Delta => "delta_log",
            LogKind::Stats => "stats_log",
        }
    }
}

/// A name or suffix that fails the naming policy.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NameError {
    /// The value is empty.
    #[error("{what} must not be empty")]
    Empty {
        /// What was being validated.
        what: &'static str,
    },
    /// The value exceeds the maximum length.
    #[error("{what} exceeds {max} characters: {len}")]
    TooLong {
        /// What was being validated.
        what: &'static str,
        /// Observed length.
        len: usize,
        /// Allowed maximum.
        max: usize,
    },
    /// The value does not start with an ASCII letter.
    #[error("{what} {value:?} must start with an ASCII letter")]
    IllegalStart {
        /// What was being validated.
        what: &'static str,
        /// The offending value.
        value: String,
    },
    /// The value contains a character outside the allowed set.
    #[error("illegal character {ch:?} in {what} {value:?}")]
    IllegalCharacter {
        /// What was being validated.
        what: &'static str,
        /// The offending value.
        value: String,
        /// The first illegal character.
        ch: char,
    },
}

/// Validates a backup name: an ASCII letter followed by ASCII letters,
/// digits, underscores, or dashes, at most [`MAX_BACKUP_NAME_LENGTH`]
/// characters.
pub fn validate_backup_name(name: &str) -> Result<(), NameError> {
    const WHAT: &str = "backup name";
    if name.is_empty() {
        return Err(NameError::Empty { what: WHAT });
    }
    if name.len() > MAX_BACKUP_NAME_LENGTH {
        return Err(NameError::TooLong {
            what: WHAT,
            len: name.len(),
            max: MAX_BACKUP_NAME_LENGTH,
        });
    }
    let first = name.chars().next().expect("name is non-empty");
    if !first.is_ascii_alphabetic() {
        return Err(NameError::IllegalStart {
            what: WHAT,
            value: name.to_owned(),
        });
    }
    if let Some(ch) = name
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '-'))
    {
        return Err(NameError::IllegalCharacter {
            what: WHAT,
            value: name.to_owned(),
            ch,
        });
    }
    Ok(())
}

/// Validates a collection rename suffix: ASCII letters, digits, or
/// underscores, at most [`MAX_SUFFIX_LENGTH`] characters.
pub fn validate_collection_suffix(suffix: &str) -> Result<(), NameError> {
    const WHAT: &str = "collection rename suffix";
    if suffix.is_empty() {
        return Err(NameError::Empty { what: WHAT });
    }
    if suffix.len() > MAX_SUFFIX_LENGTH {
        return Err(NameError::TooLong {
            what: WHAT,
            len: suffix.len(),
            max: MAX_SUFFIX_LENGTH,
        });
    }
    if let Some(ch) = suffix
        .chars()
        .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_'))
    {
        return Err(NameError::IllegalCharacter {
            what: WHAT,
            value: suffix.to_owned(),
            ch,
        });
    }
    Ok(())
}

fn join(parts: &[&str]) -> String {
    let mut path = String::new();
    for part in parts {
        let part = part.trim_matches(SEPARATOR);
        if part.is_empty() {
            continue;
        }
        if !path.is_empty() {
            path.push(SEPARATOR);
        }
        path.push_str(part);
    }
    path
}

/// The prefix under which all backups of this deployment live.
pub fn backup_root(root_path: &str) -> String {
    join(&[root_path, BACKUP_PREFIX])
}

/// The backup root as a listing prefix, with a trailing separator.
pub fn backup_root_dir(root_path: &str) -> String {
    let mut dir = backup_root(root_path);
    dir.push(SEPARATOR);
    dir
}

/// The directory of one backup as a listing/removal prefix, with a trailing
/// separator.
pub fn backup_dir(root_path: &str, backup_name: &str) -> String {
    let mut dir = join(&[root_path, BACKUP_PREFIX, backup_name]);
    dir.push(SEPARATOR);
    dir
}

fn meta_path(root_path: &str, backup_name: &str, file: &str) -> String {
    join(&[root_path, BACKUP_PREFIX, backup_name, META_DIR, file])
}

/// Path of the root meta blob of a backup.
pub fn backup_meta_path(root_path: &str, backup_name: &str) -> String {
    meta_path(root_path, backup_name, BACKUP_META_FILE)
}

/// Path of the collection-level meta blob of a backup.
pub fn collection_meta_path(root_path: &str, backup_name: &str) -> String {
    meta_path(root_path, backup_name, COLLECTION_META_FILE)
}

/// Path of the partition-level meta blob of a backup.
pub fn partition_meta_path(root_path: &str, backup_name: &str) -> String {
    meta_path(root_path, backup_name, PARTITION_META_FILE)
}

/// Path of the segment-level meta blob of a backup.
pub fn segment_meta_path(root_path: &str, backup_name: &str) -> String {
    meta_path(root_path, backup_name, SEGMENT_META_FILE)
}

/// The binlog data directory of a backup; the target prefix of the snapshot
/// path rewrite.
pub fn data_dir(root_path: &str, backup_name: &str) -> String {
    join(&[root_path, BACKUP_PREFIX, backup_name, BINLOG_DIR])
}

/// Live-side directory holding one segment's logs of the given kind, as a
/// listing prefix.
pub fn segment_log_dir(
    root_path: &str,
    kind: LogKind,
    collection_id: CollectionId,
    partition_id: PartitionId,
    segment_id: SegmentId,
) -> String {
    let mut dir = join(&[
        root_path,
        kind.dir_name(),
        &collection_id.to_string(),
        &partition_id.to_string(),
        &segment_id.to_string(),
    ]);
    dir.push(SEPARATOR);
    dir
}

/// Backup-side directory holding one partition's logs of the given kind, as
/// a listing prefix. This is the file argument handed to bulk ingest.
pub fn partition_log_dir(
    root_path: &str,
    backup_name: &str,
    kind: LogKind,
    collection_id: CollectionId,
    partition_id: PartitionId,
) -> String {
    let mut dir = join(&[
        root_path,
        BACKUP_PREFIX,
        backup_name,
        BINLOG_DIR,
        kind.dir_name(),
        &collection_id.to_string(),
        &partition_id.to_string(),
    ]);
    dir.push(SEPARATOR);
    dir
}

/// Rewrites a live binlog path into its backup-side destination by replacing
/// the live root prefix with the backup's data directory.
///
/// Returns `None` when the rewrite does not change the path, which means the
/// source is not under the configured root and the snapshot must abort.
pub fn rewrite_to_backup_path(log_path: &str, root_path: &str, backup_name: &str) -> Option<String> {
    let rewritten = log_path.replacen(root_path, &data_dir(root_path, backup_name), 1);
    (rewritten != log_path).then_some(rewritten)
}

/// Extracts the backup name from a listed backup directory path.
///
/// Inverse of [`backup_dir`] on its trailing path component.
pub fn backup_path_to_name(path: &str) -> String {
    path.trim_end_matches(SEPARATOR)
        .rsplit(SEPARATOR)
        .next()
        .unwrap_or_default()
        .to_owned()
}
