// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Configuration of the backup service.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

/// Configuration of a dugong backup service.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Object storage holding the live binary logs and the backups.
    pub storage: StorageConfig,
    /// The data engine cluster to snapshot from and restore into.
    #[serde(default)]
    pub engine: EngineConfig,
    /// Wall-clock deadline for a single bulk ingest task during restore.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "bulk_ingest_timeout_seconds",
        default = "defaults::bulk_ingest_timeout"
    )]
    pub bulk_ingest_timeout: Duration,
    /// Interval between bulk ingest state polls.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(
        rename = "bulk_ingest_poll_interval_seconds",
        default = "defaults::bulk_ingest_poll_interval"
    )]
    pub bulk_ingest_poll_interval: Duration,
    /// Maximum number of binlog copies in flight during a snapshot.
    #[serde(default = "defaults::copy_concurrency")]
    pub copy_concurrency: usize,
}

impl BackupConfig {
    /// Creates a configuration with default values for all tunables.
    pub fn new_with_defaults(storage: StorageConfig, engine: EngineConfig) -> Self {
        Self {
            storage,
            engine,
            bulk_ingest_timeout: defaults::bulk_ingest_timeout(),
            bulk_ingest_poll_interval: defaults::bulk_ingest_poll_interval(),
            copy_concurrency: defaults::copy_concurrency(),
        }
    }

    /// Loads the configuration from a YAML file.
    pub fn load_from_yaml(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let reader = std::fs::File::open(path)
            .with_context(|| format!("unable to load config from {}", path.display()))?;
        Ok(serde_yaml::from_reader(reader)?)
    }
}

/// Object storage configuration.
///
/// The live data plane and the backups may live in different buckets of the
/// same deployment; when `backup_bucket_name` is empty, backups share the
/// data bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage endpoint host.
    #[serde(default = "defaults::storage_address")]
    pub address: String,
    /// Storage endpoint port.
    #[serde(default = "defaults::storage_port")]
    pub port: u16,
    /// Static access key; ignored when `use_iam` is set.
    #[serde(default)]
    pub access_key_id: String,
    /// Static secret key; ignored when `use_iam` is set.
    #[serde(default)]
    pub secret_access_key: String,
    /// Whether to talk to the endpoint over TLS.
    #[serde(default)]
    pub use_ssl: bool,
    /// Bucket holding the live binary logs.
    #[serde(default = "defaults::bucket_name")]
    pub bucket_name: String,
    /// Bucket holding the backups; empty means `bucket_name`.
    #[serde(default)]
    pub backup_bucket_name: String,
    /// Prefix under which the data engine keeps its files.
    #[serde(default = "defaults::root_path")]
    pub root_path: String,
    /// Use instance-profile credentials instead of static keys.
    #[serde(default)]
    pub use_iam: bool,
    /// Metadata endpoint queried for instance-profile credentials.
    #[serde(default)]
    pub iam_endpoint: String,
    /// Whether deployments should create missing buckets. Bucket creation is
    /// an administrative operation outside the object adapter; the flag is
    /// recognized and surfaced for tooling.
    #[serde(default)]
    pub create_bucket_if_missing: bool,
}

impl StorageConfig {
    /// The HTTP(S) endpoint URL of the storage deployment.
    pub fn endpoint(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.address, self.port)
    }

    /// The bucket backups are written to.
    pub fn backup_bucket(&self) -> &str {
        if self.backup_bucket_name.is_empty() {
            &self.bucket_name
        } else {
            &self.backup_bucket_name
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            address: defaults::storage_address(),
            port: defaults::storage_port(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            use_ssl: false,
            bucket_name: defaults::bucket_name(),
            backup_bucket_name: String::new(),
            root_path: defaults::root_path(),
            use_iam: false,
            iam_endpoint: String::new(),
            create_bucket_if_missing: false,
        }
    }
}

/// Data engine connection configuration. The client is created lazily on the
/// first operation and torn down on close.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Proxy host of the cluster.
    #[serde(default = "defaults::engine_address")]
    pub address: String,
    /// Proxy port of the cluster.
    #[serde(default = "defaults::engine_port")]
    pub port: u16,
}

impl EngineConfig {
    /// The `host:port` address of the cluster proxy.
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            address: defaults::engine_address(),
            port: defaults::engine_port(),
        }
    }
}

/// Default values of the backup service configuration.
pub mod defaults {
    use std::time::Duration;

    /// Default bulk ingest deadline: ten minutes per task.
    pub fn bulk_ingest_timeout() -> Duration {
        Duration::from_secs(600)
    }

    /// Default bulk ingest poll interval.
    pub fn bulk_ingest_poll_interval() -> Duration {
        Duration::from_secs(3)
    }

    /// Default snapshot copy fan-out.
    pub fn copy_concurrency() -> usize {
        10
    }

    /// Default storage host.
    pub fn storage_address() -> String {
        "localhost".to_owned()
    }

    /// Default storage port.
    pub fn storage_port() -> u16 {
        9000
    }

    /// Default data bucket.
    pub fn bucket_name() -> String {
        "a-bucket".to_owned()
    }

    /// Default storage root prefix.
    pub fn root_path() -> String {
        "files".to_owned()
    }

    /// Default cluster proxy host.
    pub fn engine_address() -> String {
        "localhost".to_owned()
    }

    /// Default cluster proxy port.
    pub fn engine_port() -> u16 {
        19530
    }
}
