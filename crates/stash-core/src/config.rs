//! Cache run configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// The operation performed on every configured mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Archive mounts and upload them under the current branch.
    Rebuild,
    /// Download the branch (or default branch) cache and extract it into mounts.
    Restore,
}

impl Mode {
    /// Map the CI plugin's boolean pair onto a mode.
    ///
    /// Neither flag set is a no-op run (`None`); both set is rejected.
    pub fn from_flags(rebuild: bool, restore: bool) -> Result<Option<Mode>> {
        match (rebuild, restore) {
            (true, true) => Err(Error::Config(
                "rebuild and restore are mutually exclusive".to_string(),
            )),
            (true, false) => Ok(Some(Mode::Rebuild)),
            (false, true) => Ok(Some(Mode::Restore)),
            (false, false) => Ok(None),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Rebuild => f.write_str("rebuild"),
            Mode::Restore => f.write_str("restore"),
        }
    }
}

/// Compression algorithm applied to archives before upload.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    #[default]
    Zstd,
    Gzip,
    Lz4,
}

/// Retry behaviour for transient transport failures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before the first retry.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Upper bound for the exponential backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Backoff before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        let delay = self.initial_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

/// Connection settings for an S3-compatible object store.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct S3Settings {
    /// Custom endpoint (MinIO, Ceph, R2). AWS when unset.
    pub endpoint: Option<String>,
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Static credentials. The default AWS provider chain is used when unset.
    #[serde(default, skip_serializing)]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
    /// Path-style addressing. Needed for MinIO, off for AWS.
    #[serde(default)]
    pub path_style: bool,
    /// Canned ACL applied to uploaded objects.
    #[serde(default = "default_acl")]
    pub acl: String,
    /// Server-side encryption value passed through on upload (e.g. `AES256`).
    #[serde(default)]
    pub encryption: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_acl() -> String {
    "private".to_string()
}

impl S3Settings {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            bucket: bucket.into(),
            region: default_region(),
            access_key: None,
            secret_key: None,
            path_style: false,
            acl: default_acl(),
            encryption: None,
        }
    }
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key", &self.access_key.as_ref().map(|_| "<redacted>"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("path_style", &self.path_style)
            .field("acl", &self.acl)
            .field("encryption", &self.encryption)
            .finish()
    }
}

/// Where cache objects live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StorageConfig {
    S3(S3Settings),
    /// Objects stored as files under a local directory.
    Filesystem { root: PathBuf },
}

/// Fully resolved parameters for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Repository identifier, e.g. `org/project`.
    pub repo: String,
    /// Branch being built.
    pub branch: String,
    /// Fallback namespace for restores.
    #[serde(default = "default_branch")]
    pub default_branch: String,
    /// Mount paths, relative to `workdir` unless absolute.
    #[serde(default)]
    pub mounts: Vec<PathBuf>,
    /// `None` runs nothing.
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
    /// Prepended verbatim to every object key.
    #[serde(default)]
    pub key_prefix: Option<String>,
    #[serde(default)]
    pub compression: CompressionType,
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Mounts processed at the same time.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Overall deadline for the invocation, in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_branch() -> String {
    "master".to_string()
}

fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}

fn default_parallelism() -> usize {
    4
}

impl CacheConfig {
    /// Create a config with defaults for everything except the identifiers.
    pub fn new(repo: impl Into<String>, branch: impl Into<String>, storage: StorageConfig) -> Self {
        Self {
            repo: repo.into(),
            branch: branch.into(),
            default_branch: default_branch(),
            mounts: vec![],
            mode: None,
            workdir: default_workdir(),
            key_prefix: None,
            compression: CompressionType::default(),
            storage,
            retry: RetryPolicy::default(),
            parallelism: default_parallelism(),
            timeout_ms: None,
        }
    }

    pub fn with_default_branch(mut self, branch: impl Into<String>) -> Self {
        self.default_branch = branch.into();
        self
    }

    pub fn with_mounts<I, P>(mut self, mounts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.mounts = mounts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mode(mut self, mode: Option<Mode>) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = workdir.into();
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Deadlines below a millisecond are rounded up so they stay non-zero.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.timeout_ms = Some(if timeout.is_zero() { 0 } else { millis.max(1) });
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Check the identifiers and storage settings before anything is touched.
    pub fn validate(&self) -> Result<()> {
        if self.repo.trim().is_empty() {
            return Err(Error::Config("repo must not be empty".to_string()));
        }
        if self.branch.trim().is_empty() {
            return Err(Error::Config("branch must not be empty".to_string()));
        }
        if self.default_branch.trim().is_empty() {
            return Err(Error::Config(
                "default branch must not be empty".to_string(),
            ));
        }
        if self.parallelism == 0 {
            return Err(Error::Config(
                "parallelism must be at least 1".to_string(),
            ));
        }
        if self.timeout_ms == Some(0) {
            return Err(Error::Config("timeout must be greater than zero".to_string()));
        }
        if self.mounts.iter().any(|m| m.as_os_str().is_empty()) {
            return Err(Error::Config("mount paths must not be empty".to_string()));
        }

        match &self.storage {
            StorageConfig::S3(s3) => {
                if s3.bucket.trim().is_empty() {
                    return Err(Error::Config("bucket must not be empty".to_string()));
                }
                if s3.region.trim().is_empty() {
                    return Err(Error::Config("region must not be empty".to_string()));
                }
                if s3.access_key.is_some() != s3.secret_key.is_some() {
                    return Err(Error::Config(
                        "access key and secret key must be set together".to_string(),
                    ));
                }
            }
            StorageConfig::Filesystem { root } => {
                if root.as_os_str().is_empty() {
                    return Err(Error::Config(
                        "filesystem cache root must not be empty".to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}
