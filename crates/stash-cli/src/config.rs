//! Mapping the CI environment and flags onto a cache configuration.

use crate::Cli;
use anyhow::Context;
use clap::ValueEnum;
use stash_core::{
    CacheConfig, CompressionType, Error, Mode, Result, RetryPolicy, S3Settings, StorageConfig,
};
use std::ffi::OsString;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    #[default]
    S3,
    Filesystem,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum CompressionArg {
    None,
    #[default]
    Zstd,
    Gzip,
    Lz4,
}

impl From<CompressionArg> for CompressionType {
    fn from(arg: CompressionArg) -> Self {
        match arg {
            CompressionArg::None => CompressionType::None,
            CompressionArg::Zstd => CompressionType::Zstd,
            CompressionArg::Gzip => CompressionType::Gzip,
            CompressionArg::Lz4 => CompressionType::Lz4,
        }
    }
}

/// Load `--env-file` (or `PLUGIN_ENV_FILE`) before clap reads the environment.
///
/// Variables already set in the process environment win.
pub fn preload_env_file<I>(args: I) -> anyhow::Result<()>
where
    I: IntoIterator<Item = OsString>,
{
    let path = env_file_arg(args).or_else(|| std::env::var_os("PLUGIN_ENV_FILE").map(PathBuf::from));
    if let Some(path) = path {
        dotenvy::from_path(&path)
            .with_context(|| format!("failed to load env file {}", path.display()))?;
    }
    Ok(())
}

fn env_file_arg<I>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = OsString>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--env-file" {
            return args.next().map(PathBuf::from);
        }
        if let Some(value) = arg.to_str().and_then(|a| a.strip_prefix("--env-file=")) {
            return Some(PathBuf::from(value));
        }
    }
    None
}

/// First non-empty value among the flag and the fallback variables.
fn first_set(
    primary: Option<&str>,
    fallbacks: &[&str],
    lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    primary
        .map(str::to_string)
        .into_iter()
        .chain(fallbacks.iter().filter_map(|name| lookup(*name)))
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Build and validate the run configuration.
///
/// `lookup` resolves the secondary environment names that clap cannot bind
/// (one env var per flag). Nothing here touches storage or the filesystem.
pub fn build_config(cli: &Cli, lookup: impl Fn(&str) -> Option<String>) -> Result<CacheConfig> {
    let mode = Mode::from_flags(cli.rebuild, cli.restore)?;

    let repo = first_set(cli.repo.as_deref(), &["DRONE_REPO"], &lookup)
        .ok_or_else(|| Error::Config("repo is required (--repo, PLUGIN_REPO or DRONE_REPO)".to_string()))?;
    let branch = first_set(cli.branch.as_deref(), &["DRONE_COMMIT_BRANCH"], &lookup).ok_or_else(|| {
        Error::Config(
            "branch is required (--branch, PLUGIN_BRANCH or DRONE_COMMIT_BRANCH)".to_string(),
        )
    })?;

    let storage = match cli.backend {
        Backend::S3 => {
            let bucket = non_empty(cli.bucket.as_deref())
                .ok_or_else(|| Error::Config("bucket is required for the s3 backend".to_string()))?;
            let mut s3 = S3Settings::new(bucket);
            s3.endpoint = first_set(cli.endpoint.as_deref(), &["S3_ENDPOINT"], &lookup);
            if let Some(region) = first_set(cli.region.as_deref(), &["S3_REGION"], &lookup) {
                s3.region = region;
            }
            s3.access_key = first_set(cli.access_key.as_deref(), &["AWS_ACCESS_KEY_ID"], &lookup);
            s3.secret_key =
                first_set(cli.secret_key.as_deref(), &["AWS_SECRET_ACCESS_KEY"], &lookup);
            s3.path_style = cli.path_style;
            s3.acl = cli.acl.trim().to_string();
            s3.encryption = non_empty(cli.encryption.as_deref());
            StorageConfig::S3(s3)
        }
        Backend::Filesystem => {
            let root = cli.cache_root.clone().ok_or_else(|| {
                Error::Config("cache root is required for the filesystem backend".to_string())
            })?;
            StorageConfig::Filesystem { root }
        }
    };

    let mut config = CacheConfig::new(repo, branch, storage)
        .with_default_branch(cli.default_branch.trim())
        .with_mounts(cli.mounts.iter().filter(|m| !m.as_os_str().is_empty()).cloned())
        .with_mode(mode)
        .with_compression(cli.compression.into())
        .with_parallelism(cli.parallelism)
        .with_retry(RetryPolicy {
            max_retries: cli.retries,
            ..RetryPolicy::default()
        });

    if let Some(workdir) = &cli.workdir {
        config = config.with_workdir(workdir);
    }
    if let Some(prefix) = non_empty(cli.key_prefix.as_deref()) {
        config = config.with_key_prefix(prefix);
    }
    config.timeout_ms = cli.timeout_secs.map(|secs| secs.saturating_mul(1_000));

    config.validate()?;
    Ok(config)
}
