//! Per-mount rebuild and restore control flow.

use crate::archiver;
use crate::keys;
use crate::retry::with_retry;
use crate::types::{MountOutcome, MountReport, RunReport};
use stash_core::{CacheConfig, Error, Mode, ObjectStore, Result};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tempfile::NamedTempFile;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Runs one invocation against an object store.
pub struct CacheOrchestrator {
    config: Arc<CacheConfig>,
    store: Arc<dyn ObjectStore>,
}

impl CacheOrchestrator {
    pub fn new(config: CacheConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Object key for `mount` under `branch`.
    pub fn key_for(&self, branch: &str, mount: &Path) -> String {
        key_for(&self.config, branch, mount)
    }

    /// Process every mount and fold the outcomes into a report.
    ///
    /// Only configuration problems return `Err`; everything that goes wrong
    /// with a single mount is recorded in that mount's outcome.
    pub async fn run(&self) -> Result<RunReport> {
        self.config.validate()?;

        let Some(mode) = self.config.mode else {
            info!("Neither rebuild nor restore requested, nothing to do");
            return Ok(RunReport::empty(None));
        };

        info!(
            %mode,
            repo = %self.config.repo,
            branch = %self.config.branch,
            mounts = self.config.mounts.len(),
            store = self.store.name(),
            "Starting cache run"
        );

        let deadline = self.config.timeout().map(|t| Instant::now() + t);
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        let mut tasks = JoinSet::new();

        for (index, mount) in self.config.mounts.iter().enumerate() {
            let config = Arc::clone(&self.config);
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let mount = mount.clone();

            tasks.spawn(async move {
                let outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => process_mount(&config, store.as_ref(), mode, &mount).await,
                    Err(e) => MountOutcome::Failed {
                        error: Error::Internal(format!("concurrency limiter closed: {}", e)),
                    },
                };
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<MountOutcome>> =
            self.config.mounts.iter().map(|_| None).collect();

        let timed_out = loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await
                {
                    Ok(next) => next,
                    Err(_) => break true,
                },
                None => tasks.join_next().await,
            };

            match next {
                Some(Ok((index, outcome))) => slots[index] = Some(outcome),
                Some(Err(e)) => error!(error = %e, "Mount task did not complete"),
                None => break false,
            }
        };

        if timed_out {
            warn!(
                remaining = tasks.len(),
                "Deadline elapsed, aborting unfinished mounts"
            );
            tasks.abort_all();
        }

        let mounts = self
            .config
            .mounts
            .iter()
            .zip(slots)
            .map(|(mount, slot)| MountReport {
                mount: mount.clone(),
                outcome: slot.unwrap_or_else(|| {
                    if timed_out {
                        MountOutcome::TimedOut
                    } else {
                        MountOutcome::Failed {
                            error: Error::Internal("mount task panicked".to_string()),
                        }
                    }
                }),
            })
            .collect();

        let report = RunReport {
            mode: Some(mode),
            mounts,
        };
        info!(
            success = report.success(),
            failed = report.failures().count(),
            cold = report.cold().count(),
            bytes = report.total_bytes(),
            "Cache run finished"
        );
        Ok(report)
    }
}

fn key_for(config: &CacheConfig, branch: &str, mount: &Path) -> String {
    keys::resolve_with_prefix(config.key_prefix.as_deref(), &config.repo, branch, mount)
}

fn join_error(stage: &str, e: tokio::task::JoinError) -> Error {
    Error::Internal(format!("{} task failed: {}", stage, e))
}

async fn process_mount(
    config: &CacheConfig,
    store: &dyn ObjectStore,
    mode: Mode,
    mount: &Path,
) -> MountOutcome {
    info!(mount = %mount.display(), %mode, "Processing mount");

    let result = match mode {
        Mode::Rebuild => rebuild(config, store, mount).await,
        Mode::Restore => restore(config, store, mount).await,
    };

    result.unwrap_or_else(|error| {
        error!(
            mount = %mount.display(),
            kind = %error.kind(),
            error = %error,
            "Mount failed"
        );
        MountOutcome::Failed { error }
    })
}

fn staging_file() -> Result<NamedTempFile> {
    tempfile::Builder::new()
        .prefix(".stash-")
        .tempfile()
        .map_err(|e| Error::filesystem(std::env::temp_dir(), e))
}

async fn rebuild(config: &CacheConfig, store: &dyn ObjectStore, mount: &Path) -> Result<MountOutcome> {
    let key = key_for(config, &config.branch, mount);
    let source: PathBuf = config.workdir.join(mount);
    let compression = config.compression;

    let (staged, info) = tokio::task::spawn_blocking(move || {
        let mut staged = staging_file()?;
        let writer = BufWriter::new(staged.as_file_mut());
        let (writer, info) = archiver::archive(&source, compression, writer)?;
        drop(writer);
        Ok::<_, Error>((staged, info))
    })
    .await
    .map_err(|e| join_error("archive", e))??;

    with_retry(&config.retry, "upload", || store.upload_file(&key, staged.path())).await?;

    info!(
        mount = %mount.display(),
        key = %key,
        bytes = info.bytes,
        sha256 = %info.checksum,
        "Mount rebuilt"
    );
    Ok(MountOutcome::Rebuilt {
        key,
        bytes: info.bytes,
    })
}

async fn restore(config: &CacheConfig, store: &dyn ObjectStore, mount: &Path) -> Result<MountOutcome> {
    let branch_key = key_for(config, &config.branch, mount);
    let default_key = key_for(config, &config.default_branch, mount);

    let mut candidates = vec![(branch_key, false)];
    if default_key != candidates[0].0 {
        candidates.push((default_key, true));
    }

    for (key, fallback) in candidates {
        if !with_retry(&config.retry, "exists", || store.exists(&key)).await? {
            debug!(mount = %mount.display(), key = %key, "No object under key");
            continue;
        }

        let staged = staging_file()?;
        let bytes = match with_retry(&config.retry, "download", || {
            store.download_file(&key, staged.path())
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => {
                warn!(key = %key, "Object disappeared before download, trying next key");
                continue;
            }
            Err(e) => return Err(e),
        };

        let dest = config.workdir.join(mount);
        tokio::task::spawn_blocking(move || {
            let object = staged
                .reopen()
                .map_err(|e| Error::filesystem(staged.path(), e))?;
            archiver::extract(BufReader::new(object), &dest)
        })
        .await
        .map_err(|e| join_error("extract", e))??;

        info!(
            mount = %mount.display(),
            key = %key,
            bytes,
            fallback,
            "Mount restored"
        );
        return Ok(MountOutcome::Restored {
            key,
            bytes,
            fallback,
        });
    }

    warn!(mount = %mount.display(), "No cache found, continuing with a cold mount");
    Ok(MountOutcome::NoCache)
}
