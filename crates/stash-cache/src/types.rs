//! Per-mount outcomes and the run report.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use stash_core::{Error, ErrorKind, Mode};
use std::fmt;
use std::path::PathBuf;

/// What happened to one mount.
#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MountOutcome {
    /// Archive uploaded under `key`.
    Rebuilt { key: String, bytes: u64 },
    /// Object `key` extracted into the mount. `fallback` is set when the key
    /// belongs to the default branch.
    Restored {
        key: String,
        bytes: u64,
        fallback: bool,
    },
    /// Neither the branch nor the default branch had an object.
    NoCache,
    Failed {
        #[serde(serialize_with = "serialize_error")]
        error: Error,
    },
    /// The overall deadline elapsed before the mount finished.
    TimedOut,
}

fn serialize_error<S: Serializer>(error: &Error, serializer: S) -> Result<S::Ok, S::Error> {
    let mut s = serializer.serialize_struct("Error", 2)?;
    s.serialize_field("kind", &error.kind())?;
    s.serialize_field("message", &error.to_string())?;
    s.end()
}

impl MountOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, MountOutcome::Failed { .. } | MountOutcome::TimedOut)
    }

    /// Kind used in summaries; timeouts are reported as transport failures.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            MountOutcome::Failed { error } => Some(error.kind()),
            MountOutcome::TimedOut => Some(ErrorKind::Transport),
            _ => None,
        }
    }
}

/// Outcome for one configured mount.
#[derive(Debug, Serialize)]
pub struct MountReport {
    pub mount: PathBuf,
    #[serde(flatten)]
    pub outcome: MountOutcome,
}

/// Result of one invocation, mounts in configured order.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub mode: Option<Mode>,
    pub mounts: Vec<MountReport>,
}

impl RunReport {
    pub fn empty(mode: Option<Mode>) -> Self {
        Self {
            mode,
            mounts: vec![],
        }
    }

    /// False iff any mount failed or timed out. Cold caches are not failures.
    pub fn success(&self) -> bool {
        !self.mounts.iter().any(|m| m.outcome.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &MountReport> {
        self.mounts.iter().filter(|m| m.outcome.is_failure())
    }

    /// Mounts whose restore found no object.
    pub fn cold(&self) -> impl Iterator<Item = &MountReport> {
        self.mounts
            .iter()
            .filter(|m| matches!(m.outcome, MountOutcome::NoCache))
    }

    pub fn total_bytes(&self) -> u64 {
        self.mounts
            .iter()
            .map(|m| match &m.outcome {
                MountOutcome::Rebuilt { bytes, .. } | MountOutcome::Restored { bytes, .. } => {
                    *bytes
                }
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Display for MountReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mount = self.mount.display();
        match &self.outcome {
            MountOutcome::Rebuilt { key, bytes } => {
                write!(f, "{}: rebuilt {} ({} bytes)", mount, key, bytes)
            }
            MountOutcome::Restored {
                key,
                bytes,
                fallback,
            } => {
                write!(f, "{}: restored {} ({} bytes)", mount, key, bytes)?;
                if *fallback {
                    f.write_str(" from default branch")?;
                }
                Ok(())
            }
            MountOutcome::NoCache => write!(f, "{}: no cache", mount),
            MountOutcome::Failed { error } => {
                write!(f, "{}: failed [{}] {}", mount, error.kind(), error)
            }
            MountOutcome::TimedOut => write!(f, "{}: timed out", mount),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(mode) = self.mode else {
            return writeln!(f, "No mode selected, nothing to do");
        };

        writeln!(f, "{} of {} mount(s)", mode, self.mounts.len())?;
        for report in &self.mounts {
            writeln!(f, "  {}", report)?;
        }

        let failed: Vec<_> = self.failures().collect();
        if !failed.is_empty() {
            writeln!(f, "Failed mounts:")?;
            for report in failed {
                let kind = report
                    .outcome
                    .error_kind()
                    .map(|k| k.to_string())
                    .unwrap_or_default();
                writeln!(f, "  {} ({})", report.mount.display(), kind)?;
            }
        }

        let cold: Vec<_> = self.cold().collect();
        if !cold.is_empty() {
            writeln!(f, "Cold cache:")?;
            for report in cold {
                writeln!(f, "  {}", report.mount.display())?;
            }
        }
        Ok(())
    }
}
