//! Error types for stash.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    // Storage errors
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Transport error: {message}")]
    Transport { message: String, transient: bool },

    // Filesystem errors
    #[error("Mount not found: {}", .0.display())]
    MountNotFound(PathBuf),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Archive errors
    #[error("Corrupt cache stream: {0}")]
    CorruptStream(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Transport failure that is worth retrying (timeouts, resets, 5xx).
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            transient: true,
        }
    }

    /// Transport failure that will not go away on retry (auth, 4xx).
    pub fn permanent(message: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            transient: false,
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport {
                transient: true,
                ..
            }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Transport { .. } => ErrorKind::Transport,
            Error::MountNotFound(_) | Error::Filesystem { .. } => ErrorKind::Filesystem,
            Error::CorruptStream(_) => ErrorKind::CorruptStream,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Coarse error classification used in run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Config,
    NotFound,
    Transport,
    Filesystem,
    CorruptStream,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "config",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Transport => "transport",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::CorruptStream => "corrupt_stream",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_transport_errors_retry() {
        assert!(Error::transient("connection reset").is_transient());
        assert!(!Error::permanent("access denied").is_transient());
        assert!(!Error::NotFound("repo/master/data".into()).is_transient());
        assert!(!Error::CorruptStream("bad magic".into()).is_transient());
    }

    #[test]
    fn test_kind_groups_filesystem_errors() {
        let missing = Error::MountNotFound(PathBuf::from("data"));
        let denied = Error::filesystem(
            "data/secret",
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert_eq!(missing.kind(), ErrorKind::Filesystem);
        assert_eq!(denied.kind(), ErrorKind::Filesystem);
        assert_eq!(denied.kind().to_string(), "filesystem");
    }
}
