use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure kinds a git host can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("unsupported git host `{domain}`")]
    UnsupportedHost { domain: String },

    #[error("unauthorized (check your access token)")]
    Unauthorized,

    #[error("rate limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("not found")]
    NotFound,

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("metadata for {0} is already cached")]
    AlreadySet(String),

    #[error("no cached metadata for {0}")]
    Missing(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{operation} failed for {repository}")]
    Host {
        repository: String,
        operation: &'static str,
        #[source]
        source: HostError,
    },

    #[error("invalid version tag `{0}`")]
    InvalidTag(String),

    #[error("invalid repository url `{0}`")]
    InvalidUrl(String),

    #[error(
        "{package} {requested} is incompatible with the resolved {current} (major version change; use --force to override)"
    )]
    VersionIncompatible {
        package: String,
        current: String,
        requested: String,
    },

    #[error("no version of {package} matches `{constraint}`")]
    UnmatchedConstraint { package: String, constraint: String },

    #[error("package {0} is already declared")]
    AlreadyDeclared(String),

    #[error("package {0} is not declared")]
    NotDeclared(String),

    #[error("checksum mismatch for {package}\n  Expected: {expected}\n  Got: {actual}")]
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    #[error("lock file {} is corrupt: {reason}", path.display())]
    CorruptLock { path: PathBuf, reason: String },

    #[error("failed to parse {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode JSON")]
    Encode(#[from] serde_json::Error),

    #[error("filesystem error at {}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Attach a path to an `io::Error`.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::Filesystem {
            path: path.into(),
            source,
        })
    }
}
