//! Git-sourced package management.
//!
//! Projects declare repository URLs with version constraints in
//! `srcpkg.config.json`. [`ops`] resolves them to one version per package,
//! installs them under the packages directory and records the result in
//! `srcpkg.config-lock.json`.

use std::fs;
use std::io::Write;
use std::path::Path;

use atomicwrites::{AtomicFile, OverwriteBehavior};

pub mod archive;
pub mod cache;
pub mod checksum;
pub mod config;
pub mod error;
pub mod gateway;
pub mod graph;
pub mod lock;
pub mod model;
pub mod ops;
pub mod project;
pub mod resolve;
pub mod sync;
pub mod version;

pub use error::{CacheError, Error, HostError, Result};
pub use model::{Commit, Dependency, Identity, Repository, Version};
pub use version::Tag;

use crate::error::IoContext;

/// Write a file through a temporary sibling and rename it into place.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    AtomicFile::new(path, OverwriteBehavior::AllowOverwrite)
        .write(|f| {
            f.write_all(contents)?;
            f.flush()
        })
        .map_err(|err| match err {
            atomicwrites::Error::Internal(e) | atomicwrites::Error::User(e) => e,
        })
        .at(path)
}
