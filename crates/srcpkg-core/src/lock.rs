//! Lock file (`srcpkg.config-lock.json`).
//!
//! Records the exact commit and content checksum of every installed package,
//! keyed by canonical repository URL, plus a checksum over the whole package
//! map so edits by hand are detected. `roots` lists the packages the manifest
//! declared when the lock was written:
//!
//! ```json
//! {
//!   "checksum": "h1:...",
//!   "roots": ["https://github.com/acme/util.git"],
//!   "packages": {
//!     "https://github.com/acme/util.git": {
//!       "owner": "acme",
//!       "repo": "util",
//!       "version": "v1.2.0",
//!       "hash": "5f0c...",
//!       "checksum": "h1:..."
//!     }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::lock_checksum;
use crate::config::Manifest;
use crate::error::IoContext;
use crate::model::{Commit, Dependency, Identity, Repository, Version};
use crate::resolve::install_root;
use crate::version::Tag;
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedPackage {
    pub owner: String,
    pub repo: String,
    pub version: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockSet {
    pub checksum: String,
    /// Canonical URLs of the declared packages, sorted.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roots: Vec<String>,
    pub packages: BTreeMap<String, LockedPackage>,
}

impl LockSet {
    /// Lock set for a resolved and installed package set.
    pub fn new(packages: BTreeMap<String, LockedPackage>) -> Result<Self> {
        Ok(LockSet {
            checksum: lock_checksum(&packages)?,
            roots: Vec::new(),
            packages,
        })
    }

    /// Record the packages the manifest declares.
    pub fn with_roots<'a>(mut self, roots: impl IntoIterator<Item = &'a Repository>) -> Self {
        let urls: BTreeSet<String> = roots.into_iter().map(Repository::url).collect();
        self.roots = urls.into_iter().collect();
        self
    }

    /// Identities of the recorded roots.
    pub fn root_identities(&self) -> HashSet<Identity> {
        self.roots
            .iter()
            .filter_map(|url| Repository::parse(url).ok())
            .map(|repository| repository.identity())
            .collect()
    }

    pub fn from_dependencies<'a>(
        dependencies: impl IntoIterator<Item = &'a Dependency>,
    ) -> Result<Self> {
        let packages = dependencies
            .into_iter()
            .map(|dep| {
                let repository = dep.repository();
                (
                    repository.url(),
                    LockedPackage {
                        owner: repository.owner.clone(),
                        repo: repository.repo.clone(),
                        version: dep.tag().to_string(),
                        hash: dep.commit.hash.clone(),
                        checksum: dep.checksum.clone(),
                    },
                )
            })
            .collect();
        Self::new(packages)
    }

    /// Whether the recorded checksum matches the package map.
    pub fn verify(&self) -> Result<bool> {
        Ok(lock_checksum(&self.packages)? == self.checksum)
    }

    /// Load the lock file, or `None` when there is none yet.
    ///
    /// Unparseable files and files whose checksum does not match their
    /// packages are rejected as corrupt.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).at(path)?;
        let lock: LockSet = serde_json::from_str(&content).map_err(|e| Error::CorruptLock {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        if !lock.verify()? {
            return Err(Error::CorruptLock {
                path: path.to_path_buf(),
                reason: "checksum does not match the locked packages".to_string(),
            });
        }
        Ok(Some(lock))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        crate::write_atomic(path, content.as_bytes())
    }

    pub fn get(&self, repository: &Repository) -> Option<&LockedPackage> {
        if let Some(package) = self.packages.get(&repository.url()) {
            return Some(package);
        }
        let identity = repository.identity();
        self.packages
            .iter()
            .find(|(url, _)| Repository::parse(url).is_ok_and(|r| r.identity() == identity))
            .map(|(_, package)| package)
    }

    /// Locked packages as dependencies pinned to their recorded commits.
    pub fn dependencies(&self, packages_root: &Path) -> Result<Vec<Dependency>> {
        self.packages
            .iter()
            .map(|(url, package)| {
                let repository = Repository::parse(url)?;
                let version = Version::new(repository, Tag::parse(&package.version)?);
                let root: PathBuf = install_root(packages_root, &version.repository);
                Ok(Dependency {
                    commit: Commit::new(version, package.hash.clone()),
                    manifest: Manifest::default(),
                    root,
                    checksum: package.checksum.clone(),
                })
            })
            .collect()
    }
}
