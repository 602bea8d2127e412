//! Apply a resolved package set to disk.
//!
//! Sync runs in phases and touches install directories only once every
//! package is staged and verified:
//!
//! 1. **Plan**: packages whose installed commit is unchanged are kept. Their
//!    checksum is recomputed; a tree that drifted from the lock is re-staged.
//! 2. **Stage**: other packages are downloaded into `.srcpkg/staging`. A staged
//!    tree whose marker records the same commit and checksum is reused.
//! 3. **Verify**: a staged tree must match the checksum expected from the lock.
//! 4. **Commit**: install directories are swapped for staged trees, orphans
//!    are removed and the new lock set is written. Replaced directories are
//!    parked in `.srcpkg/backup` until the lock is on disk and put back if any
//!    step fails.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::instrument;

use crate::archive::unpack_tarball;
use crate::checksum::content_checksum;
use crate::error::IoContext;
use crate::gateway::Hosts;
use crate::lock::{LockSet, LockedPackage};
use crate::model::{Dependency, Identity, Repository};
use crate::project::Project;
use crate::resolve::install_root;
use crate::{Error, Result};

/// What a sync changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub installed: Vec<String>,
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
    /// Archives fetched from the host.
    pub downloads: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.installed.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }
}

/// Marker written next to a staged tree.
#[derive(Debug, Serialize, Deserialize)]
struct StagedMarker {
    hash: String,
    checksum: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Install,
    Update,
}

enum Plan {
    Keep(Dependency),
    Stage(Dependency, Change),
}

struct Staged {
    dependency: Dependency,
    change: Change,
    dir: PathBuf,
    marker: PathBuf,
    downloaded: bool,
}

/// An install directory moved aside during commit.
struct Replaced {
    root: PathBuf,
    backup: Option<PathBuf>,
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e).at(path),
        _ => Ok(()),
    }
}

fn remove_file_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e).at(path),
        _ => Ok(()),
    }
}

/// Remove `dir` if it is empty. Used for owner directories.
fn remove_if_empty(dir: &Path) {
    let empty = fs::read_dir(dir).is_ok_and(|mut entries| entries.next().is_none());
    if empty && fs::remove_dir(dir).is_ok() {
        log::debug!("Removed empty directory {}", dir.display());
    }
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }
    fs::rename(from, to).at(to)
}

pub struct SyncEngine<'a> {
    hosts: &'a Hosts,
    project: &'a Project,
}

impl<'a> SyncEngine<'a> {
    pub fn new(hosts: &'a Hosts, project: &'a Project) -> Self {
        SyncEngine { hosts, project }
    }

    /// Install exactly `resolved`, replacing whatever `previous` recorded.
    ///
    /// A dependency carrying a checksum must stage to exactly that checksum.
    /// On success every returned dependency carries its checksum and the lock
    /// file has been written. On failure, install directories and the lock
    /// file are as they were.
    #[instrument(name = "sync", skip_all)]
    pub fn run(
        &self,
        resolved: Vec<Dependency>,
        previous: Option<&LockSet>,
    ) -> Result<(Vec<Dependency>, SyncReport)> {
        let mut report = SyncReport::default();
        let mut kept = Vec::new();
        let mut to_stage = Vec::new();

        for dependency in resolved {
            let installed = previous.and_then(|lock| lock.get(dependency.repository()));
            match self.plan(dependency, installed)? {
                Plan::Keep(dependency) => kept.push(dependency),
                Plan::Stage(dependency, change) => to_stage.push((dependency, change)),
            }
        }

        let staged: Vec<Staged> = to_stage
            .into_par_iter()
            .map(|(dependency, change)| self.stage(dependency, change))
            .collect::<Result<_>>()?;
        report.downloads = staged.iter().filter(|s| s.downloaded).count();

        let retained: HashSet<Identity> = kept
            .iter()
            .chain(staged.iter().map(|s| &s.dependency))
            .map(Dependency::identity)
            .collect();
        let orphans = previous
            .map(|lock| self.orphans(lock, &retained))
            .unwrap_or_default();

        let roots = self.project.manifest.dependencies()?;
        let lock = LockSet::from_dependencies(
            kept.iter().chain(staged.iter().map(|s| &s.dependency)),
        )?
        .with_roots(roots.iter().map(|(repository, _)| repository));
        self.commit(&staged, &orphans, &lock)?;

        for dependency in &kept {
            report.unchanged.push(dependency.commit.version.to_string());
        }
        for staged in &staged {
            let name = staged.dependency.commit.version.to_string();
            match staged.change {
                Change::Install => report.installed.push(name),
                Change::Update => report.updated.push(name),
            }
        }
        for (repository, package) in &orphans {
            report
                .removed
                .push(format!("{}@{}", repository, package.version));
        }

        let mut by_identity: HashMap<Identity, Dependency> = kept
            .into_iter()
            .chain(staged.into_iter().map(|s| s.dependency))
            .map(|d| (d.identity(), d))
            .collect();
        let mut order: Vec<Identity> = by_identity.keys().cloned().collect();
        order.sort();
        let installed: Vec<Dependency> = order
            .iter()
            .filter_map(|identity| by_identity.remove(identity))
            .collect();

        log::debug!(
            "Synced {} package(s): {} installed, {} updated, {} removed, {} downloads",
            installed.len(),
            report.installed.len(),
            report.updated.len(),
            report.removed.len(),
            report.downloads
        );
        Ok((installed, report))
    }

    fn plan(&self, mut dependency: Dependency, installed: Option<&LockedPackage>) -> Result<Plan> {
        let Some(installed) = installed else {
            return Ok(Plan::Stage(dependency, Change::Install));
        };

        if installed.hash != dependency.commit.hash {
            if installed.version == dependency.tag().as_str()
                && !dependency.tag().is_development()
            {
                log::warn!(
                    "Tag {} of {} moved from {} to {}; fetching again",
                    installed.version,
                    dependency.repository(),
                    installed.hash,
                    dependency.commit.hash
                );
            }
            return Ok(Plan::Stage(dependency, Change::Update));
        }

        if !dependency.root.is_dir() {
            log::debug!("{} is missing, reinstalling", dependency.root.display());
            return Ok(Plan::Stage(dependency, Change::Install));
        }

        let actual = content_checksum(&dependency.root)?;
        if let Some(expected) = &installed.checksum
            && expected != &actual
        {
            log::warn!(
                "{} was modified since it was installed; restoring",
                dependency.root.display()
            );
            dependency.checksum = Some(expected.clone());
            return Ok(Plan::Stage(dependency, Change::Update));
        }

        dependency.checksum = Some(actual);
        Ok(Plan::Keep(dependency))
    }

    fn read_marker(path: &Path) -> Option<StagedMarker> {
        let content = fs::read_to_string(path).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Reuse or download the staged tree of `dependency` and verify it.
    fn stage(&self, mut dependency: Dependency, change: Change) -> Result<Staged> {
        let repository = dependency.repository().clone();
        let dir = self.project.staging_dir(&repository);
        let marker = self.project.staging_marker(&repository);

        let reusable = Self::read_marker(&marker)
            .filter(|m| m.hash == dependency.commit.hash && dir.is_dir())
            .and_then(|m| {
                let actual = content_checksum(&dir).ok()?;
                (actual == m.checksum).then_some(actual)
            });

        let (actual, downloaded) = match reusable {
            Some(actual) => {
                log::debug!("Reusing staged {}", dependency.commit.version);
                (actual, false)
            }
            None => (self.download(&dependency, &dir, &marker)?, true),
        };

        if let Some(expected) = &dependency.checksum
            && expected != &actual
        {
            remove_dir_if_exists(&dir)?;
            remove_file_if_exists(&marker)?;
            return Err(Error::ChecksumMismatch {
                package: dependency.commit.version.to_string(),
                expected: expected.clone(),
                actual,
            });
        }

        dependency.checksum = Some(actual);
        Ok(Staged {
            dependency,
            change,
            dir,
            marker,
            downloaded,
        })
    }

    fn download(&self, dependency: &Dependency, dir: &Path, marker: &Path) -> Result<String> {
        remove_dir_if_exists(dir)?;
        remove_file_if_exists(marker)?;

        let parent = dir.parent().unwrap_or(dir);
        fs::create_dir_all(parent).at(parent)?;
        let temp = TempDir::new_in(parent).at(parent)?;

        log::debug!("Downloading {}", dependency.commit.version);
        let archive = self
            .hosts
            .download_archive(dependency.repository(), &dependency.commit.hash)?;
        unpack_tarball(archive, temp.path())?;
        let checksum = content_checksum(temp.path())?;

        let unpacked = temp.keep();
        if let Err(e) = fs::rename(&unpacked, dir) {
            let _ = fs::remove_dir_all(&unpacked);
            return Err(e).at(dir);
        }
        let content = serde_json::to_string(&StagedMarker {
            hash: dependency.commit.hash.clone(),
            checksum: checksum.clone(),
        })?;
        crate::write_atomic(marker, content.as_bytes())?;
        Ok(checksum)
    }

    fn orphans(
        &self,
        previous: &LockSet,
        retained: &HashSet<Identity>,
    ) -> Vec<(Repository, LockedPackage)> {
        previous
            .packages
            .iter()
            .filter_map(|(url, package)| {
                let repository = match Repository::parse(url) {
                    Ok(repository) => repository,
                    Err(_) => Repository::new("", &package.owner, &package.repo),
                };
                (!retained.contains(&repository.identity()))
                    .then(|| (repository, package.clone()))
            })
            .collect()
    }

    /// Swap staged trees into place, remove orphans and write `lock`, or undo everything.
    fn commit(
        &self,
        staged: &[Staged],
        orphans: &[(Repository, LockedPackage)],
        lock: &LockSet,
    ) -> Result<()> {
        let backup_root = self.project.backup_root();
        remove_dir_if_exists(&backup_root)?;

        let mut replaced = Vec::new();
        let result = self
            .apply(staged, orphans, &backup_root, &mut replaced)
            .and_then(|()| lock.save(&self.project.lock_path()));
        if let Err(err) = result {
            log::warn!("Sync failed, restoring {} package(s)", replaced.len());
            if Self::rollback(replaced) {
                remove_dir_if_exists(&backup_root)?;
            }
            return Err(err);
        }

        for staged in staged {
            remove_file_if_exists(&staged.marker)?;
            if let Some(owner) = staged.dir.parent() {
                remove_if_empty(owner);
            }
        }
        remove_dir_if_exists(&backup_root)
    }

    fn apply(
        &self,
        staged: &[Staged],
        orphans: &[(Repository, LockedPackage)],
        backup_root: &Path,
        replaced: &mut Vec<Replaced>,
    ) -> Result<()> {
        let packages_root = self.project.packages_root();
        let park = |root: &Path, owner: &str, repo: &str| -> Result<Option<PathBuf>> {
            if !root.exists() {
                return Ok(None);
            }
            let backup = backup_root.join(owner).join(repo);
            rename(root, &backup)?;
            Ok(Some(backup))
        };

        for staged in staged {
            let repository = staged.dependency.repository();
            let root = &staged.dependency.root;
            let backup = park(root, &repository.owner, &repository.repo)?;
            replaced.push(Replaced {
                root: root.clone(),
                backup,
            });
            rename(&staged.dir, root)?;
            log::debug!("Installed {}", staged.dependency.commit.version);
        }

        for (repository, package) in orphans {
            let root = install_root(&packages_root, repository);
            let backup = park(&root, &repository.owner, &repository.repo)?;
            replaced.push(Replaced {
                root: root.clone(),
                backup,
            });
            if let Some(owner) = root.parent() {
                remove_if_empty(owner);
            }
            log::debug!("Removed {}@{}", repository, package.version);
        }
        Ok(())
    }

    /// Put parked directories back. False when something could not be restored,
    /// in which case the backup stays on disk.
    fn rollback(replaced: Vec<Replaced>) -> bool {
        let mut restored = true;
        for Replaced { root, backup } in replaced.into_iter().rev() {
            if let Err(e) = fs::remove_dir_all(&root)
                && e.kind() != io::ErrorKind::NotFound
            {
                log::warn!("Failed to remove {}: {}", root.display(), e);
                restored = false;
            }
            if let Some(backup) = backup
                && let Err(e) = rename(&backup, &root)
            {
                log::warn!("Failed to restore {}: {}", root.display(), e);
                restored = false;
            }
        }
        restored
    }
}
