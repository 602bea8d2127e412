//! On-disk layout of a project.
//!
//! ```text
//! <root>/
//!   srcpkg.config.json
//!   srcpkg.config-lock.json
//!   <packages-directory>/<owner>/<repo>/
//!   .srcpkg/
//!     lock
//!     staging/<owner>/<repo>/
//!     staging/<owner>/<repo>.staged.json
//!     backup/
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use fslock::LockFile;

use crate::config::{LOCK_FILE, MANIFEST_FILE, Manifest};
use crate::error::IoContext;
use crate::lock::LockSet;
use crate::model::Repository;
use crate::Result;

const STATE_DIR: &str = ".srcpkg";

#[derive(Debug, Clone)]
pub struct Project {
    root: PathBuf,
    pub manifest: Manifest,
}

/// Exclusive hold on a project. Released on drop.
pub struct ProjectLock {
    _file: LockFile,
}

impl Project {
    /// Open the project at `root`. A missing manifest reads as an empty one.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let manifest = Manifest::load(&root.join(MANIFEST_FILE))?;
        Ok(Project { root, manifest })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.root.join(LOCK_FILE)
    }

    pub fn packages_root(&self) -> PathBuf {
        self.root.join(&self.manifest.packages_directory)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(STATE_DIR)
    }

    pub fn staging_root(&self) -> PathBuf {
        self.state_dir().join("staging")
    }

    pub fn staging_dir(&self, repository: &Repository) -> PathBuf {
        self.staging_root()
            .join(&repository.owner)
            .join(&repository.repo)
    }

    pub fn staging_marker(&self, repository: &Repository) -> PathBuf {
        self.staging_root()
            .join(&repository.owner)
            .join(format!("{}.staged.json", repository.repo))
    }

    pub fn backup_root(&self) -> PathBuf {
        self.state_dir().join("backup")
    }

    pub fn load_lock(&self) -> Result<Option<LockSet>> {
        LockSet::load(&self.lock_path())
    }

    pub fn save_manifest(&self) -> Result<()> {
        self.manifest.save(&self.manifest_path())
    }

    /// Block until this process holds the project's advisory lock.
    pub fn lock(&self) -> Result<ProjectLock> {
        lock(&self.root)
    }
}

/// Block until this process holds the advisory lock of the project at `root`.
pub fn lock(root: &Path) -> Result<ProjectLock> {
    let state_dir = root.join(STATE_DIR);
    fs::create_dir_all(&state_dir).at(&state_dir)?;
    let path = state_dir.join("lock");
    let mut file = LockFile::open(&path).at(&path)?;
    file.lock().at(&path)?;
    log::debug!("Acquired project lock {}", path.display());
    Ok(ProjectLock { _file: file })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"{ "packages-directory": "deps" }"#,
        )
        .unwrap();
        let project = Project::open(dir.path()).unwrap();
        let repo = Repository::new("github.com", "acme", "util");

        assert_eq!(project.packages_root(), dir.path().join("deps"));
        assert_eq!(
            project.staging_dir(&repo),
            dir.path().join(".srcpkg/staging/acme/util")
        );
        assert_eq!(
            project.staging_marker(&repo),
            dir.path().join(".srcpkg/staging/acme/util.staged.json")
        );
    }

    #[test]
    fn test_lock_released_on_drop() {
        let dir = tempdir().unwrap();
        let project = Project::open(dir.path()).unwrap();
        let guard = project.lock().unwrap();
        drop(guard);
        let _again = project.lock().unwrap();
        assert!(dir.path().join(".srcpkg/lock").exists());
    }
}
