//! In-memory git host and project helpers shared by the integration tests.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use flate2::Compression;
use flate2::write::GzEncoder;
use srcpkg_core::gateway::{GitHost, Hosts};
use srcpkg_core::{HostError, Repository};

type Files = BTreeMap<String, String>;

#[derive(Default)]
struct FakeRepo {
    tags: BTreeMap<String, String>,
    latest: Option<String>,
    commits: HashMap<String, Files>,
}

/// A git host serving repositories from memory, counting the calls it gets.
#[derive(Default)]
pub struct FakeHost {
    repos: Mutex<HashMap<String, FakeRepo>>,
    next_commit: AtomicUsize,
    pub downloads: AtomicUsize,
    pub tag_resolutions: AtomicUsize,
}

fn key(owner: &str, repo: &str) -> String {
    format!("{}/{}", owner.to_lowercase(), repo.to_lowercase())
}

fn files(entries: &[(&str, &str)]) -> Files {
    entries
        .iter()
        .map(|(path, content)| (path.to_string(), content.to_string()))
        .collect()
}

/// A `srcpkg.config.json` declaring `packages`.
#[allow(unused)]
pub fn manifest(packages: &[(&str, &str)]) -> String {
    let packages: BTreeMap<&str, &str> = packages.iter().copied().collect();
    serde_json::json!({ "packages": packages }).to_string()
}

#[allow(unused)]
impl FakeHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hosts(self: &Arc<Self>) -> Hosts {
        Hosts::new().register("github.com", self.clone())
    }

    fn commit(&self, owner_repo: &str, entries: &[(&str, &str)]) -> String {
        let (owner, repo) = owner_repo.split_once('/').unwrap();
        let n = self.next_commit.fetch_add(1, Ordering::SeqCst);
        let hash = format!("{owner}-{repo}-{n:06}");
        self.repos
            .lock()
            .unwrap()
            .entry(key(owner, repo))
            .or_default()
            .commits
            .insert(hash.clone(), files(entries));
        hash
    }

    /// Create a commit and point `tag` at it (moving the tag if it exists).
    pub fn publish(&self, owner_repo: &str, tag: &str, entries: &[(&str, &str)]) -> String {
        let hash = self.commit(owner_repo, entries);
        let (owner, repo) = owner_repo.split_once('/').unwrap();
        let mut repos = self.repos.lock().unwrap();
        let fake = repos.get_mut(&key(owner, repo)).unwrap();
        fake.tags.insert(tag.to_string(), hash.clone());
        fake.latest = Some(hash.clone());
        hash
    }

    /// Create a commit on the default branch without tagging it.
    pub fn push(&self, owner_repo: &str, entries: &[(&str, &str)]) -> String {
        let hash = self.commit(owner_repo, entries);
        let (owner, repo) = owner_repo.split_once('/').unwrap();
        self.repos
            .lock()
            .unwrap()
            .get_mut(&key(owner, repo))
            .unwrap()
            .latest = Some(hash.clone());
        hash
    }

    /// Rewrite the content of an existing commit.
    pub fn tamper(&self, owner_repo: &str, hash: &str, entries: &[(&str, &str)]) {
        let (owner, repo) = owner_repo.split_once('/').unwrap();
        self.repos
            .lock()
            .unwrap()
            .get_mut(&key(owner, repo))
            .unwrap()
            .commits
            .insert(hash.to_string(), files(entries));
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    fn with_repo<T>(
        &self,
        repository: &Repository,
        f: impl FnOnce(&FakeRepo) -> Result<T, HostError>,
    ) -> Result<T, HostError> {
        let repos = self.repos.lock().unwrap();
        let repo = repos
            .get(&key(&repository.owner, &repository.repo))
            .ok_or(HostError::NotFound)?;
        f(repo)
    }

    fn files_at(&self, repository: &Repository, hash: &str) -> Result<Files, HostError> {
        self.with_repo(repository, |r| {
            r.commits.get(hash).cloned().ok_or(HostError::NotFound)
        })
    }
}

impl GitHost for FakeHost {
    fn list_tags(&self, repository: &Repository) -> Result<Vec<String>, HostError> {
        self.with_repo(repository, |r| Ok(r.tags.keys().cloned().collect()))
    }

    fn resolve_tag_to_commit(
        &self,
        repository: &Repository,
        tag: &str,
    ) -> Result<String, HostError> {
        self.tag_resolutions.fetch_add(1, Ordering::SeqCst);
        self.with_repo(repository, |r| {
            r.tags.get(tag).cloned().ok_or(HostError::NotFound)
        })
    }

    fn resolve_latest_commit(&self, repository: &Repository) -> Result<String, HostError> {
        self.with_repo(repository, |r| r.latest.clone().ok_or(HostError::NotFound))
    }

    fn file_exists(
        &self,
        repository: &Repository,
        hash: &str,
        path: &str,
    ) -> Result<bool, HostError> {
        Ok(self.files_at(repository, hash)?.contains_key(path))
    }

    fn file_content(
        &self,
        repository: &Repository,
        hash: &str,
        path: &str,
    ) -> Result<String, HostError> {
        self.files_at(repository, hash)?
            .get(path)
            .cloned()
            .ok_or(HostError::NotFound)
    }

    fn download_archive(
        &self,
        repository: &Repository,
        hash: &str,
    ) -> Result<Box<dyn Read + Send>, HostError> {
        let files = self.files_at(repository, hash)?;
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let top = format!("{}-{}-{}", repository.owner, repository.repo, hash);
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, content) in &files {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_entry_type(tar::EntryType::Regular);
            builder
                .append_data(&mut header, format!("{top}/{path}"), content.as_bytes())
                .map_err(|e| HostError::Transport(e.to_string()))?;
        }
        let bytes = builder
            .into_inner()
            .and_then(|gz| gz.finish())
            .map_err(|e| HostError::Transport(e.to_string()))?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// Write a project manifest declaring `packages` into `root`.
#[allow(unused)]
pub fn write_project(root: &Path, packages: &[(&str, &str)]) {
    fs::write(root.join("srcpkg.config.json"), manifest(packages)).unwrap();
}

#[allow(unused)]
pub fn read(path: impl AsRef<Path>) -> String {
    fs::read_to_string(path).unwrap()
}
