//! Remote metadata memoized for one resolution run.
//!
//! Entries are keyed by `(repository identity, tag)`. Each key owns its own
//! slot, so concurrent first access to one key loads it once while other keys
//! load in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::Manifest;
use crate::model::{Commit, Identity, Repository, Version};
use crate::version::Tag;
use crate::{CacheError, Result};

type Slot<T> = Arc<Mutex<Option<T>>>;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub commit: Commit,
    pub manifest: Manifest,
    /// Resolved sub-dependencies, once known.
    pub packages: Option<Vec<Commit>>,
}

#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: Mutex<HashMap<(Identity, Tag), Slot<CacheEntry>>>,
    tags: Mutex<HashMap<Identity, Slot<Vec<String>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn key(version: &Version) -> (Identity, Tag) {
    (version.repository.identity(), version.tag.clone())
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, version: &Version) -> Slot<CacheEntry> {
        lock(&self.entries).entry(key(version)).or_default().clone()
    }

    fn existing_slot(&self, version: &Version) -> Option<Slot<CacheEntry>> {
        lock(&self.entries).get(&key(version)).cloned()
    }

    pub fn exists(&self, version: &Version) -> bool {
        self.get(version).is_some()
    }

    pub fn get(&self, version: &Version) -> Option<CacheEntry> {
        let slot = self.existing_slot(version)?;
        let entry = lock(&slot);
        entry.clone()
    }

    /// Record the commit and manifest of a version.
    ///
    /// Fails if the version is already cached and its sub-dependencies have not
    /// been recorded with [`MetadataCache::update`] since.
    pub fn set(&self, version: &Version, commit: Commit, manifest: Manifest) -> Result<()> {
        let slot = self.slot(version);
        let mut entry = lock(&slot);
        if entry.as_ref().is_some_and(|e| e.packages.is_none()) {
            return Err(CacheError::AlreadySet(version.to_string()).into());
        }
        *entry = Some(CacheEntry {
            commit,
            manifest,
            packages: None,
        });
        Ok(())
    }

    pub fn update(&self, version: &Version, packages: Vec<Commit>) -> Result<()> {
        let slot = self
            .existing_slot(version)
            .ok_or_else(|| CacheError::Missing(version.to_string()))?;
        let mut entry = lock(&slot);
        let entry = entry
            .as_mut()
            .ok_or_else(|| CacheError::Missing(version.to_string()))?;
        entry.packages = Some(packages);
        Ok(())
    }

    /// Cached entry for `version`, loading commit and manifest with `load` on first access.
    ///
    /// Only the slot for this key is held while loading.
    pub fn get_or_load<F>(&self, version: &Version, load: F) -> Result<CacheEntry>
    where
        F: FnOnce() -> Result<(Commit, Manifest)>,
    {
        let slot = self.slot(version);
        let mut entry = lock(&slot);
        if let Some(entry) = entry.as_ref() {
            return Ok(entry.clone());
        }
        let (commit, manifest) = load()?;
        let loaded = CacheEntry {
            commit,
            manifest,
            packages: None,
        };
        *entry = Some(loaded.clone());
        Ok(loaded)
    }

    /// Tag listing for `repository`, loading it with `load` on first access.
    pub fn tags<F>(&self, repository: &Repository, load: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Result<Vec<String>>,
    {
        let slot = lock(&self.tags)
            .entry(repository.identity())
            .or_default()
            .clone();
        let mut tags = lock(&slot);
        if let Some(tags) = tags.as_ref() {
            return Ok(tags.clone());
        }
        let loaded = load()?;
        *tags = Some(loaded.clone());
        Ok(loaded)
    }
}
