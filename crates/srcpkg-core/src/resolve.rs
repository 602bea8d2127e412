//! Dependency resolution.
//!
//! Resolution walks the dependency tree depth first, consolidating every
//! requested version into a [`DependencyGraph`]. Before descending into a
//! package, the metadata of all its direct sub-dependencies is fetched in
//! parallel on the rayon pool; the per-run [`MetadataCache`] makes sure each
//! `(repository, tag)` is fetched once.
//!
//! A superseded version loses its subtree, so walking repeats until every
//! held version has been expanded. The result does not depend on root order.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::instrument;

use crate::cache::{CacheEntry, MetadataCache};
use crate::config::{MANIFEST_FILE, Manifest};
use crate::gateway::Hosts;
use crate::graph::{DependencyGraph, Resolution};
use crate::model::{Commit, Dependency, Repository, Version};
use crate::version::{self, DEVELOPMENT, Tag};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Allow sub-dependencies to cross major versions; the higher version wins.
    pub force: bool,
    /// Token attached to every repository resolved in this run.
    pub token: Option<String>,
}

pub struct Resolver<'a> {
    hosts: &'a Hosts,
    cache: MetadataCache,
    packages_root: PathBuf,
    options: ResolveOptions,
}

/// Install directory of a repository: `<packages root>/<owner>/<repo>`.
pub fn install_root(packages_root: &Path, repository: &Repository) -> PathBuf {
    packages_root.join(&repository.owner).join(&repository.repo)
}

impl<'a> Resolver<'a> {
    pub fn new(
        hosts: &'a Hosts,
        packages_root: impl Into<PathBuf>,
        options: ResolveOptions,
    ) -> Self {
        Resolver {
            hosts,
            cache: MetadataCache::new(),
            packages_root: packages_root.into(),
            options,
        }
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    pub fn hosts(&self) -> &Hosts {
        self.hosts
    }

    fn authenticated(&self, repository: Repository) -> Repository {
        match repository.token {
            Some(_) => repository,
            None => repository.with_token(self.options.token.clone()),
        }
    }

    /// Tags of `repository`, listed once per run.
    pub fn tags(&self, repository: &Repository) -> Result<Vec<String>> {
        self.cache
            .tags(repository, || self.hosts.list_tags(repository))
    }

    /// Pick the version of `repository` that `constraint` selects.
    pub fn select(&self, repository: &Repository, constraint: &str) -> Result<Version> {
        let repository = self.authenticated(repository.clone());
        if constraint.trim() == DEVELOPMENT {
            return Ok(Version::new(repository, Tag::Development));
        }
        let tags = self.tags(&repository)?;
        let tag = version::match_highest_version(&tags, constraint).ok_or_else(|| {
            Error::UnmatchedConstraint {
                package: repository.to_string(),
                constraint: constraint.to_string(),
            }
        })?;
        Ok(Version::new(repository, Tag::parse(&tag)?))
    }

    /// Pin a version to its commit.
    pub fn commit(&self, version: &Version) -> Result<Commit> {
        let repository = &version.repository;
        let hash = match &version.tag {
            Tag::Development => self.hosts.resolve_latest_commit(repository)?,
            Tag::Release(tag) => self.hosts.resolve_tag_to_commit(repository, tag)?,
        };
        Ok(Commit::new(version.clone(), hash))
    }

    /// Commit and manifest of a version. Packages without a manifest get the default one.
    pub fn metadata(&self, version: &Version) -> Result<CacheEntry> {
        self.cache.get_or_load(version, || {
            let commit = self.commit(version)?;
            let repository = commit.repository();
            let manifest = if self.hosts.file_exists(repository, &commit.hash, MANIFEST_FILE)? {
                let content = self
                    .hosts
                    .file_content(repository, &commit.hash, MANIFEST_FILE)?;
                Manifest::parse(&content).map_err(|source| Error::Parse {
                    path: PathBuf::from(format!("{}/{}", version, MANIFEST_FILE)),
                    source,
                })?
            } else {
                Manifest::default()
            };
            log::debug!("Loaded {} ({})", version, commit.hash);
            Ok((commit, manifest))
        })
    }

    fn dependency(&self, entry: CacheEntry) -> Dependency {
        let root = install_root(&self.packages_root, entry.commit.repository());
        Dependency {
            commit: entry.commit,
            manifest: entry.manifest,
            root,
            checksum: None,
        }
    }

    /// Resolve a version to a dependency.
    pub fn load(&self, version: &Version) -> Result<Dependency> {
        Ok(self.dependency(self.metadata(version)?))
    }

    /// Direct sub-dependencies of `version`, with their metadata loaded.
    fn children(&self, version: &Version) -> Result<Vec<Dependency>> {
        let entry = self.metadata(version)?;
        if let Some(packages) = entry.packages {
            return packages
                .iter()
                .map(|commit| self.load(&commit.version))
                .collect();
        }

        let selected: Vec<Version> = entry
            .manifest
            .dependencies()?
            .into_iter()
            .map(|(repository, constraint)| self.select(&repository, &constraint))
            .collect::<Result<_>>()?;

        let children: Vec<Dependency> = selected
            .par_iter()
            .map(|child| self.load(child))
            .collect::<Result<_>>()?;

        self.cache.update(
            version,
            children.iter().map(|child| child.commit.clone()).collect(),
        )?;
        Ok(children)
    }

    fn walk(&self, mut graph: DependencyGraph, version: &Version) -> Result<DependencyGraph> {
        let identity = version.repository.identity();
        if !graph.holds(version) || graph.is_expanded(&identity) {
            return Ok(graph);
        }
        graph = graph.expand(identity);

        let parent = self.load(version)?;
        let children = self.children(version)?;
        for child in &children {
            if !graph.holds(version) {
                return Ok(graph);
            }
            graph = graph.add_sub_dependency(parent.clone(), child.clone())?;
        }

        for child in &children {
            graph = self.walk(graph, &child.commit.version)?;
        }
        Ok(graph)
    }

    /// Resolve the declared root packages and everything they depend on.
    #[instrument(name = "resolve", skip_all)]
    pub fn resolve(&self, roots: &[(Repository, String)]) -> Result<Resolution> {
        log::debug!("Resolving {} root package(s)", roots.len());

        let versions: Vec<Version> = roots
            .par_iter()
            .map(|(repository, constraint)| self.select(repository, constraint))
            .collect::<Result<_>>()?;
        let dependencies: Vec<Dependency> = versions
            .par_iter()
            .map(|version| self.load(version))
            .collect::<Result<_>>()?;

        let mut graph = DependencyGraph::new(self.options.force);
        for dependency in dependencies {
            graph = graph.add(dependency);
        }

        loop {
            let pending = graph.pending();
            if pending.is_empty() {
                break;
            }
            for version in &pending {
                graph = self.walk(graph, version)?;
            }
        }

        let resolution = graph.resolve();
        log::debug!(
            "Resolved {} package(s), {} edge(s)",
            resolution.vertices.len(),
            resolution.edges.len()
        );
        Ok(resolution)
    }
}
