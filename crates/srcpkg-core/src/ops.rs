//! Project-level commands: install, add, update and remove.
//!
//! Each operation holds the project's advisory lock for its whole duration
//! and writes the manifest only after sync succeeded.

use std::collections::HashSet;
use std::path::Path;

use tracing::instrument;

use crate::gateway::Hosts;
use crate::lock::LockSet;
use crate::model::{Dependency, Identity, Repository};
use crate::project::{self, Project};
use crate::resolve::{ResolveOptions, Resolver};
use crate::sync::{SyncEngine, SyncReport};
use crate::version::{self, DEVELOPMENT, Tag};
use crate::{Error, Result};

/// Carry locked checksums over to resolved packages pinned to the same commit.
fn with_locked_checksums(
    dependencies: Vec<Dependency>,
    lock: Option<&LockSet>,
) -> Vec<Dependency> {
    dependencies
        .into_iter()
        .map(|mut dependency| {
            if let Some(locked) = lock.and_then(|l| l.get(dependency.repository()))
                && locked.hash == dependency.commit.hash
            {
                dependency.checksum = locked.checksum.clone();
            }
            dependency
        })
        .collect()
}

fn resolve_and_sync(
    resolver: &Resolver,
    project: &Project,
    roots: &[(Repository, String)],
    lock: Option<&LockSet>,
) -> Result<SyncReport> {
    let resolution = resolver.resolve(roots)?;
    let resolved = with_locked_checksums(resolution.vertices, lock);
    let (_, report) = SyncEngine::new(resolver.hosts(), project).run(resolved, lock)?;
    Ok(report)
}

/// Whether `locked` still satisfies `constraint`.
fn satisfies(locked: &str, constraint: &str) -> bool {
    if constraint.trim() == DEVELOPMENT || locked == DEVELOPMENT {
        return constraint.trim() == locked;
    }
    version::match_highest_version(&[locked.to_string()], constraint).is_some()
}

/// Whether the lock was written for exactly the declared packages and pins a
/// satisfying version of each.
fn lock_covers(lock: &LockSet, roots: &[(Repository, String)]) -> bool {
    let declared: HashSet<Identity> = roots.iter().map(|(r, _)| r.identity()).collect();
    if lock.root_identities() != declared {
        return false;
    }
    if roots.is_empty() {
        return lock.packages.is_empty();
    }
    roots.iter().all(|(repository, constraint)| {
        lock.get(repository)
            .is_some_and(|locked| satisfies(&locked.version, constraint))
    })
}

/// The manifest key `package` is declared under.
fn declared(project: &Project, package: &str) -> Result<(String, Repository)> {
    let repository = Repository::parse(project.manifest.resolve_alias(package))?;
    let key = project
        .manifest
        .declared_key(&repository)
        .ok_or_else(|| Error::NotDeclared(repository.to_string()))?;
    Ok((key, repository))
}

/// Constraint recorded for a selected tag.
fn caret(tag: &Tag) -> String {
    match tag {
        Tag::Release(tag) => format!("^{}", tag.trim_start_matches(['v', 'V'])),
        Tag::Development => DEVELOPMENT.to_string(),
    }
}

/// Install what the project declares.
///
/// When the lock file was written for the declared packages and pins a
/// satisfying version of each, the pinned set is installed as is; otherwise
/// the manifest is resolved again.
#[instrument(name = "install", skip_all)]
pub fn install(hosts: &Hosts, root: &Path, options: &ResolveOptions) -> Result<SyncReport> {
    let _guard = project::lock(root)?;
    let project = Project::open(root)?;
    let lock = project.load_lock()?;
    let roots = project.manifest.dependencies()?;

    if let Some(lock) = &lock
        && lock_covers(lock, &roots)
    {
        log::debug!("Installing {} locked package(s)", lock.packages.len());
        let pinned = lock
            .dependencies(&project.packages_root())?
            .into_iter()
            .map(|mut dependency| {
                let repository = &mut dependency.commit.version.repository;
                repository.token = options.token.clone();
                dependency
            })
            .collect();
        let (_, report) = SyncEngine::new(hosts, &project).run(pinned, Some(lock))?;
        return Ok(report);
    }

    let resolver = Resolver::new(hosts, project.packages_root(), options.clone());
    resolve_and_sync(&resolver, &project, &roots, lock.as_ref())
}

/// Declare and install a new package.
///
/// Without a constraint the highest stable tag is used and recorded as
/// `^<tag>`; repositories without stable tags track `development`.
#[instrument(name = "add", skip_all)]
pub fn add(
    hosts: &Hosts,
    root: &Path,
    package: &str,
    constraint: Option<&str>,
    options: &ResolveOptions,
) -> Result<SyncReport> {
    let _guard = project::lock(root)?;
    let mut project = Project::open(root)?;
    let lock = project.load_lock()?;

    let url = project.manifest.resolve_alias(package).to_string();
    let repository = Repository::parse(&url)?;
    if project.manifest.declared_key(&repository).is_some() {
        return Err(Error::AlreadyDeclared(repository.to_string()));
    }

    let resolver = Resolver::new(hosts, project.packages_root(), options.clone());
    let constraint = match constraint {
        Some(constraint) => constraint.to_string(),
        None => {
            let tags = resolver.tags(&repository)?;
            match version::match_highest_version(&tags, "@stable") {
                Some(tag) => caret(&Tag::parse(&tag)?),
                None => DEVELOPMENT.to_string(),
            }
        }
    };
    let selected = resolver.select(&repository, &constraint)?;
    log::debug!("Adding {} as {}", selected, constraint);

    let key = if project.manifest.aliases.contains_key(package) {
        package.to_string()
    } else {
        repository.url()
    };
    project.manifest.packages.insert(key, constraint);
    let roots = project.manifest.dependencies()?;

    let report = resolve_and_sync(&resolver, &project, &roots, lock.as_ref())?;
    project.save_manifest()?;
    Ok(report)
}

/// Move a declared package to a newer version.
///
/// Without a constraint the package moves to the newest release within its
/// current major version, or to the newest stable release with `force`. An
/// explicit constraint that crosses a major version requires `force`.
#[instrument(name = "update", skip_all)]
pub fn update(
    hosts: &Hosts,
    root: &Path,
    package: &str,
    constraint: Option<&str>,
    options: &ResolveOptions,
) -> Result<SyncReport> {
    let _guard = project::lock(root)?;
    let mut project = Project::open(root)?;
    let lock = project.load_lock()?;
    let (key, repository) = declared(&project, package)?;
    let declared_constraint = project.manifest.packages[&key].clone();

    let current = lock
        .as_ref()
        .and_then(|l| l.get(&repository))
        .map(|locked| Tag::parse(&locked.version))
        .transpose()?;

    let requested = match (constraint, &current) {
        (Some(constraint), _) => constraint.to_string(),
        (None, _) if options.force => "@stable".to_string(),
        (None, Some(current @ Tag::Release(_))) => caret(current),
        (None, _) => declared_constraint,
    };

    let resolver = Resolver::new(hosts, project.packages_root(), options.clone());
    let selected = resolver.select(&repository, &requested)?;
    if let Some(current) = &current
        && !options.force
        && current.has_major_change(&selected.tag)
    {
        return Err(Error::VersionIncompatible {
            package: repository.to_string(),
            current: current.to_string(),
            requested: selected.tag.to_string(),
        });
    }
    log::debug!(
        "Updating {} from {} to {}",
        repository,
        current.as_ref().map(Tag::as_str).unwrap_or("nothing"),
        selected.tag
    );

    let recorded = match constraint {
        Some(constraint) => constraint.to_string(),
        None => caret(&selected.tag),
    };
    project.manifest.packages.insert(key, recorded);
    let roots = project.manifest.dependencies()?;

    let report = resolve_and_sync(&resolver, &project, &roots, lock.as_ref())?;
    project.save_manifest()?;
    Ok(report)
}

/// Undeclare a package and uninstall whatever is no longer needed.
#[instrument(name = "remove", skip_all)]
pub fn remove(
    hosts: &Hosts,
    root: &Path,
    package: &str,
    options: &ResolveOptions,
) -> Result<SyncReport> {
    let _guard = project::lock(root)?;
    let mut project = Project::open(root)?;
    let lock = project.load_lock()?;
    let (key, repository) = declared(&project, package)?;
    log::debug!("Removing {}", repository);

    project.manifest.packages.remove(&key);
    let roots = project.manifest.dependencies()?;

    let resolver = Resolver::new(hosts, project.packages_root(), options.clone());
    let report = resolve_and_sync(&resolver, &project, &roots, lock.as_ref())?;
    project.save_manifest()?;
    Ok(report)
}
