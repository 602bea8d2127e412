//! Version consolidation.
//!
//! Every package identity gets exactly one vertex, holding the highest version
//! requested so far. Operations take the graph by value and return the new one.
//!
//! When a vertex is superseded, the edges of its previous version are dropped
//! together with every vertex that was only reachable through them, so stale
//! requirements never take part in later conflict checks.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::model::{Dependency, Identity, Version};
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    order: Vec<Identity>,
    vertices: HashMap<Identity, Dependency>,
    edges: Vec<(Identity, Identity)>,
    /// Vertices whose current version has had its sub-dependencies recorded.
    expanded: HashSet<Identity>,
    force: bool,
}

/// Final package set: vertices in first-seen order, edges parent to child.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub vertices: Vec<Dependency>,
    pub edges: Vec<(Identity, Identity)>,
}

impl Resolution {
    pub fn get(&self, identity: &Identity) -> Option<&Dependency> {
        self.vertices.iter().find(|d| &d.identity() == identity)
    }

    /// Direct children of `identity`.
    pub fn children<'a>(&'a self, identity: &'a Identity) -> impl Iterator<Item = &'a Identity> {
        self.edges
            .iter()
            .filter(move |(from, _)| from == identity)
            .map(|(_, to)| to)
    }
}

impl DependencyGraph {
    /// With `force`, a sub-dependency may cross a major version boundary; the higher version wins.
    pub fn new(force: bool) -> Self {
        DependencyGraph {
            force,
            ..Default::default()
        }
    }

    fn merge(mut self, dependency: Dependency) -> Self {
        let identity = dependency.identity();
        match self.vertices.get(&identity) {
            None => {
                self.order.push(identity.clone());
                self.vertices.insert(identity, dependency);
            }
            Some(existing) if dependency.tag().compare(existing.tag()) == Ordering::Greater => {
                log::debug!(
                    "{}: {} supersedes {}",
                    identity,
                    dependency.tag(),
                    existing.tag()
                );
                self.vertices.insert(identity.clone(), dependency);
                self.detach(&identity, true);
            }
            Some(_) => {}
        }
        self
    }

    /// Drop the outgoing edges of `identity`. With `prune`, also drop the
    /// vertices nothing else reaches any more.
    fn detach(&mut self, identity: &Identity, prune: bool) {
        let dropped: Vec<Identity> = self
            .edges
            .iter()
            .filter(|(from, _)| from == identity)
            .map(|(_, to)| to.clone())
            .collect();
        self.edges.retain(|(from, _)| from != identity);
        self.expanded.remove(identity);
        if !prune || dropped.is_empty() {
            return;
        }

        let mut candidates = self.reachable(dropped);
        candidates.remove(identity);
        let others: Vec<Identity> = self
            .order
            .iter()
            .filter(|i| !candidates.contains(*i))
            .cloned()
            .collect();
        let kept = self.reachable(others);
        let orphaned: HashSet<Identity> = candidates
            .into_iter()
            .filter(|i| !kept.contains(i))
            .collect();
        if orphaned.is_empty() {
            return;
        }

        log::debug!(
            "{}: dropping {} package(s) only its previous version required",
            identity,
            orphaned.len()
        );
        self.order.retain(|i| !orphaned.contains(i));
        self.vertices.retain(|i, _| !orphaned.contains(i));
        self.expanded.retain(|i| !orphaned.contains(i));
        self.edges
            .retain(|(from, to)| !orphaned.contains(from) && !orphaned.contains(to));
    }

    /// `start` and everything reachable from it.
    fn reachable(&self, start: Vec<Identity>) -> HashSet<Identity> {
        let mut seen = HashSet::new();
        let mut stack = start;
        while let Some(identity) = stack.pop() {
            if seen.contains(&identity) {
                continue;
            }
            stack.extend(
                self.edges
                    .iter()
                    .filter(|(from, _)| from == &identity)
                    .map(|(_, to)| to.clone()),
            );
            seen.insert(identity);
        }
        seen
    }

    /// Add a root declaration.
    ///
    /// Outgoing edges of the identity are dropped; the caller re-asserts the
    /// edges of whichever version survives.
    pub fn add(self, dependency: Dependency) -> Self {
        let identity = dependency.identity();
        let mut graph = self.merge(dependency);
        graph.detach(&identity, false);
        graph
    }

    /// Record that `parent` depends on `child`.
    pub fn add_sub_dependency(self, parent: Dependency, child: Dependency) -> Result<Self> {
        let parent_id = parent.identity();
        let child_id = child.identity();

        let mut graph = self.merge(parent);
        if let Some(existing) = graph.vertices.get(&child_id)
            && !graph.force
            && existing.tag().has_major_change(child.tag())
        {
            return Err(Error::VersionIncompatible {
                package: child_id.to_string(),
                current: existing.tag().to_string(),
                requested: child.tag().to_string(),
            });
        }
        graph = graph.merge(child);

        let edge = (parent_id, child_id);
        if edge.0 != edge.1 && !graph.edges.contains(&edge) {
            graph.edges.push(edge);
        }
        Ok(graph)
    }

    /// Whether `version` is the version currently held for its identity.
    pub fn holds(&self, version: &Version) -> bool {
        self.vertices
            .get(&version.repository.identity())
            .is_some_and(|d| d.tag() == &version.tag)
    }

    pub fn is_expanded(&self, identity: &Identity) -> bool {
        self.expanded.contains(identity)
    }

    /// Mark the current version of `identity` as having its sub-dependencies recorded.
    pub fn expand(mut self, identity: Identity) -> Self {
        self.expanded.insert(identity);
        self
    }

    /// Versions whose sub-dependencies still have to be recorded, in first-seen order.
    pub fn pending(&self) -> Vec<Version> {
        self.order
            .iter()
            .filter(|identity| !self.expanded.contains(*identity))
            .filter_map(|identity| self.vertices.get(identity))
            .map(|d| d.commit.version.clone())
            .collect()
    }

    pub fn get(&self, identity: &Identity) -> Option<&Dependency> {
        self.vertices.get(identity)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn edges(&self) -> &[(Identity, Identity)] {
        &self.edges
    }

    pub fn resolve(mut self) -> Resolution {
        let vertices = self
            .order
            .iter()
            .filter_map(|identity| self.vertices.remove(identity))
            .collect();
        Resolution {
            vertices,
            edges: self.edges,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Manifest;
    use crate::model::{Commit, Repository, Version};
    use crate::version::Tag;
    use std::path::PathBuf;

    fn dep(owner_repo: &str, tag: &str) -> Dependency {
        let (owner, repo) = owner_repo.split_once('/').unwrap();
        let version = Version::new(
            Repository::new("github.com", owner, repo),
            Tag::parse(tag).unwrap(),
        );
        Dependency {
            commit: Commit::new(version, format!("{owner_repo}@{tag}")),
            manifest: Manifest::default(),
            root: PathBuf::from("Packages").join(owner).join(repo),
            checksum: None,
        }
    }

    fn tags(resolution: &Resolution) -> Vec<String> {
        resolution
            .vertices
            .iter()
            .map(|d| format!("{}@{}", d.repository().repo, d.tag()))
            .collect()
    }

    #[test]
    fn test_single_vertex_regardless_of_order() {
        let forward = DependencyGraph::new(false)
            .add(dep("acme/util", "1.0.0"))
            .add(dep("acme/util", "1.2.0"))
            .resolve();
        let backward = DependencyGraph::new(false)
            .add(dep("acme/util", "1.2.0"))
            .add(dep("acme/util", "1.0.0"))
            .resolve();
        assert_eq!(tags(&forward), vec!["util@1.2.0"]);
        assert_eq!(tags(&backward), vec!["util@1.2.0"]);
    }

    #[test]
    fn test_add_sub_dependency() {
        let resolution = DependencyGraph::new(false)
            .add(dep("acme/app", "1.0.0"))
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "2.0.0"))
            .unwrap()
            .resolve();
        assert_eq!(resolution.vertices.len(), 2);
        assert_eq!(resolution.edges.len(), 1);
        let app = resolution.vertices[0].identity();
        let children: Vec<_> = resolution.children(&app).collect();
        assert_eq!(children, vec![&resolution.vertices[1].identity()]);
    }

    #[test]
    fn test_higher_sub_dependency_wins_and_keeps_position() {
        let resolution = DependencyGraph::new(false)
            .add(dep("acme/util", "1.0.0"))
            .add(dep("acme/app", "1.0.0"))
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "1.3.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "1.1.0"))
            .unwrap()
            .resolve();
        assert_eq!(tags(&resolution), vec!["util@1.3.0", "app@1.0.0"]);
        assert_eq!(resolution.edges.len(), 1);
    }

    #[test]
    fn test_major_conflict_requires_force() {
        let graph = DependencyGraph::new(false).add(dep("acme/util", "2.0.0"));
        let err = graph
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "1.5.0"))
            .unwrap_err();
        assert!(matches!(err, Error::VersionIncompatible { .. }));

        let forced = DependencyGraph::new(true)
            .add(dep("acme/util", "1.0.0"))
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "2.0.0"))
            .unwrap()
            .resolve();
        assert_eq!(tags(&forced), vec!["util@2.0.0", "app@1.0.0"]);
    }

    #[test]
    fn test_development_outranks_releases() {
        let development = Dependency {
            commit: Commit::new(
                Version::new(
                    Repository::new("github.com", "acme", "util"),
                    Tag::Development,
                ),
                "head",
            ),
            ..dep("acme/util", "1.0.0")
        };
        let resolution = DependencyGraph::new(false)
            .add(development)
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "3.0.0"))
            .unwrap()
            .resolve();
        assert_eq!(tags(&resolution), vec!["util@development", "app@1.0.0"]);
    }

    #[test]
    fn test_add_drops_outgoing_edges() {
        let graph = DependencyGraph::new(false)
            .add(dep("acme/app", "1.0.0"))
            .add(dep("acme/util", "1.0.0"))
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "1.0.0"))
            .unwrap()
            .expand(dep("acme/app", "1.0.0").identity())
            .add(dep("acme/app", "1.0.0"));
        assert_eq!(graph.len(), 2);
        assert!(graph.edges().is_empty());
        assert_eq!(graph.pending().len(), 2);
    }

    #[test]
    fn test_superseded_version_loses_its_subtree() {
        let graph = DependencyGraph::new(false)
            .add(dep("acme/app", "1.0.0"))
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/util", "1.0.0"), dep("acme/log", "1.0.0"))
            .unwrap()
            .add(dep("acme/app", "1.1.0"));
        assert_eq!(graph.len(), 1);
        assert!(graph.edges().is_empty());

        // The stale requirement on log 1.x no longer blocks log 2.x.
        let resolution = DependencyGraph::new(false)
            .add(dep("acme/aaa", "1.0.0"))
            .add(dep("acme/zzz", "1.0.0"))
            .add_sub_dependency(dep("acme/aaa", "1.0.0"), dep("acme/util", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/util", "1.0.0"), dep("acme/log", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/zzz", "1.0.0"), dep("acme/util", "1.5.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/util", "1.5.0"), dep("acme/log", "2.0.0"))
            .unwrap()
            .resolve();
        assert_eq!(
            tags(&resolution),
            vec!["aaa@1.0.0", "zzz@1.0.0", "util@1.5.0", "log@2.0.0"]
        );
    }

    #[test]
    fn test_shared_package_survives_supersede() {
        let graph = DependencyGraph::new(false)
            .add(dep("acme/app", "1.0.0"))
            .add(dep("acme/cli", "1.0.0"))
            .add_sub_dependency(dep("acme/app", "1.0.0"), dep("acme/util", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/util", "1.0.0"), dep("acme/log", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/cli", "1.0.0"), dep("acme/log", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/cli", "1.0.0"), dep("acme/util", "1.2.0"))
            .unwrap();
        assert!(graph.get(&dep("acme/log", "1.0.0").identity()).is_some());
        assert_eq!(graph.len(), 4);
        assert!(
            graph
                .pending()
                .iter()
                .any(|v| v.repository.repo == "util" && v.tag == Tag::parse("1.2.0").unwrap())
        );
    }

    #[test]
    fn test_cycles_and_self_edges() {
        let graph = DependencyGraph::new(false)
            .add(dep("acme/a", "1.0.0"))
            .add_sub_dependency(dep("acme/a", "1.0.0"), dep("acme/b", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/b", "1.0.0"), dep("acme/a", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/b", "1.0.0"), dep("acme/a", "1.0.0"))
            .unwrap()
            .add_sub_dependency(dep("acme/a", "1.0.0"), dep("acme/a", "1.0.0"))
            .unwrap();
        assert_eq!(graph.len(), 2);
        assert_eq!(graph.edges().len(), 2);
    }
}
