//! Value types describing packages during resolution.
//!
//! A [`Repository`] names a package independent of version. Its [`Identity`]
//! is the lowercase `(domain, owner, repo)` triple: the supported host treats
//! names case-insensitively, so `github.com/Acme/Util` and
//! `github.com/acme/util` are the same package.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use url::Url;

use crate::config::Manifest;
use crate::version::Tag;
use crate::{Error, Result};

/// Case-folded repository identity. Used as the key for graph vertices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity {
    pub domain: String,
    pub owner: String,
    pub repo: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.owner, self.repo)
    }
}

#[derive(Debug, Clone)]
pub struct Repository {
    pub domain: String,
    pub owner: String,
    pub repo: String,
    /// Access token for private repositories. Not part of the identity.
    pub token: Option<String>,
}

fn valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl Repository {
    pub fn new(domain: &str, owner: &str, repo: &str) -> Self {
        Repository {
            domain: domain.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    /// Parse a repository reference.
    ///
    /// Accepts `https://host/owner/repo(.git)`, `http://...`,
    /// `git@host:owner/repo(.git)` and bare `host/owner/repo`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || Error::InvalidUrl(input.to_string());
        let trimmed = input.trim();

        let (domain, path) = if let Some(scp) = trimmed.strip_prefix("git@") {
            let (host, path) = scp.split_once(':').ok_or_else(invalid)?;
            (host.to_string(), path.to_string())
        } else {
            let with_scheme = if trimmed.contains("://") {
                trimmed.to_string()
            } else {
                format!("https://{trimmed}")
            };
            let url = Url::parse(&with_scheme).map_err(|_| invalid())?;
            if !matches!(url.scheme(), "https" | "http") {
                return Err(invalid());
            }
            let host = url.host_str().ok_or_else(invalid)?.to_string();
            (host, url.path().to_string())
        };

        let path = path.trim_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let segments: Vec<&str> = path.split('/').collect();
        let [owner, repo] = segments.as_slice() else {
            return Err(invalid());
        };
        if domain.is_empty() || !valid_segment(owner) || !valid_segment(repo) {
            return Err(invalid());
        }

        Ok(Repository::new(&domain, owner, repo))
    }

    pub fn identity(&self) -> Identity {
        Identity {
            domain: self.domain.to_lowercase(),
            owner: self.owner.to_lowercase(),
            repo: self.repo.to_lowercase(),
        }
    }

    /// Canonical clone URL, `https://<domain>/<owner>/<repo>.git`. Keys the lock file.
    pub fn url(&self) -> String {
        format!("https://{}/{}/{}.git", self.domain, self.owner, self.repo)
    }
}

impl PartialEq for Repository {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Repository {}

impl Hash for Repository {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Display for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.domain, self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub repository: Repository,
    pub tag: Tag,
}

impl Version {
    pub fn new(repository: Repository, tag: Tag) -> Self {
        Version { repository, tag }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository, self.tag)
    }
}

/// A version pinned to a commit. Equal only when the hashes match too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Commit {
    pub version: Version,
    pub hash: String,
}

impl Commit {
    pub fn new(version: Version, hash: impl Into<String>) -> Self {
        Commit {
            version,
            hash: hash.into(),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.version.repository
    }

    pub fn tag(&self) -> &Tag {
        &self.version.tag
    }
}

/// A resolved package: where it comes from, what it declares and where it installs.
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub commit: Commit,
    pub manifest: Manifest,
    pub root: PathBuf,
    /// Content checksum, known from the lock file or after a successful sync.
    pub checksum: Option<String>,
}

impl Dependency {
    pub fn identity(&self) -> Identity {
        self.commit.repository().identity()
    }

    pub fn repository(&self) -> &Repository {
        self.commit.repository()
    }

    pub fn tag(&self) -> &Tag {
        self.commit.tag()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_repository_forms() {
        let forms = [
            "https://github.com/acme/util",
            "https://github.com/acme/util.git",
            "http://github.com/acme/util/",
            "git@github.com:acme/util.git",
            "github.com/acme/util",
        ];
        for form in forms {
            let repo = Repository::parse(form).unwrap();
            assert_eq!(repo.domain, "github.com", "{form}");
            assert_eq!(repo.owner, "acme", "{form}");
            assert_eq!(repo.repo, "util", "{form}");
            assert_eq!(repo.url(), "https://github.com/acme/util.git");
        }
    }

    #[test]
    fn test_parse_repository_rejects() {
        for bad in [
            "",
            "github.com/acme",
            "github.com/acme/util/extra",
            "ftp://github.com/acme/util",
            "git@github.com",
            "github.com/../util",
        ] {
            assert!(
                matches!(Repository::parse(bad), Err(Error::InvalidUrl(_))),
                "{bad}"
            );
        }
    }

    #[test]
    fn test_identity_is_case_insensitive() {
        let a = Repository::parse("https://github.com/Acme/Util").unwrap();
        let b = Repository::parse("github.com/acme/util").unwrap().with_token(Some("t".into()));
        assert_eq!(a, b);
        assert_eq!(a.identity(), b.identity());
        assert_eq!(a.identity().to_string(), "github.com/acme/util");
    }
}
