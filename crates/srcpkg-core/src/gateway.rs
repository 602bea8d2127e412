//! Access to git hosting providers.
//!
//! [`GitHost`] is the seam between resolution and the network. [`Hosts`]
//! picks an implementation by repository domain and attaches the repository
//! and operation to every failure. Only `github.com` ships with an
//! implementation ([`GitHubHost`]); other domains fail with
//! [`HostError::UnsupportedHost`].

use std::collections::HashMap;
use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, HeaderMap, LINK, RETRY_AFTER};
use serde::Deserialize;
use url::Url;

use crate::model::Repository;
use crate::{Error, HostError, Result};

pub const GITHUB_DOMAIN: &str = "github.com";
const GITHUB_API: &str = "https://api.github.com";
const TAGS_PER_PAGE: &str = "100";
/// Annotated tags may point at other tags; give up after this many hops.
const MAX_TAG_DEPTH: usize = 8;

pub trait GitHost: Send + Sync {
    /// All tag names, across every page.
    fn list_tags(&self, repository: &Repository) -> Result<Vec<String>, HostError>;

    fn resolve_tag_to_commit(&self, repository: &Repository, tag: &str)
    -> Result<String, HostError>;

    /// Head commit of the default branch.
    fn resolve_latest_commit(&self, repository: &Repository) -> Result<String, HostError>;

    fn file_exists(
        &self,
        repository: &Repository,
        hash: &str,
        path: &str,
    ) -> Result<bool, HostError>;

    fn file_content(
        &self,
        repository: &Repository,
        hash: &str,
        path: &str,
    ) -> Result<String, HostError>;

    /// Gzip-compressed tarball of the tree at `hash`.
    fn download_archive(
        &self,
        repository: &Repository,
        hash: &str,
    ) -> Result<Box<dyn Read + Send>, HostError>;
}

/// Git hosts keyed by domain.
#[derive(Clone, Default)]
pub struct Hosts {
    hosts: HashMap<String, Arc<dyn GitHost>>,
}

impl fmt::Debug for Hosts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hosts")
            .field("domains", &self.hosts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Hosts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hosts with the GitHub REST client registered for `github.com`.
    pub fn github() -> Result<Self> {
        let host = GitHubHost::new().map_err(|source| Error::Host {
            repository: GITHUB_DOMAIN.to_string(),
            operation: "create client",
            source,
        })?;
        Ok(Self::new().register(GITHUB_DOMAIN, Arc::new(host)))
    }

    pub fn register(mut self, domain: &str, host: Arc<dyn GitHost>) -> Self {
        self.hosts.insert(domain.to_lowercase(), host);
        self
    }

    fn call<T>(
        &self,
        repository: &Repository,
        operation: &'static str,
        f: impl FnOnce(&dyn GitHost) -> Result<T, HostError>,
    ) -> Result<T> {
        let result = match self.hosts.get(&repository.domain.to_lowercase()) {
            Some(host) => f(host.as_ref()),
            None => Err(HostError::UnsupportedHost {
                domain: repository.domain.clone(),
            }),
        };
        result.map_err(|source| Error::Host {
            repository: repository.to_string(),
            operation,
            source,
        })
    }

    pub fn list_tags(&self, repository: &Repository) -> Result<Vec<String>> {
        self.call(repository, "list tags", |h| h.list_tags(repository))
    }

    pub fn resolve_tag_to_commit(&self, repository: &Repository, tag: &str) -> Result<String> {
        self.call(repository, "resolve tag", |h| {
            h.resolve_tag_to_commit(repository, tag)
        })
    }

    pub fn resolve_latest_commit(&self, repository: &Repository) -> Result<String> {
        self.call(repository, "resolve latest commit", |h| {
            h.resolve_latest_commit(repository)
        })
    }

    pub fn file_exists(&self, repository: &Repository, hash: &str, path: &str) -> Result<bool> {
        self.call(repository, "check file", |h| {
            h.file_exists(repository, hash, path)
        })
    }

    pub fn file_content(&self, repository: &Repository, hash: &str, path: &str) -> Result<String> {
        self.call(repository, "fetch file", |h| {
            h.file_content(repository, hash, path)
        })
    }

    pub fn download_archive(
        &self,
        repository: &Repository,
        hash: &str,
    ) -> Result<Box<dyn Read + Send>> {
        self.call(repository, "download archive", |h| {
            h.download_archive(repository, hash)
        })
    }
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

#[derive(Deserialize)]
struct GitObject {
    sha: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct RefEntry {
    object: GitObject,
}

#[derive(Deserialize)]
struct CommitEntry {
    sha: String,
}

/// GitHub REST API client.
pub struct GitHubHost {
    client: Client,
    api_base: String,
}

impl GitHubHost {
    pub fn new() -> Result<Self, HostError> {
        Self::with_api_base(GITHUB_API)
    }

    pub fn with_api_base(api_base: &str) -> Result<Self, HostError> {
        let client = Client::builder()
            .user_agent(format!("srcpkg/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(transport)?;
        Ok(GitHubHost {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, repository: &Repository, segments: &[&str]) -> Result<Url, HostError> {
        let mut url = Url::parse(&self.api_base).map_err(transport)?;
        url.path_segments_mut()
            .map_err(|_| HostError::Transport(format!("invalid API base {}", self.api_base)))?
            .pop_if_empty()
            .extend(["repos", repository.owner.as_str(), repository.repo.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn request(&self, repository: &Repository, url: Url) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &repository.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    fn send(request: RequestBuilder) -> Result<Response, HostError> {
        let response = request.send().map_err(transport)?;
        match classify(response.status(), response.headers(), SystemTime::now()) {
            Some(err) => Err(err),
            None => Ok(response),
        }
    }

    fn contents(
        &self,
        repository: &Repository,
        hash: &str,
        path: &str,
    ) -> Result<Response, HostError> {
        let mut segments = vec!["contents"];
        segments.extend(path.split('/').filter(|s| !s.is_empty()));
        let mut url = self.endpoint(repository, &segments)?;
        url.query_pairs_mut().append_pair("ref", hash);
        Self::send(
            self.request(repository, url)
                .header(ACCEPT, "application/vnd.github.raw"),
        )
    }
}

impl GitHost for GitHubHost {
    fn list_tags(&self, repository: &Repository) -> Result<Vec<String>, HostError> {
        let mut url = self.endpoint(repository, &["tags"])?;
        url.query_pairs_mut().append_pair("per_page", TAGS_PER_PAGE);

        let mut tags = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next.take() {
            let response = Self::send(self.request(repository, url))?;
            next = response
                .headers()
                .get(LINK)
                .and_then(|v| v.to_str().ok())
                .and_then(next_page)
                .and_then(|link| Url::parse(&link).ok());
            let page: Vec<TagEntry> = response.json().map_err(transport)?;
            tags.extend(page.into_iter().map(|t| t.name));
        }
        log::debug!("{} has {} tags", repository, tags.len());
        Ok(tags)
    }

    fn resolve_tag_to_commit(
        &self,
        repository: &Repository,
        tag: &str,
    ) -> Result<String, HostError> {
        let url = self.endpoint(repository, &["git", "ref", "tags", tag])?;
        let mut object = Self::send(self.request(repository, url))?
            .json::<RefEntry>()
            .map_err(transport)?
            .object;

        for _ in 0..MAX_TAG_DEPTH {
            if object.kind != "tag" {
                return Ok(object.sha);
            }
            let url = self.endpoint(repository, &["git", "tags", &object.sha])?;
            object = Self::send(self.request(repository, url))?
                .json::<RefEntry>()
                .map_err(transport)?
                .object;
        }
        Err(HostError::Transport(format!(
            "tag {tag} does not resolve to a commit"
        )))
    }

    fn resolve_latest_commit(&self, repository: &Repository) -> Result<String, HostError> {
        let mut url = self.endpoint(repository, &["commits"])?;
        url.query_pairs_mut().append_pair("per_page", "1");
        let commits: Vec<CommitEntry> = Self::send(self.request(repository, url))?
            .json()
            .map_err(transport)?;
        commits
            .into_iter()
            .next()
            .map(|c| c.sha)
            .ok_or(HostError::NotFound)
    }

    fn file_exists(
        &self,
        repository: &Repository,
        hash: &str,
        path: &str,
    ) -> Result<bool, HostError> {
        match self.contents(repository, hash, path) {
            Ok(_) => Ok(true),
            Err(HostError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn file_content(
        &self,
        repository: &Repository,
        hash: &str,
        path: &str,
    ) -> Result<String, HostError> {
        self.contents(repository, hash, path)?
            .text()
            .map_err(transport)
    }

    fn download_archive(
        &self,
        repository: &Repository,
        hash: &str,
    ) -> Result<Box<dyn Read + Send>, HostError> {
        let url = self.endpoint(repository, &["tarball", hash])?;
        log::debug!("Downloading {}", url);
        let response = Self::send(self.request(repository, url))?;
        Ok(Box::new(response))
    }
}

fn transport(err: impl std::fmt::Display) -> HostError {
    HostError::Transport(err.to_string())
}

/// Map a non-success response to a host failure. `None` means success.
fn classify(status: StatusCode, headers: &HeaderMap, now: SystemTime) -> Option<HostError> {
    if status.is_success() {
        return None;
    }
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let exhausted = header("x-ratelimit-remaining") == Some("0");
    match status {
        StatusCode::UNAUTHORIZED => Some(HostError::Unauthorized),
        StatusCode::TOO_MANY_REQUESTS => Some(rate_limited(headers, now)),
        StatusCode::FORBIDDEN if exhausted || headers.contains_key(RETRY_AFTER) => {
            Some(rate_limited(headers, now))
        }
        StatusCode::FORBIDDEN => Some(HostError::Unauthorized),
        StatusCode::NOT_FOUND => Some(HostError::NotFound),
        status => Some(HostError::Transport(format!("HTTP {status}"))),
    }
}

fn rate_limited(headers: &HeaderMap, now: SystemTime) -> HostError {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let retry_after = header("retry-after")
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or_else(|| {
            let reset = header("x-ratelimit-reset")?.trim().parse::<u64>().ok()?;
            let now = now.duration_since(UNIX_EPOCH).ok()?.as_secs();
            Some(reset.saturating_sub(now))
        })
        .unwrap_or(60);

    HostError::RateLimited {
        retry_after: Duration::from_secs(retry_after),
    }
}

/// Extract the `rel="next"` target from a `Link` header.
fn next_page(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        params
            .split(';')
            .any(|p| p.trim() == "rel=\"next\"")
            .then(|| {
                target
                    .trim()
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string()
            })
    })
}
