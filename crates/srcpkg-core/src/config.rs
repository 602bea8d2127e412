//! Package manifest (`srcpkg.config.json`).
//!
//! Projects and packages share one manifest format:
//!
//! ```json
//! {
//!   "packages": { "https://github.com/acme/util.git": "^1.2.0" },
//!   "aliases": { "util": "https://github.com/acme/util.git" },
//!   "map": { "Acme\\App": "src" },
//!   "entry-points": ["public/index.php"],
//!   "packages-directory": "Packages"
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::IoContext;
use crate::model::Repository;
use crate::{Error, Result};

pub const MANIFEST_FILE: &str = "srcpkg.config.json";
pub const LOCK_FILE: &str = "srcpkg.config-lock.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Manifest {
    /// Repository URL to version constraint.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, String>,

    /// Short names for repository URLs.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,

    /// Namespace to source directory.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub map: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_points: Vec<String>,

    /// Executable name to script path.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub executables: BTreeMap<String, String>,

    #[serde(default = "default_packages_directory")]
    pub packages_directory: String,

    #[serde(default = "default_import_file")]
    pub import_file: String,
}

fn default_packages_directory() -> String {
    "Packages".to_string()
}

fn default_import_file() -> String {
    "srcpkg.imports".to_string()
}

impl Default for Manifest {
    fn default() -> Self {
        Manifest {
            packages: BTreeMap::new(),
            aliases: BTreeMap::new(),
            map: BTreeMap::new(),
            excludes: Vec::new(),
            entry_points: Vec::new(),
            executables: BTreeMap::new(),
            packages_directory: default_packages_directory(),
            import_file: default_import_file(),
        }
    }
}

impl Manifest {
    pub fn parse(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// Load a manifest, or the default one when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Manifest::default());
        }
        let content = fs::read_to_string(path).at(path)?;
        Manifest::parse(&content).map_err(|source| Error::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content = serde_json::to_string_pretty(self)?;
        content.push('\n');
        crate::write_atomic(path, content.as_bytes())
    }

    /// Expand an alias to its URL. Other names are returned unchanged.
    pub fn resolve_alias<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Declared packages as parsed repositories with their constraints.
    pub fn dependencies(&self) -> Result<Vec<(Repository, String)>> {
        self.packages
            .iter()
            .map(|(url, constraint)| {
                let repository = Repository::parse(self.resolve_alias(url))?;
                Ok((repository, constraint.clone()))
            })
            .collect()
    }

    /// The declared key naming `repository`, whatever URL form it was written in.
    pub fn declared_key(&self, repository: &Repository) -> Option<String> {
        let identity = repository.identity();
        self.packages
            .keys()
            .find(|key| {
                Repository::parse(self.resolve_alias(key)).is_ok_and(|r| r.identity() == identity)
            })
            .cloned()
    }
}
