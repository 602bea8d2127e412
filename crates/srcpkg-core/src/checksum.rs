//! Content checksums for installed packages and lock sets.
//!
//! A package tree is hashed by streaming a canonical tar archive of it into
//! BLAKE3:
//! - Paths are relative, NFC-normalized and use forward slashes
//! - Entries are sorted by path bytes
//! - Metadata is fixed: mtime=0, uid=0, gid=0, mode=0644, empty owner names
//! - Only regular files are included (directories are implicit)
//!
//! Every file counts, including dotfiles and files a `.gitignore` would hide.
//! Checksums render as `h1:<base64>`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ignore::WalkBuilder;
use serde::Serialize;
use tar::{Builder, Header};
use unicode_normalization::UnicodeNormalization;

use crate::error::IoContext;
use crate::{Error, Result};

fn render(hash: blake3::Hash) -> String {
    format!("h1:{}", STANDARD.encode(hash.as_bytes()))
}

fn canonicalize_path(root: &Path, path: &Path) -> Result<String> {
    let s = path.to_str().ok_or_else(|| Error::Filesystem {
        path: root.join(path),
        source: io::Error::new(io::ErrorKind::InvalidData, "non-UTF-8 path"),
    })?;
    Ok(s.nfc().collect::<String>().replace('\\', "/"))
}

fn walk_error(root: &Path, err: ignore::Error) -> Error {
    let message = err.to_string();
    Error::Filesystem {
        path: root.to_path_buf(),
        source: err.into_io_error().unwrap_or_else(|| io::Error::other(message)),
    }
}

/// Files of `dir` as (relative path, canonical name), sorted by canonical name.
fn canonical_entries(dir: &Path) -> Result<Vec<(PathBuf, String)>> {
    let mut entries = Vec::new();
    for result in WalkBuilder::new(dir).standard_filters(false).build() {
        let entry = result.map_err(|e| walk_error(dir, e))?;
        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }
        let Ok(rel_path) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let canonical = canonicalize_path(dir, rel_path)?;
        entries.push((rel_path.to_path_buf(), canonical));
    }
    entries.sort_by(|a, b| a.1.as_bytes().cmp(b.1.as_bytes()));
    Ok(entries)
}

/// Write the canonical tar of `dir` into `writer`.
pub fn write_canonical_tar<W: io::Write>(dir: &Path, writer: W) -> Result<()> {
    let mut builder = Builder::new(writer);
    builder.mode(tar::HeaderMode::Deterministic);

    for (rel_path, canonical_path) in canonical_entries(dir)? {
        let full_path = dir.join(&rel_path);
        let file = fs::File::open(&full_path).at(&full_path)?;
        let len = file.metadata().at(&full_path)?.len();

        let mut header = Header::new_gnu();
        header.set_size(len);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_username("").at(&full_path)?;
        header.set_groupname("").at(&full_path)?;
        header.set_entry_type(tar::EntryType::Regular);

        builder
            .append_data(&mut header, &canonical_path, file)
            .at(&full_path)?;
    }

    builder.finish().at(dir)
}

/// Checksum of a package tree.
pub fn content_checksum(dir: &Path) -> Result<String> {
    let mut hasher = blake3::Hasher::new();
    write_canonical_tar(dir, &mut hasher)?;
    Ok(render(hasher.finalize()))
}

/// Serialize `value` as canonical JSON: object keys sorted recursively, no whitespace.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let mut buf = Vec::new();
    let mut ser =
        serde_json::Serializer::with_formatter(&mut buf, canon_json::CanonicalFormatter::new());
    value.serialize(&mut ser)?;
    // The formatter only ever emits UTF-8.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Checksum of the canonical JSON encoding of `value`.
pub fn lock_checksum<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(render(blake3::hash(canonical_json(value)?.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_content_checksum_stable_and_sensitive() {
        let a = tempdir().unwrap();
        write(a.path(), "src/lib.php", "<?php");
        write(a.path(), "README.md", "hello");

        let b = tempdir().unwrap();
        write(b.path(), "README.md", "hello");
        write(b.path(), "src/lib.php", "<?php");

        let sum = content_checksum(a.path()).unwrap();
        assert!(sum.starts_with("h1:"));
        assert_eq!(sum, content_checksum(b.path()).unwrap());

        write(b.path(), "src/lib.php", "<?php // changed");
        assert_ne!(sum, content_checksum(b.path()).unwrap());
    }

    #[test]
    fn test_content_checksum_includes_ignored_and_hidden_files() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let before = content_checksum(dir.path()).unwrap();

        write(dir.path(), ".gitignore", "b.txt\n");
        let with_gitignore = content_checksum(dir.path()).unwrap();
        assert_ne!(before, with_gitignore);

        write(dir.path(), "b.txt", "b");
        assert_ne!(with_gitignore, content_checksum(dir.path()).unwrap());
    }

    #[test]
    fn test_empty_directories_do_not_count() {
        let dir = tempdir().unwrap();
        write(dir.path(), "a.txt", "a");
        let before = content_checksum(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("empty/nested")).unwrap();
        assert_eq!(before, content_checksum(dir.path()).unwrap());
    }

    #[test]
    fn test_canonical_json_sorts_keys() {
        let value = serde_json::json!({
            "b": { "z": 1, "a": [2, 1] },
            "a": "x"
        });
        insta::assert_snapshot!(canonical_json(&value).unwrap(), @r#"{"a":"x","b":{"a":[2,1],"z":1}}"#);
    }

    #[test]
    fn test_lock_checksum_ignores_key_order() {
        let mut first = HashMap::new();
        let mut second = HashMap::new();
        for (k, v) in [("one", 1), ("two", 2), ("three", 3)] {
            first.insert(k, v);
        }
        for (k, v) in [("three", 3), ("one", 1), ("two", 2)] {
            second.insert(k, v);
        }
        assert_eq!(
            lock_checksum(&first).unwrap(),
            lock_checksum(&second).unwrap()
        );
        assert_ne!(
            lock_checksum(&first).unwrap(),
            lock_checksum(&HashMap::from([("one", 1)])).unwrap()
        );
    }
}
