//! Source archive extraction.

use std::fs;
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::IoContext;
use crate::{Error, Result};

const IO_BUFFER_SIZE: usize = 1024 * 1024;

fn invalid(target: &Path, message: String) -> Error {
    Error::Filesystem {
        path: target.to_path_buf(),
        source: io::Error::new(io::ErrorKind::InvalidData, message),
    }
}

/// Drop the archive's top-level directory (`<owner>-<repo>-<sha>/`) and reject
/// anything that could escape the target.
fn strip_top_level(path: &Path) -> Option<PathBuf> {
    let mut components = path.components();
    components.next()?;
    let mut stripped = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => stripped.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(stripped)
}

/// Extract a gzip-compressed tarball into `target_dir`.
///
/// Host tarballs wrap the tree in one top-level directory, which is stripped.
/// Only directories and regular files are materialized.
pub fn unpack_tarball<R: Read>(reader: R, target_dir: &Path) -> Result<()> {
    log::debug!("Extracting archive to {}", target_dir.display());
    fs::create_dir_all(target_dir).at(target_dir)?;

    let decoder = GzDecoder::new(BufReader::with_capacity(IO_BUFFER_SIZE, reader));
    let mut archive = tar::Archive::new(decoder);

    for entry in archive.entries().at(target_dir)? {
        let mut entry = entry.at(target_dir)?;
        let entry_type = entry.header().entry_type();
        if entry_type.is_pax_global_extensions() || entry_type.is_pax_local_extensions() {
            continue;
        }

        let path = entry.path().at(target_dir)?.into_owned();
        let Some(relative) = strip_top_level(&path) else {
            return Err(invalid(
                target_dir,
                format!("unsafe path in archive: {}", path.display()),
            ));
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let dest = target_dir.join(&relative);
        if entry_type.is_dir() {
            fs::create_dir_all(&dest).at(&dest)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            entry.unpack(&dest).at(&dest)?;
        } else {
            log::debug!("Skipping {} ({:?})", path.display(), entry_type);
        }
    }

    Ok(())
}
