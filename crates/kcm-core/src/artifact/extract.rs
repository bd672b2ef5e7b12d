//! Strip-root extraction of gzipped tarballs.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;

use super::{ARTIFACT_TARGET, ProvisionError};

/// Unpacks `archive` into `target`, dropping the first path segment of every
/// entry.
///
/// Entries are written to a staging directory next to `target` which is
/// renamed into place once complete, so an interrupted extraction never leaves
/// a half-populated install tree behind.
pub(super) fn extract_stripped(archive: &Path, target: &Path) -> Result<(), ProvisionError> {
    let parent = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| ProvisionError::Io {
        path: parent.to_path_buf(),
        source,
    })?;
    let staging = tempfile::Builder::new()
        .prefix(".extract")
        .tempdir_in(parent)
        .map_err(|source| ProvisionError::Io {
            path: parent.to_path_buf(),
            source,
        })?;

    let file = File::open(archive).map_err(|source| ProvisionError::Io {
        path: archive.to_path_buf(),
        source,
    })?;
    let extract_error = |source| ProvisionError::Extract {
        archive: archive.to_path_buf(),
        source,
    };
    let mut tarball = Archive::new(GzDecoder::new(file));
    let mut written = 0_usize;
    for entry in tarball.entries().map_err(extract_error)? {
        let mut entry = entry.map_err(extract_error)?;
        let name = entry.path().map_err(extract_error)?.into_owned();
        let Some(relative) = strip_root(&name)? else {
            continue;
        };
        let destination = staging.path().join(&relative);
        if let Some(dir) = destination.parent() {
            fs::create_dir_all(dir).map_err(|source| ProvisionError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        if entry.header().entry_type() == EntryType::Link {
            let link = entry
                .link_name()
                .map_err(extract_error)?
                .ok_or_else(|| ProvisionError::UnsafeEntry { entry: name.clone() })?
                .into_owned();
            let source_path = strip_root(&link)?
                .map(|relative| staging.path().join(relative))
                .ok_or(ProvisionError::UnsafeEntry { entry: link })?;
            fs::hard_link(&source_path, &destination).map_err(|source| ProvisionError::Io {
                path: destination.clone(),
                source,
            })?;
        } else {
            entry.unpack(&destination).map_err(extract_error)?;
        }
        written += 1;
    }

    fs::rename(staging.path(), target).map_err(|source| ProvisionError::Io {
        path: target.to_path_buf(),
        source,
    })?;
    debug!(
        target: ARTIFACT_TARGET,
        archive = %archive.display(),
        path = %target.display(),
        entries = written,
        "archive extracted"
    );
    Ok(())
}

/// Removes the leading segment of an entry name.
///
/// Returns `None` for the root entry itself and rejects names that would
/// escape the target directory.
fn strip_root(name: &Path) -> Result<Option<PathBuf>, ProvisionError> {
    let mut components = name.components();
    match components.next() {
        Some(Component::Normal(_)) => {}
        Some(Component::CurDir) => return strip_root(components.as_path()),
        None => return Ok(None),
        Some(_) => {
            return Err(ProvisionError::UnsafeEntry {
                entry: name.to_path_buf(),
            });
        }
    }
    let mut relative = PathBuf::new();
    for component in components {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ProvisionError::UnsafeEntry {
                    entry: name.to_path_buf(),
                });
            }
        }
    }
    if relative.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(relative))
    }
}
