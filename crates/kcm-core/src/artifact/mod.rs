//! Versioned distribution cache.
//!
//! An artefact is addressed by distribution and version only. The archive is
//! downloaded at most once into the cache root and unpacked at most once into
//! the data root; later calls see the existing file or directory and return
//! immediately.

mod extract;
mod fetch;

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use kcm_config::Layout;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

pub use fetch::{FetchError, Fetcher, HttpFetcher};

#[cfg(test)]
pub use fetch::MockFetcher;

pub(crate) const ARTIFACT_TARGET: &str = "kcm::artifact";

/// Scala build the Kafka distributions are fetched for.
const SCALA_VERSION: &str = "2.12";

/// Distributions the provisioner knows how to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Distribution {
    /// The message broker.
    Kafka,
    /// The coordination service.
    ZooKeeper,
}

impl Distribution {
    /// Path of the archive below the mirror and archive roots.
    #[must_use]
    pub fn remote_path(self, version: &str) -> String {
        match self {
            Self::Kafka => format!("kafka/{version}/kafka_{SCALA_VERSION}-{version}.tgz"),
            Self::ZooKeeper => {
                format!("zookeeper/zookeeper-{version}/apache-zookeeper-{version}-bin.tar.gz")
            }
        }
    }

    /// Cached archive location.
    #[must_use]
    pub fn archive_path(self, layout: &Layout, version: &str) -> PathBuf {
        match self {
            Self::Kafka => layout.kafka_archive(version),
            Self::ZooKeeper => layout.zookeeper_archive(version),
        }
    }

    /// Extracted install location.
    #[must_use]
    pub fn install_path(self, layout: &Layout, version: &str) -> PathBuf {
        match self {
            Self::Kafka => layout.kafka_install(version),
            Self::ZooKeeper => layout.zookeeper_install(version),
        }
    }

    /// Directory under the install tree holding the jars.
    #[must_use]
    pub const fn library_dir(self) -> &'static str {
        match self {
            Self::Kafka => "libs",
            Self::ZooKeeper => "lib",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Kafka => "kafka",
            Self::ZooKeeper => "zookeeper",
        }
    }
}

/// Downloads and unpacks distributions on demand.
#[derive(Debug)]
pub struct ArtifactProvisioner<F> {
    layout: Layout,
    mirror_url: Url,
    archive_url: Url,
    fetcher: F,
}

impl<F: Fetcher> ArtifactProvisioner<F> {
    /// Builds a provisioner over explicit endpoints.
    ///
    /// The archive root is treated as a directory whether or not it ends in
    /// `/`, so artefact paths are appended below it.
    #[must_use]
    pub fn new(layout: Layout, mirror_url: Url, archive_url: Url, fetcher: F) -> Self {
        Self {
            layout,
            mirror_url,
            archive_url: as_directory(archive_url),
            fetcher,
        }
    }

    /// Ensures the archive for `version` is cached and returns its path.
    ///
    /// The mirror is tried first; only a "not found" answer falls back to the
    /// canonical archive. Any other failure is returned unchanged.
    pub fn ensure_downloaded(
        &self,
        distribution: Distribution,
        version: &str,
    ) -> Result<PathBuf, ProvisionError> {
        let destination = distribution.archive_path(&self.layout, version);
        match fs::metadata(&destination) {
            Ok(meta) if meta.is_dir() => {
                return Err(ProvisionError::ArchiveIsDirectory { path: destination });
            }
            Ok(_) => return Ok(destination),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ProvisionError::Io {
                    path: destination,
                    source,
                });
            }
        }

        let remote = distribution.remote_path(version);
        let mirror = self.mirror_request(&remote);
        info!(
            target: ARTIFACT_TARGET,
            distribution = distribution.label(),
            version,
            url = %mirror,
            "downloading archive"
        );
        match self.fetcher.fetch(&mirror, &destination) {
            Ok(()) => Ok(destination),
            Err(FetchError::NotFound { .. }) => {
                let fallback = self.archive_url.join(&remote).map_err(|source| {
                    ProvisionError::InvalidUrl {
                        base: self.archive_url.to_string(),
                        source,
                    }
                })?;
                warn!(
                    target: ARTIFACT_TARGET,
                    distribution = distribution.label(),
                    version,
                    url = %fallback,
                    "mirror lacks archive; using canonical archive"
                );
                self.fetcher.fetch(&fallback, &destination)?;
                Ok(destination)
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Ensures the install tree for `version` exists and returns its path.
    pub fn ensure_extracted(
        &self,
        distribution: Distribution,
        version: &str,
    ) -> Result<PathBuf, ProvisionError> {
        let install = distribution.install_path(&self.layout, version);
        match fs::metadata(&install) {
            Ok(meta) if meta.is_dir() => return Ok(install),
            Ok(_) => return Err(ProvisionError::InstallNotDirectory { path: install }),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ProvisionError::Io {
                    path: install,
                    source,
                });
            }
        }
        let archive = distribution.archive_path(&self.layout, version);
        info!(
            target: ARTIFACT_TARGET,
            distribution = distribution.label(),
            version,
            path = %install.display(),
            "extracting archive"
        );
        extract::extract_stripped(&archive, &install)?;
        Ok(install)
    }

    /// Downloads then extracts, returning the install tree.
    pub fn ensure_installed(
        &self,
        distribution: Distribution,
        version: &str,
    ) -> Result<PathBuf, ProvisionError> {
        self.ensure_downloaded(distribution, version)?;
        self.ensure_extracted(distribution, version)
    }

    /// Filesystem layout the provisioner writes into.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.layout
    }

    fn mirror_request(&self, remote: &str) -> Url {
        let mut url = self.mirror_url.clone();
        url.query_pairs_mut()
            .append_pair("filename", &format!("/{remote}"))
            .append_pair("action", "download");
        url
    }
}

fn as_directory(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Joins every `*.jar` under the distribution's library directory with `:`,
/// in lexical order.
pub fn classpath(install: &Path, distribution: Distribution) -> Result<OsString, ProvisionError> {
    let dir = install.join(distribution.library_dir());
    let read_error = |source| ProvisionError::Io {
        path: dir.clone(),
        source,
    };
    let mut jars = fs::read_dir(&dir)
        .map_err(read_error)?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_error)?;
    jars.retain(|path| path.extension().is_some_and(|ext| ext == "jar"));
    jars.sort();
    if jars.is_empty() {
        return Err(ProvisionError::EmptyClasspath { path: dir });
    }
    let mut joined = OsString::new();
    for (index, jar) in jars.iter().enumerate() {
        if index > 0 {
            joined.push(":");
        }
        joined.push(jar);
    }
    Ok(joined)
}

/// Errors raised while provisioning distributions.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A directory sits where the cached archive belongs.
    #[error("'{path}' is a directory, expected an archive file")]
    ArchiveIsDirectory {
        /// Conflicting path.
        path: PathBuf,
    },
    /// A file sits where the install tree belongs.
    #[error("'{path}' exists but is not a directory")]
    InstallNotDirectory {
        /// Conflicting path.
        path: PathBuf,
    },
    /// Both download endpoints failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// The archive root URL cannot be joined with the artefact path.
    #[error("invalid archive URL '{base}': {source}")]
    InvalidUrl {
        /// Configured base URL.
        base: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },
    /// Decompression or unpacking failed.
    #[error("failed to extract '{archive}': {source}")]
    Extract {
        /// Archive being unpacked.
        archive: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },
    /// An entry would land outside the install tree.
    #[error("archive entry '{entry}' escapes the install directory")]
    UnsafeEntry {
        /// Offending entry name.
        entry: PathBuf,
    },
    /// The install tree has no jars to launch.
    #[error("no jars found under '{path}'")]
    EmptyClasspath {
        /// Library directory searched.
        path: PathBuf,
    },
    /// Filesystem access failed.
    #[error("filesystem error at '{path}': {source}")]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
