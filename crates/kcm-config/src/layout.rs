//! Derives the on-disk layout shared by every kcm command.
//!
//! Two roots exist: the cache directory keeps downloaded distribution archives
//! and the data directory keeps the database, extracted install trees, and the
//! per-instance configuration and data of every broker. All commands must agree
//! on these paths because the state they describe outlives any one invocation.

use std::fs::DirBuilder;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::Config;
use crate::defaults::APP_DIR_NAME;

/// Canonical paths for artefacts written and read by kcm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    data_dir: PathBuf,
    cache_dir: PathBuf,
}

impl Layout {
    /// Builds a layout rooted at explicit directories.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    /// Derives the layout from configuration, falling back to the user's home
    /// and cache directories when no explicit roots are configured.
    pub fn from_config(config: &Config) -> Result<Self, LayoutError> {
        let data_dir = if let Some(dir) = config.data_dir.as_ref() {
            dir.as_std_path().to_path_buf()
        } else {
            dirs::home_dir()
                .ok_or(LayoutError::MissingHomeDirectory)?
                .join(format!(".{APP_DIR_NAME}"))
        };
        let cache_dir = if let Some(dir) = config.cache_dir.as_ref() {
            dir.as_std_path().to_path_buf()
        } else {
            dirs::cache_dir()
                .ok_or(LayoutError::MissingCacheDirectory)?
                .join(APP_DIR_NAME)
        };
        Ok(Self::new(data_dir, cache_dir))
    }

    /// Creates the data and cache roots when they do not exist yet.
    pub fn prepare(&self) -> Result<(), LayoutError> {
        create_directory(&self.cache_dir)?;
        create_directory(&self.data_dir)
    }

    /// Directory holding the database and instance data.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        self.data_dir.as_path()
    }

    /// Directory holding downloaded archives.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        self.cache_dir.as_path()
    }

    /// Path to the SQLite database backing the registry and status rows.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("database.db")
    }

    /// Path to the lock file serialising mutating invocations.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(format!("{APP_DIR_NAME}.lock"))
    }

    /// Cached Kafka archive for `version`.
    #[must_use]
    pub fn kafka_archive(&self, version: &str) -> PathBuf {
        self.cache_dir.join(format!("kafka_{version}.tar.gz"))
    }

    /// Extracted Kafka install tree for `version`.
    #[must_use]
    pub fn kafka_install(&self, version: &str) -> PathBuf {
        self.data_dir.join(format!("kafka_{version}"))
    }

    /// Cached ZooKeeper archive for `version`.
    #[must_use]
    pub fn zookeeper_archive(&self, version: &str) -> PathBuf {
        self.cache_dir.join(format!("zookeeper-{version}.tar.gz"))
    }

    /// Extracted ZooKeeper install tree for `version`.
    #[must_use]
    pub fn zookeeper_install(&self, version: &str) -> PathBuf {
        self.data_dir.join(format!("zookeeper_{version}"))
    }

    /// Directory holding every broker of a cluster.
    #[must_use]
    pub fn cluster_dir(&self, cluster: &str) -> PathBuf {
        self.data_dir.join(cluster)
    }

    /// Per-broker directory holding its configuration, data, and log.
    #[must_use]
    pub fn broker_dir(&self, cluster: &str, broker_id: u32) -> PathBuf {
        self.cluster_dir(cluster).join(format!("broker{broker_id}"))
    }

    /// Log file written by a broker.
    #[must_use]
    pub fn broker_log(&self, cluster: &str, broker_id: u32) -> PathBuf {
        self.broker_dir(cluster, broker_id).join("kafka.log")
    }

    /// Data directory of the coordination service.
    #[must_use]
    pub fn zookeeper_data(&self) -> PathBuf {
        self.data_dir.join("zkdata")
    }

    /// Log file written by the coordination service.
    #[must_use]
    pub fn zookeeper_log(&self) -> PathBuf {
        self.data_dir.join("zookeeper.log")
    }
}

fn create_directory(path: &Path) -> Result<(), LayoutError> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder
        .create(path)
        .map_err(|source| LayoutError::CreateDirectory {
            path: path.to_path_buf(),
            source,
        })
}

/// Errors raised while deriving or preparing the layout.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// No home directory could be determined for the data root.
    #[error("unable to determine the home directory; set --data-dir")]
    MissingHomeDirectory,
    /// No cache directory could be determined for the archive cache.
    #[error("unable to determine the user cache directory; set --cache-dir")]
    MissingCacheDirectory,
    /// Creating one of the roots failed.
    #[error("failed to create directory '{path}': {source}")]
    CreateDirectory {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
