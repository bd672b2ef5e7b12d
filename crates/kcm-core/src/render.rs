//! Per-instance configuration files written before launch.

use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use kcm_config::Layout;
use tempfile::Builder;
use thiserror::Error;

use crate::model::{Broker, Cluster, ModelError, split_host_port};

const BROKER_PATTERN: &str = "%d{ISO8601} - %-5p [%t:%C{1}@%L] - %m%n";
const COORDINATION_PATTERN: &str = "%d{ISO8601} [myid:%X{myid}] - %-5p [%t:%C{1}@%L] - %m%n";

/// Files written for one broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerFiles {
    /// Broker directory; also the parent of the data directory.
    pub dir: PathBuf,
    /// `server.properties`.
    pub server_properties: PathBuf,
    /// Broker `log4j.properties`.
    pub log4j: PathBuf,
}

/// Files written for the coordination service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationFiles {
    /// `conf/zoo.cfg` inside the install tree.
    pub zoo_cfg: PathBuf,
    /// `conf/log4j.properties` inside the install tree.
    pub log4j: PathBuf,
}

/// Renders configuration for brokers and the coordination service.
#[derive(Debug, Clone)]
pub struct ConfigRenderer {
    layout: Layout,
}

impl ConfigRenderer {
    /// Builds a renderer writing below `layout`.
    #[must_use]
    pub const fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// Writes `server.properties` and `log4j.properties` for `broker`.
    pub fn render_broker(
        &self,
        cluster: &Cluster,
        broker: &Broker,
        zk_addr: &str,
    ) -> Result<BrokerFiles, RenderError> {
        let dir = self.layout.broker_dir(&cluster.name, broker.id);
        let data = dir.join("data");
        create_dir(&data)?;

        let mut server = String::new();
        server.push_str(&format!("broker.id={}\n", broker.id));
        server.push_str(&format!("listeners=PLAINTEXT://{}\n", broker.addr));
        server.push_str(&format!("log.dirs={}\n", data.display()));
        server.push_str("offsets.topic.replication.factor=1\n");
        server.push_str("transaction.state.log.replication.factor=1\n");
        server.push_str("transaction.state.log.min.isr=1\n");
        server.push_str("log.retention.hours=168\n");
        server.push_str(&format!("zookeeper.connect={zk_addr}/{}\n", cluster.name));
        server.push_str("zookeeper.connection.timeout.ms=10000\n");
        server.push_str("group.initial.rebalance.delay.ms=0\n");

        let log4j = file_appender_config(
            "log4j.rootLogger=INFO, F\n",
            &self.layout.broker_log(&cluster.name, broker.id),
            BROKER_PATTERN,
        );

        let files = BrokerFiles {
            server_properties: dir.join("server.properties"),
            log4j: dir.join("log4j.properties"),
            dir,
        };
        write_file(&files.server_properties, &server)?;
        write_file(&files.log4j, &log4j)?;
        Ok(files)
    }

    /// Writes `zoo.cfg` and `log4j.properties` into the install tree.
    pub fn render_coordination(
        &self,
        install: &Path,
        zk_addr: &str,
    ) -> Result<CoordinationFiles, RenderError> {
        let (host, port) = split_host_port(zk_addr)?;
        let data = self.layout.zookeeper_data();
        create_dir(&data)?;
        let conf = install.join("conf");
        create_dir(&conf)?;

        let zoo_cfg = format!(
            "clientPort={port}\nclientPortAddress={host}\ndataDir={}\n",
            data.display()
        );
        let log4j = file_appender_config(
            "zookeeper.root.logger=INFO, F\nlog4j.rootLogger=${zookeeper.root.logger}\n",
            &self.layout.zookeeper_log(),
            COORDINATION_PATTERN,
        );

        let files = CoordinationFiles {
            zoo_cfg: conf.join("zoo.cfg"),
            log4j: conf.join("log4j.properties"),
        };
        write_file(&files.zoo_cfg, &zoo_cfg)?;
        write_file(&files.log4j, &log4j)?;
        Ok(files)
    }
}

fn file_appender_config(root: &str, log_file: &Path, pattern: &str) -> String {
    let mut out = String::from(root);
    out.push_str("log4j.appender.F=org.apache.log4j.FileAppender\n");
    out.push_str(&format!("log4j.appender.F.File={}\n", log_file.display()));
    out.push_str("log4j.appender.F.layout=org.apache.log4j.PatternLayout\n");
    out.push_str(&format!("log4j.appender.F.layout.ConversionPattern={pattern}\n"));
    out
}

fn create_dir(path: &Path) -> Result<(), RenderError> {
    fs::create_dir_all(path).map_err(|source| RenderError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn write_file(path: &Path, contents: &str) -> Result<(), RenderError> {
    atomic_write(path, contents.as_bytes()).map_err(|source| RenderError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "target path did not have a parent directory",
        )
    })?;
    let mut file = Builder::new()
        .prefix(".render")
        .permissions(Permissions::from_mode(0o644))
        .tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Errors raised while rendering configuration.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The coordination address is malformed.
    #[error(transparent)]
    Address(#[from] ModelError),
    /// A file or directory could not be written.
    #[error("failed to write '{path}': {source}")]
    Write {
        /// Target path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
