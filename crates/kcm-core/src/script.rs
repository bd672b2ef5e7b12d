//! Bundled admin scripts and the connection flag each one needs.

use std::ffi::OsString;
use std::path::PathBuf;

use kcm_config::Layout;
use thiserror::Error;

use crate::model::Cluster;

/// How a script is pointed at a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFlag {
    /// `--zookeeper <zk_addr>/<cluster>`.
    Zookeeper,
    /// `--bootstrap-server <brokers>`.
    BootstrapServer,
    /// `--bootstrap-servers <brokers>`.
    BootstrapServers,
}

const SCRIPTS: &[(&str, ConnectionFlag)] = &[
    ("kafka-acls", ConnectionFlag::BootstrapServer),
    ("kafka-broker-api-versions", ConnectionFlag::BootstrapServer),
    ("kafka-configs", ConnectionFlag::BootstrapServer),
    ("kafka-console-consumer", ConnectionFlag::BootstrapServer),
    ("kafka-consumer-groups", ConnectionFlag::BootstrapServer),
    ("kafka-delegation-tokens", ConnectionFlag::BootstrapServer),
    ("kafka-delete-records", ConnectionFlag::BootstrapServer),
    ("kafka-log-dirs", ConnectionFlag::BootstrapServer),
    ("kafka-preferred-replica-election", ConnectionFlag::Zookeeper),
    ("kafka-reassign-partitions", ConnectionFlag::BootstrapServer),
    ("kafka-streams-application-reset", ConnectionFlag::BootstrapServers),
    ("kafka-topics", ConnectionFlag::Zookeeper),
];

/// Looks up a script by name, with or without the `.sh` suffix.
#[must_use]
pub fn connection_flag(script: &str) -> Option<ConnectionFlag> {
    let name = script.strip_suffix(".sh").unwrap_or(script);
    SCRIPTS
        .iter()
        .find(|(known, _)| *known == name)
        .map(|(_, flag)| *flag)
}

/// Names of every supported script.
pub fn known_scripts() -> impl Iterator<Item = &'static str> {
    SCRIPTS.iter().map(|(name, _)| *name)
}

/// A fully resolved foreground script run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptInvocation {
    /// Script path inside the install tree.
    pub program: PathBuf,
    /// Connection flag followed by the caller's arguments.
    pub args: Vec<OsString>,
}

/// Resolves `script` for `cluster`, prepending the connection flag.
pub fn script_invocation(
    layout: &Layout,
    cluster: &Cluster,
    zk_addr: &str,
    script: &str,
    extra: &[OsString],
) -> Result<ScriptInvocation, ScriptError> {
    let flag = connection_flag(script).ok_or_else(|| ScriptError::Unknown {
        script: script.to_owned(),
    })?;
    let name = script.strip_suffix(".sh").unwrap_or(script);
    let program = layout
        .kafka_install(&cluster.version)
        .join("bin")
        .join(format!("{name}.sh"));
    if !program.is_file() {
        return Err(ScriptError::NotInstalled { path: program });
    }
    let (option, value) = match flag {
        ConnectionFlag::Zookeeper => ("--zookeeper", format!("{zk_addr}/{}", cluster.name)),
        ConnectionFlag::BootstrapServer => ("--bootstrap-server", cluster.bootstrap_servers()),
        ConnectionFlag::BootstrapServers => ("--bootstrap-servers", cluster.bootstrap_servers()),
    };
    let mut args = vec![OsString::from(option), OsString::from(value)];
    args.extend(extra.iter().cloned());
    Ok(ScriptInvocation { program, args })
}

/// Errors raised while resolving a script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// The script is not in the supported table.
    #[error(
        "unknown script '{script}'; supported scripts: {}",
        known_scripts().collect::<Vec<_>>().join(", ")
    )]
    Unknown {
        /// Requested script.
        script: String,
    },
    /// The cluster's distribution has not been installed yet.
    #[error("'{path}' not found; start the cluster once to install it")]
    NotInstalled {
        /// Expected script path.
        path: PathBuf,
    },
}
