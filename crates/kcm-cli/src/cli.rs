//! CLI argument definitions for kcm.
//!
//! Configuration flags (`--data-dir`, `--zk-addr`, ...) are stripped before
//! these definitions see the argument list; see [`crate::config`].

use std::ffi::OsString;

use clap::{Parser, Subcommand};

/// Command-line interface for the local cluster manager.
#[derive(Parser, Debug)]
#[command(name = "kcm", disable_help_subcommand = true)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

/// Subcommands understood by `kcm`.
#[derive(Subcommand, Debug, Clone)]
pub(crate) enum CliCommand {
    /// Registers a new cluster.
    Create {
        /// Cluster name.
        name: String,
        /// Kafka version, for example `2.8.0`.
        version: String,
        /// Number of brokers on consecutive local ports.
        #[arg(long, default_value_t = kcm_core::model::DEFAULT_BROKER_COUNT)]
        brokers: u32,
        /// Explicit broker address; repeat for more brokers.
        #[arg(long = "broker-addr", value_name = "HOST:PORT", conflicts_with = "brokers")]
        broker_addrs: Vec<String>,
    },
    /// Lists clusters whose name contains `pattern`.
    List {
        /// Substring to match.
        pattern: Option<String>,
    },
    /// Shows which processes are running.
    Status {
        /// Restricts output to one cluster.
        cluster: Option<String>,
    },
    /// Starts the coordination service and a cluster's brokers.
    Start {
        /// Cluster to start.
        cluster: String,
    },
    /// Stops a cluster's brokers, or every cluster when none is named.
    Stop {
        /// Cluster to stop.
        cluster: Option<String>,
        /// Also stops the coordination service.
        #[arg(long)]
        zk: bool,
    },
    /// Stops a cluster and removes its registration and data.
    Delete {
        /// Cluster to delete.
        cluster: String,
    },
    /// Tails broker logs.
    Logs {
        /// Restricts output to one cluster.
        cluster: Option<String>,
        /// Includes the coordination service log.
        #[arg(long)]
        zk: bool,
        /// Keeps following the files.
        #[arg(short, long)]
        follow: bool,
    },
    /// Runs a bundled admin script against a cluster.
    RunScript {
        /// Target cluster.
        cluster: String,
        /// Script name, with or without `.sh`.
        script: String,
        /// Arguments passed to the script after the connection flag.
        #[arg(num_args = 0.., trailing_var_arg = true, allow_hyphen_values = true)]
        arguments: Vec<OsString>,
    },
    /// Prints the kcm version.
    Version,
}

impl CliCommand {
    /// Whether the command changes the registry or the process table.
    pub(crate) const fn is_mutating(&self) -> bool {
        matches!(
            self,
            Self::Create { .. } | Self::Start { .. } | Self::Stop { .. } | Self::Delete { .. }
        )
    }
}
