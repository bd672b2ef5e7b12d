//! Error surface of lifecycle operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::artifact::ProvisionError;
use crate::model::ModelError;
use crate::render::RenderError;
use crate::store::StoreError;
use crate::supervisor::SupervisorError;

/// Errors surfaced by start, stop, create, delete, and reconcile.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The named cluster is not registered.
    #[error("cluster '{name}' does not exist")]
    NotFound {
        /// Requested cluster name.
        name: String,
    },
    /// The cluster has no broker with this id.
    #[error("cluster '{cluster}' has no broker {broker}")]
    BrokerNotFound {
        /// Cluster name.
        cluster: String,
        /// Requested broker id.
        broker: u32,
    },
    /// A definition failed validation.
    #[error(transparent)]
    Model(#[from] ModelError),
    /// The registry or status tables failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Spawning, signalling, or probing failed.
    #[error(transparent)]
    Supervisor(#[from] SupervisorError),
    /// Download or extraction failed.
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    /// Writing instance configuration failed.
    #[error(transparent)]
    Render(#[from] RenderError),
    /// A process ignored the termination request past the deadline.
    #[error("{entity} (pid {pid}) did not exit within {timeout:?}")]
    StopTimeout {
        /// Entity being stopped.
        entity: String,
        /// Process still alive.
        pid: u32,
        /// Overall deadline of the stop command.
        timeout: Duration,
    },
    /// Removing a cluster's data directory failed.
    #[error("failed to remove '{path}': {source}")]
    RemoveDirectory {
        /// Directory being removed.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

impl LifecycleError {
    /// Whether the tool must stop immediately rather than report and carry on.
    ///
    /// Only an ownership violation qualifies: it means a tracked pid now
    /// belongs to another user.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Supervisor(SupervisorError::OwnershipViolation { .. })
        )
    }
}
