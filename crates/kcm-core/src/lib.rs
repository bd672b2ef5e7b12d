//! Core of the kcm local cluster manager.
//!
//! The crate keeps a durable record of the broker and coordination processes
//! it has started and reconciles that record against the operating system.
//! [`LifecycleManager`] combines the pieces into idempotent start and stop
//! operations:
//!
//! - [`Store`] persists cluster definitions and `entity -> pid` status rows.
//! - [`ProcessSupervisor`] spawns detached children, signals them, and probes
//!   their liveness.
//! - [`ArtifactProvisioner`] caches versioned distributions and unpacks them
//!   once per version.
//! - [`ConfigRenderer`] writes per-instance configuration before launch.
//!
//! Mutating commands serialise through [`WriterLock`] so two invocations
//! cannot spawn duplicate processes for one entity.

pub mod artifact;
pub mod lifecycle;
pub mod lock;
pub mod model;
pub mod render;
pub mod script;
pub mod store;
pub mod supervisor;
pub mod telemetry;

pub use artifact::{ArtifactProvisioner, Distribution, FetchError, Fetcher, HttpFetcher};
pub use lifecycle::{
    ClusterStart, ClusterStatus, LifecycleError, LifecycleManager, LifecycleSettings,
    ReconcileReport, StartOutcome, StopOutcome, StopReport, reconcile_all,
};
pub use lock::{LockError, WriterLock};
pub use model::{Broker, Cluster, EntityKey, EntityState, NewCluster, ProcessStatus};
pub use render::ConfigRenderer;
pub use store::{CreateOutcome, Store, StoreError};
pub use supervisor::{LaunchSpec, ProcessSupervisor, SupervisorError, SystemSupervisor};
