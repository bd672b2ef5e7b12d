//! Start-up sweep that drops status rows whose processes are gone.

use tracing::{info, warn};

use super::{LIFECYCLE_TARGET, LifecycleError};
use crate::model::{EntityKey, ProcessStatus};
use crate::store::Store;
use crate::supervisor::ProcessSupervisor;

/// What a reconciliation pass examined and removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Status rows probed.
    pub examined: usize,
    /// Rows removed because their process was not alive.
    pub removed: Vec<EntityKey>,
}

/// Probes every recorded pid and deletes rows for dead processes.
///
/// Afterwards every remaining row names a live process. A pid owned by
/// another user aborts the sweep with a fatal error.
pub fn reconcile_all<S: ProcessSupervisor>(
    store: &mut Store,
    supervisor: &S,
) -> Result<ReconcileReport, LifecycleError> {
    let mut report = ReconcileReport::default();
    let mut keys = Vec::new();
    for cluster in store.clusters()? {
        keys.extend(cluster.brokers.iter().map(|broker| EntityKey::Broker {
            cluster_id: cluster.id,
            broker_id: broker.id,
        }));
    }
    keys.push(EntityKey::Coordination);

    for key in keys {
        let Some(status) = store.status(key)? else {
            continue;
        };
        report.examined += 1;
        if is_live(&status, supervisor)? {
            continue;
        }
        warn!(
            target: LIFECYCLE_TARGET,
            entity = %key,
            pid = status.pid,
            "removing status of a process that is no longer running"
        );
        store.delete_status(key)?;
        report.removed.push(key);
    }
    info!(
        target: LIFECYCLE_TARGET,
        examined = report.examined,
        removed = report.removed.len(),
        "reconciliation complete"
    );
    Ok(report)
}

fn is_live<S: ProcessSupervisor>(
    status: &ProcessStatus,
    supervisor: &S,
) -> Result<bool, LifecycleError> {
    match status.process_id() {
        Some(pid) => Ok(supervisor.is_alive(pid)?),
        None => Ok(false),
    }
}
