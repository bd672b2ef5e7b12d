//! Idempotent start/stop state machine over the status store.
//!
//! Each entity is `Absent`, `RecordedDead`, or `Running`; the state is always
//! derived by probing the recorded pid, never by trusting the row alone.
//! Starting a running entity and stopping an absent one are successful
//! no-ops, so re-running a command is the retry mechanism.

mod commands;
mod error;
mod reconcile;

use std::fs;
use std::io;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use kcm_config::{Config, Layout};
use tracing::{error, info};

use crate::artifact::{ArtifactProvisioner, Distribution, Fetcher};
use crate::model::{
    Cluster, EntityKey, EntityState, NewCluster, ProcessStatus, validate_version,
};
use crate::render::ConfigRenderer;
use crate::store::{CreateOutcome, Store};
use crate::supervisor::{LaunchSpec, ProcessSupervisor};

pub use error::LifecycleError;
pub use reconcile::{ReconcileReport, reconcile_all};

pub(crate) const LIFECYCLE_TARGET: &str = "kcm::lifecycle";

/// Interval between liveness probes while waiting for a process to exit.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Tunables for the lifecycle manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Java launcher.
    pub java: PathBuf,
    /// Coordination service address.
    pub zk_addr: String,
    /// Coordination service version.
    pub zookeeper_version: String,
    /// Overall deadline of one stop command.
    pub stop_timeout: Duration,
    /// Interval between exit probes.
    pub poll_interval: Duration,
}

impl LifecycleSettings {
    /// Derives settings from loaded configuration.
    ///
    /// The coordination service version names its archive and install
    /// directory, so it must be a plain path segment.
    pub fn from_config(config: &Config) -> Result<Self, LifecycleError> {
        validate_version(config.zookeeper_version())?;
        Ok(Self {
            java: config.java_binary(),
            zk_addr: config.zk_addr().to_owned(),
            zookeeper_version: config.zookeeper_version().to_owned(),
            stop_timeout: config.stop_timeout(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }
}

/// Outcome of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was spawned and recorded.
    Started {
        /// New pid.
        pid: u32,
    },
    /// The entity was already running; nothing changed.
    AlreadyRunning {
        /// Existing pid.
        pid: u32,
    },
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The process exited and its row was removed.
    Stopped {
        /// Former pid.
        pid: u32,
    },
    /// Nothing was running; nothing changed.
    NotRunning,
}

/// Result of one stop command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Broker outcomes per cluster, in the order the clusters were visited.
    pub clusters: Vec<(String, Vec<(u32, StopOutcome)>)>,
    /// Coordination service outcome, present only when it was asked to stop.
    pub coordination: Option<StopOutcome>,
}

/// Result of starting a whole cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStart {
    /// Coordination service outcome.
    pub coordination: StartOutcome,
    /// Broker outcomes in list order.
    pub brokers: Vec<(u32, StartOutcome)>,
}

/// Observed state of one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStatus {
    /// Registry entry.
    pub cluster: Cluster,
    /// Per-broker state in list order.
    pub brokers: Vec<(u32, EntityState)>,
}

/// Orchestrates provisioning, rendering, supervision, and status bookkeeping.
#[derive(Debug)]
pub struct LifecycleManager<S, F> {
    store: Store,
    supervisor: S,
    provisioner: ArtifactProvisioner<F>,
    renderer: ConfigRenderer,
    settings: LifecycleSettings,
}

impl<S: ProcessSupervisor, F: Fetcher> LifecycleManager<S, F> {
    /// Wires the collaborators together.
    #[must_use]
    pub fn new(
        store: Store,
        supervisor: S,
        provisioner: ArtifactProvisioner<F>,
        settings: LifecycleSettings,
    ) -> Self {
        let renderer = ConfigRenderer::new(provisioner.layout().clone());
        Self {
            store,
            supervisor,
            provisioner,
            renderer,
            settings,
        }
    }

    /// Read access to the registry and status tables.
    #[must_use]
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Filesystem layout in use.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        self.provisioner.layout()
    }

    /// Settings in use.
    #[must_use]
    pub const fn settings(&self) -> &LifecycleSettings {
        &self.settings
    }

    /// Probes the recorded pid for `key`.
    pub fn state_of(&self, key: EntityKey) -> Result<EntityState, LifecycleError> {
        let Some(status) = self.store.status(key)? else {
            return Ok(EntityState::Absent);
        };
        match status.process_id() {
            Some(pid) if self.supervisor.is_alive(pid)? => Ok(EntityState::Running { pid }),
            _ => Ok(EntityState::RecordedDead { pid: status.pid }),
        }
    }

    /// Looks up a registered cluster.
    pub fn cluster(&self, name: &str) -> Result<Cluster, LifecycleError> {
        self.store
            .cluster(name)?
            .ok_or_else(|| LifecycleError::NotFound {
                name: name.to_owned(),
            })
    }

    /// Reports the state of every broker of `name`.
    pub fn cluster_status(&self, name: &str) -> Result<ClusterStatus, LifecycleError> {
        let cluster = self.cluster(name)?;
        let brokers = cluster
            .brokers
            .iter()
            .map(|broker| {
                self.state_of(broker_key(&cluster, broker.id))
                    .map(|state| (broker.id, state))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ClusterStatus { cluster, brokers })
    }

    /// Registers a new cluster; a duplicate name is reported, not an error.
    pub fn create_cluster(&mut self, cluster: &NewCluster) -> Result<CreateOutcome, LifecycleError> {
        Ok(self.store.create_cluster(cluster)?)
    }

    /// Stops a cluster's brokers, unregisters it, and removes its data.
    pub fn delete_cluster(&mut self, name: &str) -> Result<(), LifecycleError> {
        self.stop_cluster(name)?;
        if !self.store.delete_cluster(name)? {
            return Err(LifecycleError::NotFound {
                name: name.to_owned(),
            });
        }
        let dir = self.layout().cluster_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {}
            Err(error) if error.kind() == io::ErrorKind::NotFound => {}
            Err(source) => return Err(LifecycleError::RemoveDirectory { path: dir, source }),
        }
        info!(target: LIFECYCLE_TARGET, cluster = name, "cluster deleted");
        Ok(())
    }

    /// Starts the coordination service unless it is already running.
    pub fn start_coordination(&mut self) -> Result<StartOutcome, LifecycleError> {
        self.start_entity(EntityKey::Coordination, |manager| {
            let version = manager.settings.zookeeper_version.as_str();
            let install = manager
                .provisioner
                .ensure_installed(Distribution::ZooKeeper, version)?;
            let files = manager
                .renderer
                .render_coordination(&install, &manager.settings.zk_addr)?;
            Ok(commands::coordination_launch(
                &manager.settings.java,
                &install,
                &files,
            )?)
        })
    }

    /// Starts one broker unless it is already running.
    ///
    /// The coordination service is not started here; callers starting a lone
    /// broker are expected to have started it already.
    pub fn start_broker(
        &mut self,
        cluster: &Cluster,
        broker_id: u32,
    ) -> Result<StartOutcome, LifecycleError> {
        let broker = cluster
            .broker(broker_id)
            .ok_or_else(|| LifecycleError::BrokerNotFound {
                cluster: cluster.name.clone(),
                broker: broker_id,
            })?
            .clone();
        self.start_entity(broker_key(cluster, broker_id), |manager| {
            let install = manager
                .provisioner
                .ensure_installed(Distribution::Kafka, &cluster.version)?;
            let files = manager
                .renderer
                .render_broker(cluster, &broker, &manager.settings.zk_addr)?;
            Ok(commands::broker_launch(
                &manager.settings.java,
                &install,
                &files,
            )?)
        })
    }

    /// Starts the coordination service, then every broker in list order.
    ///
    /// The first failure aborts the remaining brokers.
    pub fn start_cluster(&mut self, name: &str) -> Result<ClusterStart, LifecycleError> {
        let cluster = self.cluster(name)?;
        let coordination = self.start_coordination()?;
        let mut brokers = Vec::with_capacity(cluster.brokers.len());
        for broker in &cluster.brokers {
            brokers.push((broker.id, self.start_broker(&cluster, broker.id)?));
        }
        info!(target: LIFECYCLE_TARGET, cluster = name, "cluster started");
        Ok(ClusterStart {
            coordination,
            brokers,
        })
    }

    /// Stops the coordination service.
    pub fn stop_coordination(&mut self) -> Result<StopOutcome, LifecycleError> {
        let deadline = self.deadline();
        self.stop_entity(EntityKey::Coordination, deadline)
    }

    /// Stops one broker.
    pub fn stop_broker(
        &mut self,
        cluster: &Cluster,
        broker_id: u32,
    ) -> Result<StopOutcome, LifecycleError> {
        if cluster.broker(broker_id).is_none() {
            return Err(LifecycleError::BrokerNotFound {
                cluster: cluster.name.clone(),
                broker: broker_id,
            });
        }
        let deadline = self.deadline();
        self.stop_entity(broker_key(cluster, broker_id), deadline)
    }

    /// Stops every broker of `name` in list order, leaving the coordination
    /// service running.
    pub fn stop_cluster(&mut self, name: &str) -> Result<Vec<(u32, StopOutcome)>, LifecycleError> {
        let cluster = self.cluster(name)?;
        let deadline = self.deadline();
        self.stop_brokers(&cluster, deadline)
    }

    /// Stops the brokers of `cluster`, or of every cluster when `None`, then
    /// the coordination service when `include_coordination` is set.
    ///
    /// One deadline covers the whole command.
    pub fn stop(
        &mut self,
        cluster: Option<&str>,
        include_coordination: bool,
    ) -> Result<StopReport, LifecycleError> {
        let deadline = self.deadline();
        let targets = match cluster {
            Some(name) => vec![self.cluster(name)?],
            None => self.store.clusters()?,
        };
        let mut report = StopReport::default();
        for target in targets {
            let outcomes = self.stop_brokers(&target, deadline)?;
            report.clusters.push((target.name, outcomes));
        }
        if include_coordination {
            report.coordination = Some(self.stop_entity(EntityKey::Coordination, deadline)?);
        }
        Ok(report)
    }

    /// Stops every broker of every cluster, then optionally the coordination
    /// service.
    pub fn stop_all(&mut self, include_coordination: bool) -> Result<StopReport, LifecycleError> {
        self.stop(None, include_coordination)
    }

    /// Drops every status row whose process is gone.
    pub fn reconcile(&mut self) -> Result<ReconcileReport, LifecycleError> {
        reconcile_all(&mut self.store, &self.supervisor)
    }

    fn deadline(&self) -> Instant {
        Instant::now() + self.settings.stop_timeout
    }

    fn stop_brokers(
        &mut self,
        cluster: &Cluster,
        deadline: Instant,
    ) -> Result<Vec<(u32, StopOutcome)>, LifecycleError> {
        let mut outcomes = Vec::with_capacity(cluster.brokers.len());
        for broker in &cluster.brokers {
            let outcome = self.stop_entity(broker_key(cluster, broker.id), deadline)?;
            outcomes.push((broker.id, outcome));
        }
        Ok(outcomes)
    }

    fn start_entity<P>(&mut self, key: EntityKey, prepare: P) -> Result<StartOutcome, LifecycleError>
    where
        P: FnOnce(&Self) -> Result<LaunchSpec, LifecycleError>,
    {
        match self.state_of(key)? {
            EntityState::Running { pid } => {
                info!(target: LIFECYCLE_TARGET, entity = %key, pid, "already running");
                return Ok(StartOutcome::AlreadyRunning { pid });
            }
            EntityState::RecordedDead { pid } => {
                info!(target: LIFECYCLE_TARGET, entity = %key, pid, "discarding stale status");
                self.store.delete_status(key)?;
            }
            EntityState::Absent => {}
        }

        let spec = prepare(self)?;
        let pid = self.supervisor.spawn_detached(&spec)?;
        if let Err(source) = self.store.put_status(&ProcessStatus::new(key, pid)) {
            error!(
                target: LIFECYCLE_TARGET,
                entity = %key,
                pid,
                error = %source,
                "process started but its status could not be recorded"
            );
            return Err(source.into());
        }
        info!(target: LIFECYCLE_TARGET, entity = %key, pid, "started");
        Ok(StartOutcome::Started { pid })
    }

    fn stop_entity(&mut self, key: EntityKey, deadline: Instant) -> Result<StopOutcome, LifecycleError> {
        let EntityState::Running { pid } = self.state_of(key)? else {
            return Ok(StopOutcome::NotRunning);
        };
        self.supervisor.terminate(pid)?;
        info!(target: LIFECYCLE_TARGET, entity = %key, pid, "termination requested");
        while self.supervisor.is_alive(pid)? {
            let now = Instant::now();
            if now >= deadline {
                return Err(LifecycleError::StopTimeout {
                    entity: key.to_string(),
                    pid,
                    timeout: self.settings.stop_timeout,
                });
            }
            thread::sleep(self.settings.poll_interval.min(deadline - now));
        }
        self.store.delete_status(key)?;
        info!(target: LIFECYCLE_TARGET, entity = %key, pid, "stopped");
        Ok(StopOutcome::Stopped { pid })
    }
}

const fn broker_key(cluster: &Cluster, broker_id: u32) -> EntityKey {
    EntityKey::Broker {
        cluster_id: cluster.id,
        broker_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ModelError;
    use rstest::rstest;

    #[rstest]
    #[case("../x")]
    #[case("3.5/../../etc")]
    #[case("")]
    fn unsafe_coordination_versions_are_rejected(#[case] version: &str) {
        let config = Config {
            zookeeper_version: version.to_owned(),
            ..Config::default()
        };
        assert!(matches!(
            LifecycleSettings::from_config(&config),
            Err(LifecycleError::Model(ModelError::InvalidVersion { .. }))
        ));
    }

    #[test]
    fn settings_follow_the_configuration() {
        let config = Config {
            zookeeper_version: "3.6.3".to_owned(),
            stop_timeout_secs: 7,
            ..Config::default()
        };
        let settings = LifecycleSettings::from_config(&config).expect("valid settings");
        assert_eq!(settings.zookeeper_version, "3.6.3");
        assert_eq!(settings.stop_timeout, Duration::from_secs(7));
        assert_eq!(settings.poll_interval, DEFAULT_POLL_INTERVAL);
    }
}
