//! Shared doubles for lifecycle tests.

use std::cell::{RefCell, RefMut};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use url::Url;

use kcm_config::Layout;
use kcm_core::{
    ArtifactProvisioner, Cluster, CreateOutcome, EntityKey, FetchError, Fetcher, LaunchSpec,
    LifecycleManager, LifecycleSettings, NewCluster, ProcessSupervisor, Store, SupervisorError,
};

/// Simulated OS process table.
///
/// Tests steer the simulation by editing the public fields through
/// [`RecordingSupervisor::table`].
#[derive(Debug, Default)]
pub struct ProcessTable {
    next_pid: u32,
    exiting: HashMap<u32, u32>,
    /// Pids of live processes owned by this user.
    pub alive: BTreeSet<u32>,
    /// Pids of live processes owned by another user.
    pub foreign: BTreeSet<u32>,
    /// Processes ignore SIGTERM.
    pub stubborn: bool,
    /// Processes keep answering probes this many times after SIGTERM.
    pub probes_until_exit: u32,
    pub spawned: Vec<(u32, LaunchSpec)>,
    pub terminated: Vec<u32>,
}

/// Supervisor double sharing one [`ProcessTable`] between clones.
#[derive(Debug, Clone, Default)]
pub struct RecordingSupervisor {
    table: Rc<RefCell<ProcessTable>>,
}

impl RecordingSupervisor {
    pub fn new() -> Self {
        let supervisor = Self::default();
        supervisor.table.borrow_mut().next_pid = 4000;
        supervisor
    }

    /// Mutable access to the simulated process table.
    pub fn table(&self) -> RefMut<'_, ProcessTable> {
        self.table.borrow_mut()
    }

    /// Simulates a crash or reboot.
    pub fn kill(&self, pid: u32) {
        self.table.borrow_mut().alive.remove(&pid);
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.table.borrow().alive.contains(&pid)
    }

    pub fn live_count(&self) -> usize {
        self.table.borrow().alive.len()
    }

    pub fn spawn_count(&self) -> usize {
        self.table.borrow().spawned.len()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.table.borrow().terminated.clone()
    }
}

impl ProcessSupervisor for RecordingSupervisor {
    fn spawn_detached(&self, spec: &LaunchSpec) -> Result<u32, SupervisorError> {
        let mut table = self.table.borrow_mut();
        table.next_pid += 1;
        let pid = table.next_pid;
        table.alive.insert(pid);
        table.spawned.push((pid, spec.clone()));
        Ok(pid)
    }

    fn terminate(&self, pid: u32) -> Result<(), SupervisorError> {
        let mut table = self.table.borrow_mut();
        if !table.alive.contains(&pid) {
            return Err(SupervisorError::Signal {
                pid,
                source: nix::errno::Errno::ESRCH,
            });
        }
        table.terminated.push(pid);
        if !table.stubborn {
            let probes = table.probes_until_exit;
            table.exiting.insert(pid, probes);
        }
        Ok(())
    }

    fn is_alive(&self, pid: u32) -> Result<bool, SupervisorError> {
        let mut table = self.table.borrow_mut();
        if table.foreign.contains(&pid) {
            return Err(SupervisorError::OwnershipViolation { pid });
        }
        if let Some(remaining) = table.exiting.get_mut(&pid) {
            if *remaining == 0 {
                table.exiting.remove(&pid);
                table.alive.remove(&pid);
            } else {
                *remaining -= 1;
            }
        }
        Ok(table.alive.contains(&pid))
    }
}

/// Fetcher serving one prebuilt archive for every distribution.
#[derive(Debug, Clone)]
pub struct ArchiveFetcher {
    archive: Rc<Vec<u8>>,
    pub requests: Rc<RefCell<Vec<Url>>>,
}

impl ArchiveFetcher {
    pub fn new() -> Self {
        Self {
            archive: Rc::new(distribution_archive()),
            requests: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn request_count(&self) -> usize {
        self.requests.borrow().len()
    }
}

impl Fetcher for ArchiveFetcher {
    fn fetch(&self, url: &Url, destination: &Path) -> Result<(), FetchError> {
        self.requests.borrow_mut().push(url.clone());
        fs::write(destination, self.archive.as_slice()).map_err(|source| FetchError::Io {
            path: destination.to_path_buf(),
            source,
        })
    }
}

/// Gzipped tarball with both Kafka and ZooKeeper library layouts below one
/// versioned root.
pub fn distribution_archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for (name, body, mode) in [
        ("dist-1.0/libs/kafka.jar", b"jar".as_slice(), 0o644),
        ("dist-1.0/lib/zookeeper.jar", b"jar".as_slice(), 0o644),
        ("dist-1.0/bin/kafka-topics.sh", b"#!/bin/sh\n".as_slice(), 0o755),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(mode);
        header.set_cksum();
        builder
            .append_data(&mut header, name, body)
            .expect("append entry");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

pub type TestManager = LifecycleManager<RecordingSupervisor, ArchiveFetcher>;

/// Temporary data root with a manager wired to the doubles.
pub struct Sandbox {
    _temp: TempDir,
    pub layout: Layout,
    pub supervisor: RecordingSupervisor,
    pub fetcher: ArchiveFetcher,
    pub settings: LifecycleSettings,
}

impl Sandbox {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("temp dir");
        let layout = Layout::new(temp.path().join("data"), temp.path().join("cache"));
        layout.prepare().expect("prepare layout");
        Self {
            _temp: temp,
            layout,
            supervisor: RecordingSupervisor::new(),
            fetcher: ArchiveFetcher::new(),
            settings: LifecycleSettings {
                java: "/usr/bin/java".into(),
                zk_addr: "127.0.0.1:2181".to_owned(),
                zookeeper_version: "3.5.5".to_owned(),
                stop_timeout: Duration::from_secs(5),
                poll_interval: Duration::ZERO,
            },
        }
    }

    /// Opens a manager over the on-disk database, as a fresh invocation would.
    pub fn manager(&self) -> TestManager {
        let store = Store::open(&self.layout.database_path()).expect("open store");
        let provisioner = ArtifactProvisioner::new(
            self.layout.clone(),
            Url::parse("https://mirror.test/dyn/closer.cgi").expect("mirror url"),
            Url::parse("https://archive.test/dist/").expect("archive url"),
            self.fetcher.clone(),
        );
        LifecycleManager::new(
            store,
            self.supervisor.clone(),
            provisioner,
            self.settings.clone(),
        )
    }

    /// Registers `name` with `brokers` default-addressed brokers.
    pub fn register(&self, name: &str, brokers: u32) -> Cluster {
        let definition =
            NewCluster::with_default_brokers(name, "2.8.0", brokers).expect("valid definition");
        match self.manager().create_cluster(&definition).expect("create cluster") {
            CreateOutcome::Created(cluster) => cluster,
            CreateOutcome::AlreadyExists { name } => panic!("cluster '{name}' already exists"),
        }
    }

    /// Recorded pid of broker `broker_id` of `name`, if any.
    pub fn broker_pid(&self, name: &str, broker_id: u32) -> Option<i64> {
        let manager = self.manager();
        let cluster = manager.cluster(name).expect("registered cluster");
        let key = EntityKey::Broker {
            cluster_id: cluster.id,
            broker_id,
        };
        manager
            .store()
            .status(key)
            .expect("status query")
            .map(|status| status.pid)
    }

    /// Recorded pid of the coordination service, if any.
    pub fn coordination_pid(&self) -> Option<i64> {
        self.manager()
            .store()
            .status(EntityKey::Coordination)
            .expect("status query")
            .map(|status| status.pid)
    }
}
