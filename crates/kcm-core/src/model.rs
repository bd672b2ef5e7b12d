//! Domain types shared by the registry, the status store, and the lifecycle
//! manager.

use std::fmt;

use thiserror::Error;

/// First port assigned to default brokers.
pub const DEFAULT_BROKER_BASE_PORT: u16 = 9092;

/// Host default brokers listen on.
pub const DEFAULT_BROKER_HOST: &str = "127.0.0.1";

/// Number of brokers created when the caller does not choose.
pub const DEFAULT_BROKER_COUNT: u32 = 3;

/// A broker within a cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    /// Identifier unique within the owning cluster.
    pub id: u32,
    /// Listen address in `host:port` form.
    pub addr: String,
}

impl Broker {
    /// Builds a broker after checking the address shape.
    pub fn new(id: u32, addr: impl Into<String>) -> Result<Self, ModelError> {
        let addr = addr.into();
        split_host_port(&addr)?;
        Ok(Self { id, addr })
    }
}

/// A named, versioned set of brokers persisted in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    /// Registry-assigned identifier.
    pub id: i64,
    /// Unique human-chosen name.
    pub name: String,
    /// Distribution version every broker runs.
    pub version: String,
    /// Brokers ordered by id.
    pub brokers: Vec<Broker>,
}

impl Cluster {
    /// Comma-separated listen addresses of every broker.
    #[must_use]
    pub fn bootstrap_servers(&self) -> String {
        self.brokers
            .iter()
            .map(|broker| broker.addr.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Looks up a broker by id.
    #[must_use]
    pub fn broker(&self, id: u32) -> Option<&Broker> {
        self.brokers.iter().find(|broker| broker.id == id)
    }
}

/// A validated cluster definition awaiting insertion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCluster {
    name: String,
    version: String,
    brokers: Vec<Broker>,
}

impl NewCluster {
    /// Validates a definition with explicit brokers.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        brokers: Vec<Broker>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let version = version.into();
        if !is_plain_segment(&name) {
            return Err(ModelError::InvalidName { name });
        }
        validate_version(&version)?;
        if brokers.is_empty() {
            return Err(ModelError::NoBrokers);
        }
        let mut seen = Vec::with_capacity(brokers.len());
        for broker in &brokers {
            if seen.contains(&broker.id) {
                return Err(ModelError::DuplicateBrokerId { id: broker.id });
            }
            seen.push(broker.id);
        }
        Ok(Self {
            name,
            version,
            brokers,
        })
    }

    /// Builds a definition whose brokers listen on consecutive local ports
    /// starting at 9092, numbered from one.
    pub fn with_default_brokers(
        name: impl Into<String>,
        version: impl Into<String>,
        count: u32,
    ) -> Result<Self, ModelError> {
        let brokers = (0..count)
            .map(|offset| {
                let port = u16::try_from(offset)
                    .ok()
                    .and_then(|offset| DEFAULT_BROKER_BASE_PORT.checked_add(offset))
                    .ok_or(ModelError::TooManyBrokers { count })?;
                Broker::new(offset + 1, format!("{DEFAULT_BROKER_HOST}:{port}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, version, brokers)
    }

    /// Builds a definition from explicit addresses, numbering brokers from one.
    pub fn with_addresses<I, A>(
        name: impl Into<String>,
        version: impl Into<String>,
        addresses: I,
    ) -> Result<Self, ModelError>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        let brokers = addresses
            .into_iter()
            .zip(1_u32..)
            .map(|(addr, id)| Broker::new(id, addr))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(name, version, brokers)
    }

    /// Cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distribution version.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Brokers in insertion order.
    #[must_use]
    pub fn brokers(&self) -> &[Broker] {
        &self.brokers
    }
}

/// Identity of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKey {
    /// The singleton coordination service.
    Coordination,
    /// One broker of one cluster.
    Broker {
        /// Registry id of the owning cluster.
        cluster_id: i64,
        /// Broker id within the cluster.
        broker_id: u32,
    },
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordination => f.write_str("coordination service"),
            Self::Broker {
                cluster_id,
                broker_id,
            } => write!(f, "broker {broker_id} of cluster #{cluster_id}"),
        }
    }
}

/// A persisted `entity -> process id` record.
///
/// A row says nothing about liveness on its own; callers must probe the
/// recorded pid before trusting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStatus {
    /// Entity the row belongs to.
    pub key: EntityKey,
    /// Raw process id as stored.
    pub pid: i64,
}

impl ProcessStatus {
    /// Builds a row for a freshly spawned process.
    #[must_use]
    pub fn new(key: EntityKey, pid: u32) -> Self {
        Self {
            key,
            pid: i64::from(pid),
        }
    }

    /// Returns the pid when it is a positive integer that fits the OS type.
    #[must_use]
    pub fn process_id(&self) -> Option<u32> {
        if self.pid <= 0 {
            return None;
        }
        u32::try_from(self.pid)
            .ok()
            .filter(|pid| i32::try_from(*pid).is_ok())
    }

    /// Whether the row holds a usable pid.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.process_id().is_some()
    }
}

/// Observed state of an entity after probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// No status row exists.
    Absent,
    /// A row exists but its process is gone or its pid is unusable.
    RecordedDead {
        /// Raw pid recorded in the row.
        pid: i64,
    },
    /// A row exists and the OS reports the process alive.
    Running {
        /// Live process id.
        pid: u32,
    },
}

impl EntityState {
    /// Whether the entity is currently running.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }
}

/// Splits `host:port`, rejecting empty hosts and non-numeric ports.
pub fn split_host_port(addr: &str) -> Result<(&str, u16), ModelError> {
    let invalid = || ModelError::InvalidAddress {
        addr: addr.to_owned(),
    };
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() {
        return Err(invalid());
    }
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host, port))
}

/// Rejects versions that cannot serve as a single path component.
pub fn validate_version(version: &str) -> Result<(), ModelError> {
    if is_plain_segment(version) {
        Ok(())
    } else {
        Err(ModelError::InvalidVersion {
            version: version.to_owned(),
        })
    }
}

fn is_plain_segment(value: &str) -> bool {
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.');
    !value.is_empty() && !value.starts_with('.') && value.chars().all(allowed)
}

/// Errors raised while validating domain values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    /// Cluster names become directory names and must be plain segments.
    #[error("invalid cluster name '{name}': use letters, digits, '-', '_' or '.'")]
    InvalidName {
        /// Rejected name.
        name: String,
    },
    /// Versions become path components and must be plain segments.
    #[error("invalid version '{version}'")]
    InvalidVersion {
        /// Rejected version.
        version: String,
    },
    /// A cluster needs at least one broker.
    #[error("a cluster needs at least one broker")]
    NoBrokers,
    /// Two brokers share an id.
    #[error("broker id {id} appears more than once")]
    DuplicateBrokerId {
        /// Repeated id.
        id: u32,
    },
    /// Default ports would overflow.
    #[error("cannot allocate {count} consecutive broker ports")]
    TooManyBrokers {
        /// Requested broker count.
        count: u32,
    },
    /// An address was not in `host:port` form.
    #[error("invalid listen address '{addr}': expected host:port")]
    InvalidAddress {
        /// Rejected address.
        addr: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn default_brokers_use_consecutive_ports() {
        let cluster = NewCluster::with_default_brokers("dev", "2.8.0", 3).expect("valid");
        let addrs: Vec<_> = cluster
            .brokers()
            .iter()
            .map(|b| (b.id, b.addr.as_str()))
            .collect();
        assert_eq!(
            addrs,
            vec![
                (1, "127.0.0.1:9092"),
                (2, "127.0.0.1:9093"),
                (3, "127.0.0.1:9094"),
            ]
        );
    }

    #[test]
    fn zero_brokers_are_rejected() {
        assert_eq!(
            NewCluster::with_default_brokers("dev", "2.8.0", 0),
            Err(ModelError::NoBrokers)
        );
    }

    #[test]
    fn explicit_addresses_are_numbered_in_order() {
        let cluster =
            NewCluster::with_addresses("dev", "2.8.0", ["localhost:19092", "localhost:19093"])
                .expect("valid");
        assert_eq!(cluster.brokers().len(), 2);
        assert_eq!(cluster.brokers()[1].id, 2);
    }

    #[rstest]
    #[case("")]
    #[case("../etc")]
    #[case(".hidden")]
    #[case("a/b")]
    fn unsafe_names_are_rejected(#[case] name: &str) {
        assert!(matches!(
            NewCluster::with_default_brokers(name, "2.8.0", 1),
            Err(ModelError::InvalidName { .. })
        ));
    }

    #[rstest]
    #[case("localhost", false)]
    #[case(":9092", false)]
    #[case("host:port", false)]
    #[case("10.0.0.1:9092", true)]
    fn addresses_need_host_and_port(#[case] addr: &str, #[case] ok: bool) {
        assert_eq!(Broker::new(1, addr).is_ok(), ok);
    }

    #[rstest]
    #[case(0, None)]
    #[case(-4, None)]
    #[case(4242, Some(4242))]
    #[case(i64::from(u32::MAX), None)]
    fn only_positive_pids_are_valid(#[case] raw: i64, #[case] expected: Option<u32>) {
        let status = ProcessStatus {
            key: EntityKey::Coordination,
            pid: raw,
        };
        assert_eq!(status.process_id(), expected);
    }
}
