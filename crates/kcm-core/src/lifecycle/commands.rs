//! Command lines for the supervised services.
//!
//! Services are launched straight from the install tree's jars rather than
//! through the distribution's shell wrappers.

use std::ffi::OsString;
use std::path::Path;

use kcm_config::CHILD_PATH;

use crate::artifact::{Distribution, ProvisionError, classpath};
use crate::render::{BrokerFiles, CoordinationFiles};
use crate::supervisor::LaunchSpec;

const KAFKA_MAIN: &str = "kafka.Kafka";
const ZOOKEEPER_MAIN: &str = "org.apache.zookeeper.server.quorum.QuorumPeerMain";

pub(super) fn broker_launch(
    java: &Path,
    install: &Path,
    files: &BrokerFiles,
) -> Result<LaunchSpec, ProvisionError> {
    let mut log4j = OsString::from("-Dlog4j.configuration=file:");
    log4j.push(&files.log4j);
    Ok(LaunchSpec {
        program: java.to_path_buf(),
        args: vec![
            OsString::from("-cp"),
            classpath(install, Distribution::Kafka)?,
            log4j,
            OsString::from(KAFKA_MAIN),
            files.server_properties.clone().into_os_string(),
        ],
        working_dir: install.to_path_buf(),
        env: child_env(),
    })
}

pub(super) fn coordination_launch(
    java: &Path,
    install: &Path,
    files: &CoordinationFiles,
) -> Result<LaunchSpec, ProvisionError> {
    let mut log4j = OsString::from("-Dlog4j.configuration=file://");
    log4j.push(&files.log4j);
    Ok(LaunchSpec {
        program: java.to_path_buf(),
        args: vec![
            OsString::from("-cp"),
            classpath(install, Distribution::ZooKeeper)?,
            log4j,
            OsString::from(ZOOKEEPER_MAIN),
            files.zoo_cfg.clone().into_os_string(),
        ],
        working_dir: install.to_path_buf(),
        env: child_env(),
    })
}

fn child_env() -> Vec<(OsString, OsString)> {
    vec![(OsString::from("PATH"), OsString::from(CHILD_PATH))]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn broker_command_runs_kafka_main_with_rendered_files() {
        let temp = TempDir::new().expect("temp dir");
        let install = temp.path().join("kafka_2.8.0");
        fs::create_dir_all(install.join("libs")).expect("libs");
        fs::write(install.join("libs/kafka.jar"), b"").expect("jar");
        let files = BrokerFiles {
            dir: temp.path().join("dev/broker1"),
            server_properties: temp.path().join("dev/broker1/server.properties"),
            log4j: temp.path().join("dev/broker1/log4j.properties"),
        };

        let spec = broker_launch(Path::new("/usr/bin/java"), &install, &files).expect("spec");

        assert_eq!(spec.program, Path::new("/usr/bin/java"));
        assert_eq!(spec.working_dir, install);
        assert_eq!(spec.args[0], "-cp");
        assert_eq!(spec.args[1], install.join("libs/kafka.jar").into_os_string());
        assert_eq!(
            spec.args[2],
            OsString::from(format!(
                "-Dlog4j.configuration=file:{}",
                files.log4j.display()
            ))
        );
        assert_eq!(spec.args[3], KAFKA_MAIN);
        assert_eq!(spec.args[4], files.server_properties.into_os_string());
        assert_eq!(
            spec.env,
            vec![(OsString::from("PATH"), OsString::from("/usr/bin:/bin"))]
        );
    }

    #[test]
    fn coordination_command_needs_jars() {
        let temp = TempDir::new().expect("temp dir");
        let install = temp.path().join("zookeeper_3.5.5");
        fs::create_dir_all(install.join("lib")).expect("lib");
        let files = CoordinationFiles {
            zoo_cfg: install.join("conf/zoo.cfg"),
            log4j: install.join("conf/log4j.properties"),
        };
        assert!(matches!(
            coordination_launch(Path::new("java"), &install, &files),
            Err(ProvisionError::EmptyClasspath { .. })
        ));
    }
}
