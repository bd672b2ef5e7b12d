//! Shared configuration for the kcm cluster manager.
//!
//! Configuration is layered with `ortho_config` so defaults, configuration
//! files, `KCM_*` environment variables, and command-line flags merge in that
//! order. The resulting [`Config`] is passed explicitly into every component
//! that needs it; nothing reads ambient global state after loading.

mod defaults;
mod layout;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};
use url::Url;

pub use defaults::{
    APP_DIR_NAME, DEFAULT_ARCHIVE_URL, DEFAULT_LOG_FILTER, DEFAULT_MIRROR_URL,
    DEFAULT_STOP_TIMEOUT_SECS, DEFAULT_ZK_ADDR, DEFAULT_ZOOKEEPER_VERSION, default_archive_url,
    default_log_filter, default_log_format, default_mirror_url, default_stop_timeout_secs,
};
pub use layout::{Layout, LayoutError};
pub use logging::{LogFormat, LogFormatParseError};

use defaults::{
    default_log_filter_string, default_zk_addr_string, default_zookeeper_version_string,
};

/// `PATH` handed to spawned services and used to resolve a bare `java`.
pub const CHILD_PATH: &str = "/usr/bin:/bin";

/// Runtime configuration for every kcm command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "KCM")]
pub struct Config {
    /// Root directory for the database, install trees, and instance data.
    #[serde(default)]
    pub data_dir: Option<Utf8PathBuf>,
    /// Root directory for downloaded distribution archives.
    #[serde(default)]
    pub cache_dir: Option<Utf8PathBuf>,
    /// Java installation used to launch services.
    #[serde(default)]
    pub java_home: Option<Utf8PathBuf>,
    /// Address the coordination service listens on.
    #[ortho_config(default = default_zk_addr_string())]
    #[serde(default = "default_zk_addr_string")]
    pub zk_addr: String,
    /// Coordination service distribution version.
    #[ortho_config(default = default_zookeeper_version_string())]
    #[serde(default = "default_zookeeper_version_string")]
    pub zookeeper_version: String,
    /// Mirror resolver queried first for archives.
    #[ortho_config(default = default_mirror_url())]
    #[serde(default = "default_mirror_url")]
    pub mirror_url: Url,
    /// Canonical archive consulted when the mirror lacks an artefact.
    #[ortho_config(default = default_archive_url())]
    #[serde(default = "default_archive_url")]
    pub archive_url: Url,
    /// Overall deadline for one stop command, in seconds.
    #[ortho_config(default = default_stop_timeout_secs())]
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Tracing filter expression applied to diagnostics.
    #[ortho_config(default = default_log_filter_string())]
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Output format for diagnostics.
    #[ortho_config(default = default_log_format())]
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            cache_dir: None,
            java_home: None,
            zk_addr: default_zk_addr_string(),
            zookeeper_version: default_zookeeper_version_string(),
            mirror_url: default_mirror_url(),
            archive_url: default_archive_url(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Returns the tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        self.log_filter.as_str()
    }

    /// Returns the configured diagnostics format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Returns the coordination service address.
    #[must_use]
    pub fn zk_addr(&self) -> &str {
        self.zk_addr.as_str()
    }

    /// Returns the coordination service version.
    #[must_use]
    pub fn zookeeper_version(&self) -> &str {
        self.zookeeper_version.as_str()
    }

    /// Returns the overall deadline of one stop command.
    #[must_use]
    pub const fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Resolves the Java launcher, either under `java_home` or by bare name.
    #[must_use]
    pub fn java_binary(&self) -> PathBuf {
        self.java_home.as_ref().map_or_else(
            || PathBuf::from("java"),
            |home| home.as_std_path().join("bin").join("java"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.zk_addr(), DEFAULT_ZK_ADDR);
        assert_eq!(config.zookeeper_version(), "3.5.5");
        assert_eq!(config.stop_timeout(), Duration::from_secs(60));
        assert_eq!(config.log_filter(), "warn");
        assert_eq!(config.log_format(), LogFormat::Compact);
    }

    #[rstest]
    #[case(None, "java")]
    #[case(Some("/opt/jdk"), "/opt/jdk/bin/java")]
    fn java_binary_respects_java_home(#[case] home: Option<&str>, #[case] expected: &str) {
        let config = Config {
            java_home: home.map(Utf8PathBuf::from),
            ..Config::default()
        };
        assert_eq!(config.java_binary(), PathBuf::from(expected));
    }

    #[rstest]
    #[case("json", LogFormat::Json)]
    #[case("COMPACT", LogFormat::Compact)]
    fn log_format_parses_case_insensitively(#[case] raw: &str, #[case] expected: LogFormat) {
        let parsed: LogFormat = raw.parse().expect("format should parse");
        assert_eq!(parsed, expected);
    }
}
