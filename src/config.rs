//! Runtime configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides
//! besides `LOG_LEVEL`, which [`crate::init_tracing`] reads directly.
//! Default config path: `/etc/nprpc/nprpc.toml`.

use serde::Deserialize;
use std::path::Path;
use uuid::Uuid;

/// Every field the runtime reads from a `Config` record, per spec.md §6.
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub uuid: Uuid,
    pub hostname: String,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub quic_port: u16,
    pub http_port: u16,
    pub http_ssl_enabled: bool,
    pub http3_enabled: bool,
    pub ssr_enabled: bool,
    pub http_cert_file: Option<String>,
    pub http_key_file: Option<String>,
    pub http_dhparams_file: Option<String>,
    pub quic_cert_file: Option<String>,
    pub quic_key_file: Option<String>,
    pub http_root_dir: Option<String>,
    pub ssr_handler_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_owned(),
            uuid: Uuid::new_v4(),
            hostname: "127.0.0.1".to_owned(),
            tcp_port: 0,
            udp_port: 0,
            quic_port: 0,
            http_port: 0,
            http_ssl_enabled: false,
            http3_enabled: false,
            ssr_enabled: false,
            http_cert_file: None,
            http_key_file: None,
            http_dhparams_file: None,
            quic_cert_file: None,
            quic_key_file: None,
            http_root_dir: None,
            ssr_handler_dir: None,
        }
    }
}

impl Config {
    /// A listen config with every port disabled; callers flip on what
    /// they need and call [`Config::validate`] before starting a
    /// [`crate::runtime::Runtime`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.http_ssl_enabled && (self.http_cert_file.is_none() || self.http_key_file.is_none()) {
            return Err(ConfigError::InvalidValue("http_ssl_enabled requires http_cert_file and http_key_file".to_owned()));
        }
        if self.quic_port != 0 && (self.quic_cert_file.is_none() || self.quic_key_file.is_none()) {
            return Err(ConfigError::InvalidValue("quic_port requires quic_cert_file and quic_key_file".to_owned()));
        }
        if self.http3_enabled && self.quic_port == 0 {
            return Err(ConfigError::InvalidValue("http3_enabled requires a nonzero quic_port".to_owned()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    log_level: Option<String>,
    uuid: Option<Uuid>,
    hostname: Option<String>,
    tcp_port: Option<u16>,
    udp_port: Option<u16>,
    quic_port: Option<u16>,
    http_port: Option<u16>,
    http_ssl_enabled: Option<bool>,
    http3_enabled: Option<bool>,
    ssr_enabled: Option<bool>,
    http_cert_file: Option<String>,
    http_key_file: Option<String>,
    http_dhparams_file: Option<String>,
    quic_cert_file: Option<String>,
    quic_key_file: Option<String>,
    http_root_dir: Option<String>,
    ssr_handler_dir: Option<String>,
}

/// Load config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<Config, ConfigError> {
    let toml_str = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load config from the default path `/etc/nprpc/nprpc.toml`.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from_path(Path::new("/etc/nprpc/nprpc.toml"))
}

/// Load config from a TOML string, filling every field the source left
/// out with [`Config::default`]'s value.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let defaults = Config::default();

    let config = Config {
        log_level: raw.log_level.unwrap_or(defaults.log_level),
        uuid: raw.uuid.unwrap_or(defaults.uuid),
        hostname: raw.hostname.unwrap_or(defaults.hostname),
        tcp_port: raw.tcp_port.unwrap_or(defaults.tcp_port),
        udp_port: raw.udp_port.unwrap_or(defaults.udp_port),
        quic_port: raw.quic_port.unwrap_or(defaults.quic_port),
        http_port: raw.http_port.unwrap_or(defaults.http_port),
        http_ssl_enabled: raw.http_ssl_enabled.unwrap_or(defaults.http_ssl_enabled),
        http3_enabled: raw.http3_enabled.unwrap_or(defaults.http3_enabled),
        ssr_enabled: raw.ssr_enabled.unwrap_or(defaults.ssr_enabled),
        http_cert_file: raw.http_cert_file,
        http_key_file: raw.http_key_file,
        http_dhparams_file: raw.http_dhparams_file,
        quic_cert_file: raw.quic_cert_file,
        quic_key_file: raw.quic_key_file,
        http_root_dir: raw.http_root_dir,
        ssr_handler_dir: raw.ssr_handler_dir,
    };
    config.validate()?;
    Ok(config)
}

#[derive(Debug)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(s) => write!(f, "IO error: {s}"),
            ConfigError::Parse(s) => write!(f, "parse error: {s}"),
            ConfigError::InvalidValue(s) => write!(f, "invalid config value: {s}"),
        }
    }
}

impl std::error::Error for ConfigError {}
