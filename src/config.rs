//! Configuration management for RAX DAV Server
//!
//! Separates the network front-end settings from the storage core settings.
//! The core settings are handed explicitly to each component constructor;
//! nothing reads configuration from global state.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Placeholder substituted with the user identifier in `storage_path_template`.
pub const USER_PLACEHOLDER: &str = "%s";

const MIN_SECRET_KEY_LEN: usize = 16;

/// Complete server configuration
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub core: CoreConfig,

    /// Accounts created at startup when missing (`[[users]]` tables)
    pub users: Vec<ProvisionedUser>,
}

/// Account provisioned from the configuration file
#[derive(Debug, Deserialize, Clone)]
pub struct ProvisionedUser {
    pub id: String,
    pub password: String,

    /// Overrides `default_quota_bytes` for this account
    #[serde(default)]
    pub quota_bytes: Option<u64>,
}

/// Listener settings for the control protocol front end (restart required)
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    /// IP address to bind the control listener
    pub bind_address: String,

    /// Port for the control listener
    pub port: u16,

    /// Maximum concurrent clients
    pub max_clients: usize,

    /// Maximum control line length in bytes
    pub max_command_length: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 7070,
            max_clients: 64,
            max_command_length: 4096,
        }
    }
}

/// Settings consumed by the storage core
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CoreConfig {
    /// Base URL used to build absolute resource links
    pub root_url: String,

    /// Per-user storage root, `%s` is replaced with the user identifier
    pub storage_path_template: String,

    /// SQLite file holding user, session and entry metadata
    pub database_file: PathBuf,

    /// Emit a thumbnail request after each successful image write
    pub enable_thumbnails: bool,

    /// Quota given to newly provisioned users, 0 means unlimited
    pub default_quota_bytes: u64,

    /// Refuse iOS clients at connection time
    pub block_ios_clients: bool,

    pub session_timeout_secs: u64,

    /// Period of the expired-session sweep, 0 disables it
    pub session_sweep_interval_secs: u64,

    /// Key used to sign new session tokens
    pub secret_key: String,

    /// Rotated-out keys still accepted when verifying tokens (TOML only)
    pub previous_secret_keys: Vec<String>,

    /// Largest accepted single upload, 0 means no cap beyond quota
    pub max_upload_bytes: u64,

    /// PBKDF2 iteration count for stored credentials
    pub password_hash_iterations: u32,

    /// Send error details to clients; otherwise only `<code> <kind>`
    pub errors_show: bool,

    /// Append log output to this file instead of stderr
    pub errors_log: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            root_url: "http://localhost:8080/".to_string(),
            storage_path_template: "data/storage/%s".to_string(),
            database_file: PathBuf::from("data/db.sqlite"),
            enable_thumbnails: true,
            default_quota_bytes: 0,
            block_ios_clients: true,
            session_timeout_secs: 60 * 60 * 24 * 7,
            session_sweep_interval_secs: 60 * 60,
            secret_key: String::new(),
            previous_secret_keys: Vec::new(),
            max_upload_bytes: 0,
            password_hash_iterations: 100_000,
            errors_show: false,
            errors_log: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from config.toml with environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from the given file (extension optional).
    ///
    /// Environment variables such as `RAX_DAV_CORE__SECRET_KEY` override file values.
    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("RAX_DAV").separator("__"))
            .build()?;

        let mut config: ServerConfig = settings.try_deserialize()?;
        config.core.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.port == 0 {
            return Err(ConfigError::Message("port cannot be 0".into()));
        }

        if self.network.max_clients == 0 {
            return Err(ConfigError::Message(
                "max_clients must be greater than 0".into(),
            ));
        }

        if self.network.max_command_length < 64 {
            return Err(ConfigError::Message(
                "max_command_length must be at least 64".into(),
            ));
        }

        self.core.validate()
    }

    /// Get bind address and port as socket address
    pub fn control_socket(&self) -> String {
        format!("{}:{}", self.network.bind_address, self.network.port)
    }
}

impl CoreConfig {
    /// Ensures `root_url` ends with a slash so links can be appended.
    pub fn normalize(&mut self) {
        if !self.root_url.ends_with('/') {
            self.root_url.push('/');
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.root_url.starts_with("http://") || self.root_url.starts_with("https://")) {
            return Err(ConfigError::Message(
                "root_url must start with http:// or https://".into(),
            ));
        }

        if self.storage_path_template.matches(USER_PLACEHOLDER).count() != 1 {
            return Err(ConfigError::Message(
                "storage_path_template must contain exactly one %s placeholder".into(),
            ));
        }

        if self.database_file.as_os_str().is_empty() {
            return Err(ConfigError::Message("database_file cannot be empty".into()));
        }

        if self.session_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "session_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.secret_key.len() < MIN_SECRET_KEY_LEN {
            return Err(ConfigError::Message(format!(
                "secret_key must be at least {MIN_SECRET_KEY_LEN} bytes"
            )));
        }

        if self.password_hash_iterations == 0 {
            return Err(ConfigError::Message(
                "password_hash_iterations must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Session lifetime as a chrono duration
    pub fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.session_timeout_secs).unwrap_or(i64::MAX))
    }

    /// Sweep period, `None` when disabled
    pub fn session_sweep_interval(&self) -> Option<std::time::Duration> {
        (self.session_sweep_interval_secs > 0)
            .then(|| std::time::Duration::from_secs(self.session_sweep_interval_secs))
    }
}
