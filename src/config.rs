//! Configuration management module.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::DeviceSettings;
use crate::request::ServerInfo;
use crate::session::{ConnectOptions, Credentials, MAX_LOGIN_RETRY_DELAY};

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

/// Timings and limits shared by every device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub connect_timeout_secs: u64,
    pub login_timeout_secs: u64,
    pub login_retry_secs: u64,
    pub poll_interval_ms: u64,
    /// Used when the device does not advertise a keep-alive.
    pub keep_alive_secs: u64,
    /// Used when the device does not advertise a response timeout.
    pub response_timeout_secs: u64,
    pub max_cameras: u16,
    pub pre_video_loss_secs: u64,
    /// IPC socket of a recorder service running on this machine.
    pub local_channel: Option<PathBuf>,
}

/// Directory service for devices addressed by name or MAC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub url: Option<String>,
}

/// Log output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write daily log files here in addition to stderr.
    pub directory: Option<PathBuf>,
}

/// How a device's `address` is to be interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressKind {
    #[default]
    Ip,
    Hostname,
    RegisteredName,
    Mac,
}

impl AddressKind {
    /// Whether the address has to be looked up in the directory first.
    pub fn needs_lookup(self) -> bool {
        matches!(self, AddressKind::RegisteredName | AddressKind::Mac)
    }
}

/// One recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub address_kind: AddressKind,
    #[serde(default = "default_tcp_port")]
    pub tcp_port: u16,
    #[serde(default)]
    pub forwarded_port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_auto_login")]
    pub auto_login: bool,
}

fn default_tcp_port() -> u16 {
    8000
}

fn default_auto_login() -> bool {
    true
}

impl AppConfig {
    /// Get config file path (platform config directory, else next to the executable).
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = ProjectDirs::from("", "", "recorder-link") {
            return dirs.config_dir().join("config.toml");
        }
        std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.client.validate()?;

        if let Some(url) = &self.directory.url
            && !url.starts_with("http")
        {
            return Err(ConfigError::Validation(
                "Directory URL must start with http:// or https://".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::Validation(format!("Duplicate device name: {}", device.name)));
            }
            if device.address_kind.needs_lookup()
                && self.directory.url.is_none()
                && self.client.local_channel.is_none()
            {
                return Err(ConfigError::Validation(format!(
                    "Device {} needs a directory service URL",
                    device.name
                )));
            }
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Runtime settings for one configured device.
    pub fn device_settings(&self, device: &DeviceConfig) -> DeviceSettings {
        let client = &self.client;
        let mut connect = ConnectOptions::new(
            device.name.clone(),
            ServerInfo::new(device.address.clone(), device.tcp_port),
            Credentials::new(device.username.clone(), device.password.clone()),
        );
        connect.forwarded_port = device.forwarded_port;
        connect.auto_login = device.auto_login;
        connect.directory_id = device.address_kind.needs_lookup().then(|| device.address.clone());
        connect.directory_url = self.directory.url.clone();
        connect.local_channel = client.local_channel.clone();
        connect.connect_timeout = Duration::from_secs(client.connect_timeout_secs);
        connect.login_timeout = Duration::from_secs(client.login_timeout_secs);
        connect.login_retry_delay = Duration::from_secs(client.login_retry_secs);
        connect.poll_interval = Duration::from_millis(client.poll_interval_ms);
        connect.default_keep_alive = Duration::from_secs(client.keep_alive_secs);
        connect.default_response_timeout = Duration::from_secs(client.response_timeout_secs);

        let mut settings = DeviceSettings::new(connect);
        settings.max_cameras = client.max_cameras;
        settings.pre_video_loss = Duration::from_secs(client.pre_video_loss_secs);
        settings
    }
}

impl ClientConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "Connect timeout must be at least 1 second".to_string(),
            ));
        }
        if self.login_timeout_secs < 1 {
            return Err(ConfigError::Validation("Login timeout must be at least 1 second".to_string()));
        }
        if self.login_retry_secs > MAX_LOGIN_RETRY_DELAY.as_secs() {
            return Err(ConfigError::Validation(format!(
                "Login retry cannot exceed {} seconds",
                MAX_LOGIN_RETRY_DELAY.as_secs()
            )));
        }
        if self.poll_interval_ms < 100 {
            return Err(ConfigError::Validation("Poll interval must be at least 100 ms".to_string()));
        }
        if self.keep_alive_secs < 1 || self.response_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "Keep-alive and response timeout must be at least 1 second".to_string(),
            ));
        }
        if self.max_cameras == 0 {
            return Err(ConfigError::Validation("Max cameras must be at least 1".to_string()));
        }
        Ok(())
    }
}

impl DeviceConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation("Device name cannot be empty".to_string()));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::Validation(format!("Device {} has no address", self.name)));
        }
        if self.tcp_port == 0 || self.forwarded_port == Some(0) {
            return Err(ConfigError::Validation(format!(
                "Device {} ports must be greater than 0",
                self.name
            )));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Validation(format!("Device {} has no username", self.name)));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            login_timeout_secs: 10,
            login_retry_secs: 10,
            poll_interval_ms: 1000,
            keep_alive_secs: 60,
            response_timeout_secs: 10,
            max_cameras: 64,
            pre_video_loss_secs: 10,
            local_channel: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[client]
poll_interval_ms = 500
max_cameras = 16

[directory]
url = "https://dir.example.net"

[logging]
directory = "/var/log/recorder-link"

[[devices]]
name = "lobby"
address = "192.168.1.20"
forwarded_port = 18000
username = "admin"
password = "secret"

[[devices]]
name = "warehouse"
address = "00:11:22:33:44:55"
address_kind = "mac"
username = "viewer"
auto_login = false
"#;

    fn sample() -> AppConfig {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sample_parses_with_defaults() {
        let config = sample();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.poll_interval_ms, 500);
        assert_eq!(config.client.connect_timeout_secs, 5);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].tcp_port, 8000);
        assert!(config.devices[0].auto_login);
        assert_eq!(config.devices[1].address_kind, AddressKind::Mac);
        assert!(!config.devices[1].auto_login);
    }

    #[test]
    fn test_device_settings_mapping() {
        let config = sample();
        let lobby = config.device_settings(config.device("lobby").unwrap());
        assert_eq!(lobby.connect.server, ServerInfo::new("192.168.1.20", 8000));
        assert_eq!(lobby.connect.forwarded_port, Some(18000));
        assert_eq!(lobby.connect.directory_id, None);
        assert_eq!(lobby.connect.poll_interval, Duration::from_millis(500));
        assert_eq!(lobby.max_cameras, 16);

        let warehouse = config.device_settings(config.device("warehouse").unwrap());
        assert_eq!(warehouse.connect.directory_id.as_deref(), Some("00:11:22:33:44:55"));
        assert_eq!(warehouse.connect.directory_url.as_deref(), Some("https://dir.example.net"));
        assert!(!warehouse.connect.auto_login);
    }

    #[test]
    fn test_validation_duplicate_names() {
        let mut config = sample();
        config.devices[1].name = "lobby".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_lookup_needs_directory() {
        let mut config = sample();
        config.directory.url = None;
        assert!(config.validate().is_err());

        config.client.local_channel = Some(PathBuf::from("/run/recorder.sock"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_invalid_port() {
        let mut config = sample();
        config.devices[0].tcp_port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_invalid_directory_url() {
        let mut config = sample();
        config.directory.url = Some("ftp://invalid".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_timing_bounds() {
        let mut config = AppConfig::default();

        config.client.poll_interval_ms = 10;
        assert!(config.validate().is_err());

        config.client.poll_interval_ms = 1000;
        config.client.login_retry_secs = 3600;
        assert!(config.validate().is_err());

        config.client.login_retry_secs = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!("recorder-link-config-{}.toml", std::process::id()));
        sample().save(&path).unwrap();

        match AppConfig::try_load(&path) {
            ConfigLoadResult::Loaded(config) => {
                assert_eq!(config.devices.len(), 2);
                assert_eq!(config.devices[0].password, "secret");
            }
            other => panic!("expected loaded config, got {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
        assert!(matches!(AppConfig::try_load(&path), ConfigLoadResult::Missing));
    }
}
