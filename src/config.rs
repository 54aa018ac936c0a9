//! # Farm host configuration
//!
//! A single TOML file describes the HTTP server, session timing, the virtual
//! printer simulator, storage locations and the printers to bring up at
//! startup. Every field has a default, so an empty file is a valid config.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [server]
//! bind = "0.0.0.0:5000"
//! log_level = "info"
//!
//! [session]
//! submit_timeout_ms = 5000
//! liveness_timeout_ms = 5000
//!
//! [[printers]]
//! kind = "physical"
//! host = "192.168.10.14"
//!
//! [[printers]]
//! kind = "virtual"
//! name = "V1"
//! status = "idle"
//! ```

// src/config.rs - Single configuration file
use crate::printer::PrinterDescriptor;
use crate::transport::VirtualPrinterConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the farm host.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub virtual_printer: VirtualPrinterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Printers registered at startup, in order.
    #[serde(default)]
    pub printers: Vec<PrinterDescriptor>,
}

/// HTTP server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            log_level: default_log_level(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("server.bind '{}': {}", self.bind, e)))
    }

    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("server.log_level '{}'", self.log_level)))
    }
}

/// Per-printer session timing and queueing.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SessionConfig {
    #[serde(default = "default_submit_timeout_ms")]
    pub submit_timeout_ms: u64,
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Commands allowed to wait per printer before callers get `Busy`.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Operator console entries kept per printer.
    #[serde(default = "default_console_history")]
    pub console_history: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            submit_timeout_ms: default_submit_timeout_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            queue_depth: default_queue_depth(),
            console_history: default_console_history(),
        }
    }
}

impl SessionConfig {
    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn liveness_timeout(&self) -> Duration {
        Duration::from_millis(self.liveness_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Where the catalog and uploaded G-code live.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// JSON file for tasks, projects and coils; in-memory only when absent.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    #[serde(default = "default_uploads_dir")]
    pub uploads_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            catalog_path: None,
            uploads_dir: default_uploads_dir(),
        }
    }
}

impl Config {
    /// Checks values serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind_addr()?;
        self.server.level()?;
        let session = &self.session;
        if session.submit_timeout_ms == 0 || session.liveness_timeout_ms == 0 || session.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("session timeouts and poll interval must be non-zero".to_string()));
        }
        if session.queue_depth == 0 {
            return Err(ConfigError::Invalid("session.queue_depth must be at least 1".to_string()));
        }
        let sim = &self.virtual_printer;
        if sim.heat_rate < 0.0 || sim.cool_rate < 0.0 || sim.print_rate < 0.0 || sim.thermal_noise < 0.0 {
            return Err(ConfigError::Invalid("virtual_printer rates must not be negative".to_string()));
        }
        Ok(())
    }
}

fn default_bind() -> String { "0.0.0.0:5000".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_submit_timeout_ms() -> u64 { 5000 }
fn default_liveness_timeout_ms() -> u64 { 5000 }
fn default_poll_interval_ms() -> u64 { 1000 }
fn default_queue_depth() -> usize { 16 }
fn default_console_history() -> usize { 100 }
fn default_uploads_dir() -> PathBuf { PathBuf::from("uploads") }

/// Loads and validates a configuration file.
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    let config: Config = match toml::from_str(&contents) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to parse config TOML: {}", e);
            return Err(ConfigError::Toml(e));
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::PrinterStatus;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.server.bind, "0.0.0.0:5000");
        assert_eq!(config.session.submit_timeout(), Duration::from_secs(5));
        assert_eq!(config.session.liveness_timeout(), Duration::from_secs(5));
        assert_eq!(config.session.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.session.queue_depth, 16);
        assert_eq!(config.virtual_printer.latency_ms, 50);
        assert!(config.storage.catalog_path.is_none());
        assert!(config.printers.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_success() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("farm.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(
            file,
            "[session]\nsubmit_timeout_ms = 250\n\n[[printers]]\nkind = 'virtual'\nname = 'V1'\nstatus = 'service'\n\n[[printers]]\nkind = 'physical'\nhost = '192.168.10.14'"
        )
        .unwrap();
        file.flush().unwrap();
        let config = load_config(file_path.to_str().unwrap()).unwrap();
        assert_eq!(config.session.submit_timeout_ms, 250);
        // Defaults for missing fields
        assert_eq!(config.session.liveness_timeout_ms, 5000);
        assert_eq!(config.printers.len(), 2);
        assert_eq!(config.printers[0], PrinterDescriptor::virtual_printer("V1", PrinterStatus::Service));
        assert_eq!(config.printers[1], PrinterDescriptor::physical("192.168.10.14", 7125));
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config("nonexistent_file.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_toml() {
        let dir = tempdir().unwrap();
        let file_path = dir.path().join("bad.toml");
        let mut file = File::create(&file_path).unwrap();
        writeln!(file, "not a valid toml").unwrap();
        file.flush().unwrap();
        let result = load_config(file_path.to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let config: Config = toml::from_str("[session]\nqueue_depth = 0").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_bind_and_level_rejected() {
        let config: Config = toml::from_str("[server]\nbind = 'nowhere'").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
        let config: Config = toml::from_str("[server]\nlog_level = 'chatty'").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_simulator_section_parsing() {
        let toml = r#"
        [virtual_printer]
        latency_ms = 5
        build_volume = { x = 300.0, y = 300.0, z = 400.0 }
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.virtual_printer.latency_ms, 5);
        assert_eq!(config.virtual_printer.build_volume.z, 400.0);
        assert_eq!(config.virtual_printer.heat_rate, 3.0);
    }
}
