//! Worker Configuration
//!
//! Configuration structures for the application service worker.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Worker-specific configuration
    pub worker: WorkerSection,

    /// Ancillary HTTP listener configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Application service notification configuration
    #[serde(default)]
    pub appservice: AppServiceConfig,
}

/// Worker-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSection {
    /// Worker name, used in logs and the status endpoint
    #[serde(default = "default_worker_name")]
    pub name: String,

    /// Replication endpoint on the primary node
    pub replication_url: String,

    /// Data directory for the replica database
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// Ancillary HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP listener
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP listener bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log to file path (optional)
    pub file: Option<PathBuf>,
}

/// Application service notification configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppServiceConfig {
    /// Whether the main process still sends application service
    /// notifications itself. Must be false for this worker to run.
    #[serde(default)]
    pub notify_in_main_process: bool,

    /// Endpoint of the external handler that computes interest and
    /// delivers transactions. Notifications are only logged when unset.
    #[serde(default)]
    pub handler_url: Option<String>,
}

// Default value functions
fn default_worker_name() -> String {
    "appservice".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/appservice-worker")
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "127.0.0.1:9093".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl WorkerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WorkerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.worker.name.is_empty() {
            return Err(crate::Error::Config("worker.name cannot be empty".into()));
        }

        let url = &self.worker.replication_url;
        if url.is_empty() {
            return Err(crate::Error::Config(
                "worker.replication_url cannot be empty".into(),
            ));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(crate::Error::Config(format!(
                "worker.replication_url must be an http(s) URL, got {}",
                url
            )));
        }

        if let Some(handler) = &self.appservice.handler_url {
            if !handler.starts_with("http://") && !handler.starts_with("https://") {
                return Err(crate::Error::Config(format!(
                    "appservice.handler_url must be an http(s) URL, got {}",
                    handler
                )));
            }
        }

        if self.appservice.notify_in_main_process {
            return Err(crate::Error::Config(
                "The appservices must be disabled in the main process before they can \
                 be run in a separate worker. Disable appservice notifications in the \
                 main config and set appservice.notify_in_main_process = false"
                    .into(),
            ));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.worker.data_dir
    }

    /// Get the replica database path
    pub fn replica_db_path(&self) -> PathBuf {
        self.worker.data_dir.join("replica.db")
    }

    /// Render a sample configuration file
    pub fn sample(name: &str, replication_url: &str) -> String {
        format!(
            r#"# Application service worker configuration

[worker]
name = "{name}"
replication_url = "{replication_url}"
data_dir = "/var/lib/appservice-worker"

[api]
enabled = true
bind_address = "{api}"

[logging]
level = "info"
format = "pretty"

[appservice]
notify_in_main_process = false
# handler_url = "http://127.0.0.1:8008/_worker/appservice/notify"
"#,
            name = name,
            replication_url = replication_url,
            api = default_api_address(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[worker]
name = "appservice1"
replication_url = "http://127.0.0.1:9092/_synapse/replication"
data_dir = "/tmp/appservice"

[api]
bind_address = "0.0.0.0:9100"

[appservice]
handler_url = "http://127.0.0.1:8008/notify"
"#;

        let config = WorkerConfig::from_str(toml).unwrap();
        assert_eq!(config.worker.name, "appservice1");
        assert_eq!(config.api.bind_address, "0.0.0.0:9100");
        assert!(config.api.enabled);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.replica_db_path(), PathBuf::from("/tmp/appservice/replica.db"));
        assert!(!config.appservice.notify_in_main_process);
    }

    #[test]
    fn test_rejects_main_process_notifications() {
        let toml = r#"
[worker]
replication_url = "http://primary:9092/_synapse/replication"

[appservice]
notify_in_main_process = true
"#;

        let err = WorkerConfig::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("must be disabled in the main process"));
    }

    #[test]
    fn test_rejects_non_http_replication_url() {
        let toml = r#"
[worker]
replication_url = "primary:9092"
"#;
        assert!(WorkerConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = WorkerConfig::sample("appservice", "http://localhost:9092/replication");
        let config = WorkerConfig::from_str(&sample).unwrap();
        assert_eq!(config.worker.replication_url, "http://localhost:9092/replication");
        assert!(config.appservice.handler_url.is_none());
    }
}
