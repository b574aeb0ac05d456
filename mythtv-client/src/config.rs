//! Configuration loading for the MythTV client.
//!
//! Configuration is read from a TOML file. Searched in the following order:
//! 1. An explicitly given path
//! 2. `mythtv-live.toml` in the current directory
//! 3. Environment variables (`MYTHTV_*`)
//! 4. Default values

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

use mythtv_protocol::{
    normalize_maps, reconcile_maps, EventMode, StorageGroupDir, StorageGroupMap, DEFAULT_PORT,
};

use crate::client::events::DEFAULT_STOP_GRACE;
use crate::client::ConnectionConfig;
use crate::error::ClientError;
use crate::manager::ManagerConfig;

/// Config file looked up in the current directory.
pub const CONFIG_FILE_NAME: &str = "mythtv-live.toml";

/// Backend connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub host: String,
    pub port: u16,
    pub client_name: String,
    pub connect_timeout_ms: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            client_name: "mythtv-live".to_string(),
            connect_timeout_ms: 5000,
        }
    }
}

/// Live TV session settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LiveTvSection {
    pub event_mode: EventMode,
    pub poll_interval_ms: u64,
    /// Unbounded when absent.
    pub poll_timeout_ms: Option<u64>,
    /// Time the event listener gets to drain when stopped.
    pub stop_grace_ms: u64,
}

impl Default for LiveTvSection {
    fn default() -> Self {
        Self {
            event_mode: EventMode::ExcludeSystem,
            poll_interval_ms: 500,
            poll_timeout_ms: None,
            stop_grace_ms: DEFAULT_STOP_GRACE.as_millis() as u64,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub backend: BackendSection,
    pub live_tv: LiveTvSection,
    pub storage_group_maps: Vec<StorageGroupMap>,
    /// Storage group directories the backend reports, as listed by
    /// `mythtv-setup`. When present the maps are reconciled against them.
    pub storage_group_dirs: Vec<StorageGroupDir>,
}

impl ClientConfig {
    /// Load configuration from `path`, the default file, or the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ClientError> {
        let path = path.map(Path::to_path_buf).or_else(find_config_file);

        let config = match path {
            Some(path) => {
                info!("Loading configuration from {:?}", path);
                let content = fs::read_to_string(&path).map_err(|e| {
                    ClientError::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml_str(&content)?
            }
            None => Self::from_env(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ClientError> {
        let mut config: ClientConfig = toml::from_str(content)
            .map_err(|e| ClientError::Config(format!("Failed to parse config: {}", e)))?;
        normalize_maps(&mut config.storage_group_maps);
        if !config.storage_group_dirs.is_empty() {
            let dirs = std::mem::take(&mut config.storage_group_dirs);
            config.reconcile_storage_groups(&dirs);
            config.storage_group_dirs = dirs;
        }
        Ok(config)
    }

    /// Bring the storage group maps in line with the backend's groups.
    ///
    /// Maps for vanished groups are dropped and new groups map onto their
    /// backend directory until an override is configured.
    pub fn reconcile_storage_groups(&mut self, dirs: &[StorageGroupDir]) {
        let configured = std::mem::take(&mut self.storage_group_maps);
        self.storage_group_maps = reconcile_maps(configured, dirs);
        debug!(
            "{} storage group map(s) after reconciling with {} backend group(s)",
            self.storage_group_maps.len(),
            dirs.len()
        );
    }

    /// Build a configuration from `MYTHTV_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = ClientConfig::default();

        if let Ok(host) = std::env::var("MYTHTV_HOST") {
            config.backend.host = host;
        }
        if let Some(port) = env_parse("MYTHTV_PORT") {
            config.backend.port = port;
        }
        if let Ok(name) = std::env::var("MYTHTV_CLIENT_NAME") {
            config.backend.client_name = name;
        }
        if let Some(ms) = env_parse("MYTHTV_CONNECT_TIMEOUT") {
            config.backend.connect_timeout_ms = ms;
        }
        if let Some(ms) = env_parse("MYTHTV_POLL_INTERVAL") {
            config.live_tv.poll_interval_ms = ms;
        }
        if let Some(ms) = env_parse("MYTHTV_POLL_TIMEOUT") {
            config.live_tv.poll_timeout_ms = Some(ms);
        }

        debug!(
            "Using environment/default config: backend={}:{}",
            config.backend.host, config.backend.port
        );
        config
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.backend.host.trim().is_empty() {
            return Err(ClientError::Config("backend host is empty".to_string()));
        }
        if self.backend.client_name.contains(' ') {
            return Err(ClientError::Config(format!(
                "client name {:?} must not contain spaces",
                self.backend.client_name
            )));
        }
        Ok(())
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            host: self.backend.host.clone(),
            port: self.backend.port,
            client_name: self.backend.client_name.clone(),
            connect_timeout: Duration::from_millis(self.backend.connect_timeout_ms),
        }
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            connection: self.connection_config(),
            event_mode: self.live_tv.event_mode,
            poll_interval: Duration::from_millis(self.live_tv.poll_interval_ms),
            poll_timeout: self.live_tv.poll_timeout_ms.map(Duration::from_millis),
            stop_grace: Duration::from_millis(self.live_tv.stop_grace_ms),
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    let path = std::env::current_dir().ok()?.join(CONFIG_FILE_NAME);
    path.exists().then_some(path)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
