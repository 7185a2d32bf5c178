//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub ipfs: IpfsConfig,
    #[serde(default)]
    pub transfer: TransferConfig,
    #[serde(default)]
    pub startup: StartupConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Keep requesting work until a report is not `Success`
    #[serde(default)]
    pub turbo_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Base URL, `/Request` and `/Response` are appended
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for each request/report exchange in seconds
    #[serde(default = "default_coordinator_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpfsConfig {
    /// Explicit path to the ipfs executable (skips the search path)
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Colon separated directories searched for `ipfs`
    #[serde(default = "default_search_path")]
    pub search_path: String,

    /// Directory whose volume is reported as available space
    #[serde(default)]
    pub data_path: Option<PathBuf>,

    /// Timeout for short daemon queries (id, diag, peers, stat, ls, pin rm)
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Upper bound for a whole download+add, and for `pin add`
    #[serde(default = "default_transfer_timeout")]
    pub timeout_secs: u64,

    /// Bytes forwarded to the daemon per write
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunks buffered between the HTTP reader and the daemon writer
    #[serde(default = "default_channel_depth")]
    pub channel_depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_jitter_min")]
    pub jitter_min_secs: u64,

    #[serde(default = "default_jitter_max")]
    pub jitter_max_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Defaults
fn default_base_url() -> String { "https://IPFSPodcasting.net".to_string() }
fn default_coordinator_timeout() -> u64 { 120 }
fn default_search_path() -> String {
    let mut path = "/usr/local/bin:/usr/bin:/bin".to_string();
    if let Ok(home) = std::env::var("HOME") {
        path.push(':');
        path.push_str(&home);
        path.push_str("/bin");
    }
    path
}
fn default_command_timeout() -> u64 { 60 }
fn default_transfer_timeout() -> u64 { 6500 } // 1h48m
fn default_chunk_size() -> usize { 256 * 1024 }
fn default_channel_depth() -> usize { 4 }
fn default_jitter_min() -> u64 { 1 }
fn default_jitter_max() -> u64 { 150 }

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_coordinator_timeout(),
        }
    }
}

impl Default for IpfsConfig {
    fn default() -> Self {
        Self {
            binary: None,
            search_path: default_search_path(),
            data_path: None,
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_transfer_timeout(),
            chunk_size: default_chunk_size(),
            channel_depth: default_channel_depth(),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            jitter_min_secs: default_jitter_min(),
            jitter_max_secs: default_jitter_max(),
        }
    }
}

impl CoordinatorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl IpfsConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Directory used for the free space report: configured path, then
    /// `$IPFS_PATH`, then `$HOME`, then `/`.
    pub fn resolved_data_path(&self) -> PathBuf {
        if let Some(path) = &self.data_path {
            return path.clone();
        }
        std::env::var_os("IPFS_PATH")
            .or_else(|| std::env::var_os("HOME"))
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"))
    }
}

impl TransferConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the loaded configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl Config {
    /// Load from a TOML file, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> Result<(Self, ConfigSource), ConfigError> {
        if !path.exists() {
            return Ok((Self::default(), ConfigSource::Defaults));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        Ok((config, ConfigSource::File(path.to_path_buf())))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.coordinator.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("coordinator.base_url is empty".to_string()));
        }
        if self.startup.jitter_min_secs > self.startup.jitter_max_secs {
            return Err(ConfigError::Invalid(format!(
                "startup.jitter_min_secs ({}) exceeds jitter_max_secs ({})",
                self.startup.jitter_min_secs, self.startup.jitter_max_secs
            )));
        }
        if self.transfer.chunk_size == 0 {
            return Err(ConfigError::Invalid("transfer.chunk_size must be positive".to_string()));
        }
        if self.transfer.channel_depth == 0 {
            return Err(ConfigError::Invalid(
                "transfer.channel_depth must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.coordinator.base_url, "https://IPFSPodcasting.net");
        assert_eq!(config.coordinator.timeout(), Duration::from_secs(120));
        assert_eq!(config.transfer.chunk_size, 262_144);
        assert_eq!(config.startup.jitter_min_secs, 1);
        assert_eq!(config.startup.jitter_max_secs, 150);
        assert!(!config.node.turbo_mode);
        assert!(config.ipfs.search_path.starts_with("/usr/local/bin:/usr/bin:/bin"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let (config, source) = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(source, ConfigSource::Defaults);
        assert_eq!(config.transfer.timeout_secs, 6500);
    }

    #[test]
    fn test_partial_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[node]\nturbo_mode = true\n\n[startup]\njitter_max_secs = 10").unwrap();

        let (config, source) = Config::load(&path).unwrap();
        assert_eq!(source, ConfigSource::File(path.clone()));
        assert!(config.node.turbo_mode);
        assert_eq!(config.startup.jitter_max_secs, 10);
        assert_eq!(config.startup.jitter_min_secs, 1);
        assert_eq!(config.coordinator.timeout_secs, 120);
    }

    #[test]
    fn test_unparseable_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "[transfer\nchunk_size = ").unwrap();

        assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects_inverted_jitter() {
        let mut config = Config::default();
        config.startup.jitter_min_secs = 200;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.transfer.chunk_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_data_path_wins() {
        let mut config = IpfsConfig::default();
        config.data_path = Some(PathBuf::from("/srv/ipfs"));
        assert_eq!(config.resolved_data_path(), PathBuf::from("/srv/ipfs"));
    }
}
