//! YAML configuration shared by the transmitter, the nodes and the admin server.
//!
//! Path comes from `FLOTILLA_CONFIG` (default `flotilla.yaml`). A missing or
//! unreadable file is not fatal: every process falls back to the defaults
//! below and says so in the log.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "FLOTILLA_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "flotilla.yaml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Name reported by `/status`. Host name when absent.
    pub ship_name: Option<String>,
    pub broadcast: BroadcastConf,
    pub node: NodeConf,
    pub admin: AdminConf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConf {
    pub port: u16,
    /// Candidate destinations, each tried independently for every event.
    pub addresses: Vec<String>,
    pub poll_interval_ms: u64,
    /// Substring used to pick the control surface among MIDI inputs.
    pub device_hint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConf {
    /// Knob that sets the blink interval (value 0 disables blinking).
    pub blink_controller: u8,
    /// Pad that switches the video on and off.
    pub master_note: u8,
    pub default_interval_ms: u32,
    pub randomize_every_secs: u64,
    pub refresh_hz: u32,
    /// Start playback at a random offset to desynchronise nodes.
    pub random_start: bool,
    /// Value for `DISPLAY` when the environment does not set one.
    pub display_env: String,
    pub framebuffer: String,
    pub background: [u8; 3],
    /// Consecutive failed reads after a rewind before the decoder backs off.
    pub restart_attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConf {
    pub port: u16,
    pub power_delay_secs: u64,
    pub execute: ExecuteConf,
}

/// Gate for the `execute` command. The defaults keep unrestricted execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteConf {
    pub enabled: bool,
    /// Program names allowed as the first word of a command. Empty = any.
    pub allow_list: Vec<String>,
    pub timeout_secs: Option<u64>,
}

impl Default for BroadcastConf {
    fn default() -> Self {
        Self {
            port: 8081,
            addresses: vec![
                "255.255.255.255".into(),
                "192.168.1.255".into(),
                "192.168.0.255".into(),
            ],
            poll_interval_ms: 1,
            device_hint: "LPD8".into(),
        }
    }
}

impl Default for NodeConf {
    fn default() -> Self {
        Self {
            blink_controller: 70,
            master_note: 36,
            default_interval_ms: 500,
            randomize_every_secs: 10,
            refresh_hz: 60,
            random_start: true,
            display_env: ":0".into(),
            framebuffer: "/dev/fb0".into(),
            background: [0, 0, 0],
            restart_attempts: 5,
        }
    }
}

impl Default for AdminConf {
    fn default() -> Self {
        Self {
            port: 8081,
            power_delay_secs: 5,
            execute: ExecuteConf::default(),
        }
    }
}

impl Default for ExecuteConf {
    fn default() -> Self {
        Self { enabled: true, allow_list: Vec::new(), timeout_secs: None }
    }
}

impl FleetConfig {
    pub fn from_yaml(txt: &str) -> Result<Self, ConfigError> {
        if txt.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(txt)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let txt = std::fs::read_to_string(path)?;
        Self::from_yaml(&txt)
    }

    /// Load `.env`, then the YAML file named by `FLOTILLA_CONFIG`.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let path = Path::new(&path);
        if !path.exists() {
            info!("no {} found, using default configuration", path.display());
            return Self::default();
        }
        match Self::from_file(path) {
            Ok(cfg) => {
                info!("configuration loaded from {}", path.display());
                cfg
            }
            Err(e) => {
                warn!("invalid configuration {}: {e}, using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn resolved_ship_name(&self) -> String {
        match &self.ship_name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => gethostname::gethostname().to_string_lossy().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = FleetConfig::default();
        assert_eq!(cfg.broadcast.port, 8081);
        assert_eq!(cfg.broadcast.addresses.len(), 3);
        assert_eq!(cfg.node.blink_controller, 70);
        assert_eq!(cfg.node.default_interval_ms, 500);
        assert_eq!(cfg.admin.power_delay_secs, 5);
        assert!(cfg.admin.execute.enabled);
        assert!(cfg.admin.execute.timeout_secs.is_none());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let cfg = FleetConfig::from_yaml(
            "ship_name: stern\nnode:\n  master_note: 40\nadmin:\n  execute:\n    allow_list: [uptime]\n",
        )
        .unwrap();
        assert_eq!(cfg.resolved_ship_name(), "stern");
        assert_eq!(cfg.node.master_note, 40);
        assert_eq!(cfg.node.blink_controller, 70);
        assert_eq!(cfg.admin.execute.allow_list, vec!["uptime".to_string()]);
        assert!(cfg.admin.execute.enabled);
    }

    #[test]
    fn test_empty_file_is_default() {
        let cfg = FleetConfig::from_yaml("  \n").unwrap();
        assert_eq!(cfg.broadcast.device_hint, "LPD8");
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "broadcast: [not, a, map").unwrap();
        assert!(matches!(FleetConfig::from_file(file.path()), Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_blank_ship_name_falls_back_to_hostname() {
        let cfg = FleetConfig { ship_name: Some("  ".into()), ..Default::default() };
        assert_ne!(cfg.resolved_ship_name(), "  ");
    }
}
