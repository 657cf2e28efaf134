use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelaySettings {
    /// WebSocket endpoint of the controller process.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Deadline for replies to the relay's own outbound requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline for a permission decision; denied when it elapses.
    #[serde(default = "default_confirm_timeout_ms")]
    pub confirm_timeout_ms: u64,
}

fn default_endpoint() -> String {
    "ws://127.0.0.1:8765".to_string()
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_confirm_timeout_ms() -> u64 {
    30_000
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
            confirm_timeout_ms: default_confirm_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSettings {
    /// DevTools WebSocket URL of the tab this relay drives.
    #[serde(default = "default_cdp_url")]
    pub cdp_url: String,
    /// Deadline for individual DevTools commands.
    #[serde(default = "default_cdp_timeout_ms")]
    pub cdp_timeout_ms: u64,
}

fn default_cdp_url() -> String {
    "ws://127.0.0.1:9222/devtools/page/main".to_string()
}

fn default_cdp_timeout_ms() -> u64 {
    30_000
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            cdp_url: default_cdp_url(),
            cdp_timeout_ms: default_cdp_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub relay: RelaySettings,
    #[serde(default)]
    pub browser: BrowserSettings,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.relay.endpoint, "ws://127.0.0.1:8765");
        assert_eq!(config.relay.request_timeout_ms, 60_000);
        assert_eq!(config.relay.confirm_timeout_ms, 30_000);
        assert_eq!(config.browser.cdp_timeout_ms, 30_000);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"relay": {"endpoint": "ws://10.0.0.2:9000"}}"#).unwrap();
        assert_eq!(config.relay.endpoint, "ws://10.0.0.2:9000");
        assert_eq!(config.relay.confirm_timeout_ms, 30_000);
        assert_eq!(config.browser.cdp_url, "ws://127.0.0.1:9222/devtools/page/main");
    }

    #[test]
    fn test_camel_case_keys() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("requestTimeoutMs"));
        assert!(json.contains("cdpUrl"));
    }
}
