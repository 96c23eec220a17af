//! Configuration file handling

use serde::Deserialize;
use std::path::Path;

use super::paths::{config_path, LOCAL_CONFIG_NAME};
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Script discovery settings
    #[serde(default)]
    pub run: RunConfig,

    /// Watch mode settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Live report server settings
    #[serde(default)]
    pub live: LiveConfig,

    /// Values seeded into the script's `Config` table
    #[serde(default = "empty_table")]
    pub script: serde_json::Value,
}

fn empty_table() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

/// Script discovery settings
#[derive(Debug, Deserialize)]
pub struct RunConfig {
    /// Extension of scenario scripts
    #[serde(default = "default_extension")]
    pub extension: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            extension: default_extension(),
        }
    }
}

fn default_extension() -> String {
    "lua".to_string()
}

/// Watch mode settings
#[derive(Debug, Deserialize)]
pub struct WatchConfig {
    /// Debounce interval for filesystem events
    #[serde(default = "default_debounce")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce(),
        }
    }
}

fn default_debounce() -> u64 {
    200
}

/// Live report server settings
#[derive(Debug, Deserialize)]
pub struct LiveConfig {
    /// Address the event stream listens on
    #[serde(default = "default_addr")]
    pub addr: String,

    /// Events buffered per listener before it is disconnected
    #[serde(default = "default_listener_buffer")]
    pub listener_buffer: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            listener_buffer: default_listener_buffer(),
        }
    }
}

fn default_addr() -> String {
    "127.0.0.1:9876".to_string()
}

fn default_listener_buffer() -> usize {
    256
}

impl Config {
    /// Load configuration for a test directory
    ///
    /// Prefers `tester.toml` inside `dir`, then the user config file, and
    /// returns defaults when neither exists
    pub fn load(dir: &Path) -> Result<Self> {
        let local = dir.join(LOCAL_CONFIG_NAME);
        if local.exists() {
            return Self::from_file(&local);
        }

        if let Some(path) = config_path() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Ok(Self::default())
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::Error::Config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        if !config.script.is_object() {
            return Err(super::Error::ConfigParse(
                "[script] must be a table".to_string(),
            ));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.run.extension, "lua");
        assert_eq!(config.watch.debounce_ms, 200);
        assert_eq!(config.live.addr, "127.0.0.1:9876");
        assert_eq!(config.live.listener_buffer, 256);
        assert_eq!(config.script, serde_json::json!({}));
    }

    #[test]
    fn test_script_section_is_kept_as_table() {
        let config = Config::parse(
            r#"
[watch]
debounce_ms = 50

[script]
base_url = "http://localhost:8080"
retries = 3
"#,
        )
        .unwrap();
        assert_eq!(config.watch.debounce_ms, 50);
        assert_eq!(config.script["base_url"], "http://localhost:8080");
        assert_eq!(config.script["retries"], 3);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::parse("[watch\n"),
            Err(crate::Error::ConfigParse(_))
        ));
    }
}
