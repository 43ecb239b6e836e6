//! Configuration file parsing for otter-bridge.toml.

use otter_bridge::BridgeConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Limits and behaviour of every VM the CLI creates
    #[serde(default)]
    pub engine: BridgeConfig,

    /// Attribution passed to the send hook
    #[serde(default)]
    pub source: SourceConfig,
}

/// Source metadata assigned to the VM before the entry script runs.
#[derive(Debug, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_addr")]
    pub addr: String,

    #[serde(default)]
    pub id: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            id: 0,
        }
    }
}

fn default_addr() -> String {
    "local".to_string()
}

/// Load configuration from a file or search for default config files.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = path.map(PathBuf::from).or_else(find_config_file);

    match config_path {
        Some(path) if path.exists() => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            config
                .engine
                .validate()
                .map_err(|e| anyhow::anyhow!("Invalid {}: {}", path.display(), e))?;
            Ok(config)
        }
        Some(path) => Err(anyhow::anyhow!("Config file {} not found", path.display())),
        None => Ok(Config::default()),
    }
}

/// Search for configuration file in the current directory and parent directories.
fn find_config_file() -> Option<PathBuf> {
    let cwd = std::env::current_dir().ok()?;
    find_config_in_ancestors(&cwd)
}

fn find_config_in_ancestors(start: &Path) -> Option<PathBuf> {
    const CONFIG_NAMES: &[&str] = &["otter-bridge.toml", ".otter-bridge.toml"];

    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}
