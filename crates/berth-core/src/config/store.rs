//! Config store for loading and saving berth.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::ManagerConfig;

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// Store at the platform config location (`<config_dir>/berth/berth.toml`).
    pub fn from_default_location() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("berth");
        Ok(Self::from_path(config_dir.join("berth.toml")))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, falling back to defaults when the file is absent.
    pub fn load(&self) -> anyhow::Result<ManagerConfig> {
        if !self.config_path.exists() {
            return Ok(ManagerConfig::default());
        }
        let content = std::fs::read_to_string(&self.config_path).with_context(|| {
            format!(
                "Failed to read config file: {}",
                self.config_path.display()
            )
        })?;
        let config = parse_config_str(&content).with_context(|| {
            format!(
                "Failed to parse config file: {}",
                self.config_path.display()
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config: &ManagerConfig) -> anyhow::Result<()> {
        let content =
            toml::to_string_pretty(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}

pub fn parse_config_str(content: &str) -> anyhow::Result<ManagerConfig> {
    toml::from_str(content).context("Invalid berth.toml")
}
