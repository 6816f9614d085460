//! Client configuration (spec.md §6, `monitor` config group).
//!
//! Resolved per SPEC_FULL.md's "Configuration" section: a TOML file at a
//! `ProjectDirs`-resolved path (grounded on the teacher's own
//! `Config::config_path`) plus `--block-size`/`--quiet` CLI overrides — the
//! more-featureful of the two divergent `monitor/options.c` originals.

use cdp_proto::DEFAULT_BLOCK_SIZE;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server_url: Option<String>,
    pub host: Option<String>,
    #[serde(default)]
    pub dir_list: Vec<String>,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub quiet: bool,
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_url: None,
            host: None,
            dir_list: Vec::new(),
            block_size: DEFAULT_BLOCK_SIZE,
            quiet: false,
        }
    }
}

impl Config {
    pub fn config_path() -> anyhow::Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("com", "cdp", "cdp-client")
            .ok_or_else(|| anyhow::anyhow!("could not determine config directory"))?;

        let config_dir = proj_dirs.config_dir();
        std::fs::create_dir_all(config_dir)?;

        Ok(config_dir.join("config.toml"))
    }

    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    pub fn require_server(&self) -> anyhow::Result<&str> {
        self.server_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no server configured; set server_url in the config file"))
    }

    pub fn require_host(&self) -> anyhow::Result<&str> {
        self.host
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("no host identity configured; set host in the config file"))
    }

    /// Apply `--block-size`/`--quiet` CLI overrides on top of the file
    /// config, matching the authoritative `monitor/options.c` precedence.
    pub fn with_overrides(mut self, block_size: Option<usize>, quiet: bool) -> Self {
        if let Some(bs) = block_size {
            self.block_size = bs;
        }
        self.quiet = self.quiet || quiet;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_block_size_matches_proto_default() {
        assert_eq!(Config::default().block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn overrides_apply_on_top_of_file_config() {
        let config = Config::default().with_overrides(Some(4096), true);
        assert_eq!(config.block_size, 4096);
        assert!(config.quiet);
    }

    #[test]
    fn require_server_fails_when_unset() {
        assert!(Config::default().require_server().is_err());
    }
}
