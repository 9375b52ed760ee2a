use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::warn;

const MAX_CHANGE_QUEUE_CAPACITY: usize = 1 << 16;

/// `$XDG_CONFIG_HOME/wmtree/config.toml`, or the platform equivalent.
pub fn config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("wmtree").join("config.toml"))
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub tree: TreeSettings,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(deny_unknown_fields)]
pub struct TreeSettings {
    /// Follow the leader property of toplevels to group them. When off, every
    /// toplevel leads its own group.
    #[serde(default = "yes")]
    pub track_leader: bool,
    /// Number of change records to preallocate. Values above 65536 are
    /// clamped.
    #[serde(default = "default_change_queue_capacity")]
    pub change_queue_capacity: usize,
    /// Log a second client window showing up under a toplevel as a warning.
    /// When off it is logged at debug level.
    #[serde(default = "yes")]
    pub warn_on_client_conflict: bool,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            track_leader: true,
            change_queue_capacity: default_change_queue_capacity(),
            warn_on_client_conflict: true,
        }
    }
}

impl TreeSettings {
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.change_queue_capacity == 0 {
            issues.push("change_queue_capacity must be at least 1".to_string());
        }
        if self.change_queue_capacity > MAX_CHANGE_QUEUE_CAPACITY {
            issues.push(format!(
                "change_queue_capacity should not exceed {MAX_CHANGE_QUEUE_CAPACITY}, clamping"
            ));
        }
        issues
    }

    /// The queue capacity to actually preallocate.
    pub fn queue_capacity(&self) -> usize { self.change_queue_capacity.min(MAX_CHANGE_QUEUE_CAPACITY) }
}

fn yes() -> bool { true }

fn default_change_queue_capacity() -> usize { 16 }

impl Config {
    pub fn read(path: &Path) -> anyhow::Result<Config> {
        let buf = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        Self::parse(&buf)
    }

    /// Reads the config from its default location, falling back to the
    /// defaults when there is no file.
    pub fn load() -> anyhow::Result<Config> {
        match config_file() {
            Some(path) if path.exists() => Self::read(&path),
            _ => Ok(Config::default()),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let toml_string = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, toml_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Vec<String> { self.tree.validate() }

    pub fn parse(buf: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(buf)?;
        for issue in config.validate() {
            warn!("config: {issue}");
        }
        Ok(config)
    }
}
