use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::Level;

/// Runtime settings for the `nx` binary.
///
/// Sources, later ones winning: built-in defaults, the YAML file named by
/// `NX_CONFIG`, then the `LISTEN`, `NX_COLLECTION` and `NX_LOG` variables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    pub collection: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            collection: "persons".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading variables through `var`.
    pub fn load_with(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut cfg = match var("NX_CONFIG") {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(addr) = var("LISTEN") {
            cfg.listen_addr = addr;
        }
        if let Some(name) = var("NX_COLLECTION") {
            cfg.collection = name;
        }
        if let Some(level) = var("NX_LOG") {
            cfg.log_level = level;
        }

        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Missing keys keep their defaults.
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    /// The configured log level, `INFO` when unrecognized.
    pub fn level(&self) -> Level {
        self.log_level.parse().unwrap_or(Level::INFO)
    }
}
