//! Configuration management
//!
//! Stores settings in ~/.config/citecheck/config.json. The API key can
//! always be supplied through the environment instead; the environment
//! wins when both are present.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub openrouter_api_key: Option<String>,
    /// Default budget of extract→verify→correct rounds per run.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Oracle model id; the built-in default applies when unset.
    pub model: Option<String>,
}

fn default_max_iterations() -> u32 {
    3
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openrouter_api_key: None,
            max_iterations: default_max_iterations(),
            model: None,
        }
    }
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("citecheck"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        eprintln!(
                            "  Warning: config file was corrupted ({}). A backup was saved and defaults were loaded.",
                            err
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk.
    pub fn save(&self) -> anyhow::Result<()> {
        let dir = Self::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        fs::create_dir_all(&dir)?;
        let path = dir.join("config.json");
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Resolve the API key: environment first, then config file.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| self.openrouter_api_key.clone())
    }
}

/// Keep the unparseable file around so a hand-edited key is not lost.
fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let backup = path.with_extension("json.corrupt");
    let _ = fs::write(backup, content);
}
