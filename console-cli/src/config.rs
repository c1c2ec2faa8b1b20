///! CLI configuration management

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_server: String,
    pub default_output: String,
    pub token: Option<String>,
    pub namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_server: "http://localhost:9000".to_string(),
            default_output: "table".to_string(),
            token: None,
            namespace: None,
        }
    }
}

/// Keys accepted by `config set`
pub const KEYS: [&str; 4] = ["server", "output", "token", "namespace"];

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;

        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Set one key; an empty value clears optional keys
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let optional = || Some(value.to_string()).filter(|v| !v.is_empty());
        match key {
            "server" => self.default_server = value.trim_end_matches('/').to_string(),
            "output" => match value {
                "table" | "json" | "yaml" => self.default_output = value.to_string(),
                _ => anyhow::bail!("Unknown output format '{}' (table, json, yaml)", value),
            },
            "token" => self.token = optional(),
            "namespace" => self.namespace = optional(),
            _ => anyhow::bail!("Unknown config key '{}' (expected one of: {})", key, KEYS.join(", ")),
        }
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = std::env::var("HOME")?;
        Ok(PathBuf::from(home).join(".config/console/cli.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("cli.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/cli.toml");

        let mut config = Config::default();
        config.set("server", "https://console.example.com/").unwrap();
        config.set("namespace", "team-a").unwrap();
        config.set("output", "json").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.default_server, "https://console.example.com");
        assert_eq!(loaded.namespace.as_deref(), Some("team-a"));
        assert_eq!(loaded.default_output, "json");
    }

    #[test]
    fn test_set_rejects_unknown_values() {
        let mut config = Config::default();
        assert!(config.set("colour", "blue").is_err());
        assert!(config.set("output", "xml").is_err());

        config.set("token", "abc").unwrap();
        config.set("token", "").unwrap();
        assert!(config.token.is_none());
    }
}
