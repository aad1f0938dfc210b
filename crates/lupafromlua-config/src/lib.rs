//! Configuration for the bridge module
//!
//! Settings live in a small TOML file. Every key is optional; missing keys fall
//! back to the defaults the bridge library expects (`lupa`, global `lua`).

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable pointing at an alternative config file
pub const CONFIG_ENV: &str = "LUPAFROMLUA_CONFIG";

pub const DEFAULT_BRIDGE_MODULE: &str = "lupa";
pub const DEFAULT_GLOBAL_NAME: &str = "lua";
pub const DEFAULT_PROGRAM_NAME: &str = "lupafromlua";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Overrides the Python runtime library name baked in at build time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_library: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge_module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<u8>,
}

impl Config {
    pub fn path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        // Honor explicit override for tests / isolated runs.
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let trimmed = env_path.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        #[cfg(not(target_os = "windows"))]
        let default = dirs::home_dir()
            .ok_or("Could not determine home directory")?
            .join(".config")
            .join("lupafromlua")
            .join("lupafromlua.toml");

        #[cfg(target_os = "windows")]
        let default = dirs::config_dir()
            .ok_or("Could not determine config directory")?
            .join("lupafromlua")
            .join("lupafromlua.toml");

        Ok(default)
    }

    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            "python-library" => self.python_library.clone(),
            "bridge-module" => self.bridge_module.clone(),
            "global-name" => self.global_name.clone(),
            "program-name" => self.program_name.clone(),
            "verbosity" => self.verbosity.map(|v| v.to_string()),
            _ => None,
        }
    }

    pub fn set(&mut self, key: &str, value: String) {
        match key {
            "python-library" => self.python_library = Some(value),
            "bridge-module" => self.bridge_module = Some(value),
            "global-name" => self.global_name = Some(value),
            "program-name" => self.program_name = Some(value),
            "verbosity" => self.verbosity = value.parse().ok(),
            _ => {}
        }
    }

    pub fn is_empty(&self) -> bool {
        self.python_library.is_none()
            && self.bridge_module.is_none()
            && self.global_name.is_none()
            && self.program_name.is_none()
            && self.verbosity.is_none()
    }

    pub fn get_bridge_module(&self) -> &str {
        self.bridge_module.as_deref().unwrap_or(DEFAULT_BRIDGE_MODULE)
    }

    pub fn get_global_name(&self) -> &str {
        self.global_name.as_deref().unwrap_or(DEFAULT_GLOBAL_NAME)
    }

    pub fn get_program_name(&self) -> &str {
        self.program_name.as_deref().unwrap_or(DEFAULT_PROGRAM_NAME)
    }

    pub fn get_verbosity(&self) -> u8 {
        self.verbosity.unwrap_or(0)
    }

    /// Library to link, preferring the configured override over `built_in`
    pub fn get_python_library<'a>(&'a self, built_in: &'a str) -> &'a str {
        self.python_library.as_deref().unwrap_or(built_in)
    }
}
