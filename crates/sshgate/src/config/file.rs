//! File-based configuration loading.

use std::path::{Path, PathBuf};

use super::ServerConfig;
use crate::error::{Result, ServerError};

/// Configuration file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML format.
    Toml,
    /// JSON format.
    Json,
}

impl ConfigFormat {
    /// Detect format from file extension.
    #[must_use]
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }

    /// Detect format from path.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

/// Configuration file loader.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    /// Search paths.
    search_paths: Vec<PathBuf>,
    /// Format used when the extension says nothing.
    default_format: Option<ConfigFormat>,
}

impl ConfigLoader {
    /// Create a new loader.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a search path.
    #[must_use]
    pub fn add_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }

    /// Set default format.
    #[must_use]
    pub const fn with_format(mut self, format: ConfigFormat) -> Self {
        self.default_format = Some(format);
        self
    }

    /// Find a config file by name, trying known extensions.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            let path = search_path.join(name);
            if path.is_file() {
                return Some(path);
            }
            for ext in ["toml", "json"] {
                let path = search_path.join(format!("{name}.{ext}"));
                if path.is_file() {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Load and validate a config file.
    pub fn load(&self, path: &Path) -> Result<ServerConfig> {
        let content = std::fs::read_to_string(path)?;
        let format = ConfigFormat::from_path(path)
            .or(self.default_format)
            .ok_or_else(|| {
                ServerError::config(format!("unknown config format: {}", path.display()))
            })?;
        let config = parse_config(&content, format)?;
        config.validate()?;
        Ok(config)
    }

    /// Load by name (searches paths).
    pub fn load_by_name(&self, name: &str) -> Result<ServerConfig> {
        let path = self
            .find(name)
            .ok_or_else(|| ServerError::config(format!("config file not found: {name}")))?;
        self.load(&path)
    }
}

/// Parse config content. Missing keys take their default values.
pub fn parse_config(content: &str, format: ConfigFormat) -> Result<ServerConfig> {
    match format {
        ConfigFormat::Toml => {
            toml::from_str(content).map_err(|e| ServerError::config(format!("invalid TOML: {e}")))
        }
        ConfigFormat::Json => serde_json::from_str(content)
            .map_err(|e| ServerError::config(format!("invalid JSON: {e}"))),
    }
}
