//! Configuration management for henge
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (henge.toml)
//! - Environment variables (HENGE__*)
//!
//! ## Example config file (henge.toml):
//! ```toml
//! [digest]
//! algorithm = "sha256"
//!
//! [limits]
//! max_depth = 64
//!
//! [schemas]
//! paths = ["schemas/person.json", "schemas/family"]
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::checksum::{DigestFunction, Sha256Digest, Sha512Digest};
use crate::henge::DEFAULT_MAX_DEPTH;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HengeConfig {
    /// Digest settings
    #[serde(default)]
    pub digest: DigestConfig,

    /// Recursion limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Where schema documents live
    #[serde(default)]
    pub schemas: SchemaSourceConfig,
}

/// Digest configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestConfig {
    #[serde(default)]
    pub algorithm: DigestAlgorithm,
}

/// Built-in digest functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl DigestAlgorithm {
    pub fn digest_function(&self) -> Box<dyn DigestFunction> {
        match self {
            DigestAlgorithm::Sha256 => Box::new(Sha256Digest),
            DigestAlgorithm::Sha512 => Box::new(Sha512Digest),
        }
    }
}

/// Recursion limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Nested insert/retrieve calls allowed before failing
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

/// Schema document locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaSourceConfig {
    /// JSON schema files, or directories searched for `*.json`
    #[serde(default)]
    pub paths: Vec<PathBuf>,
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

impl HengeConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["henge.toml", ".henge.toml", "config/henge.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "henge") {
            let xdg_config = config_dir.config_dir().join("henge.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("HENGE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HengeConfig::default();
        assert_eq!(config.digest.algorithm, DigestAlgorithm::Sha256);
        assert_eq!(config.limits.max_depth, DEFAULT_MAX_DEPTH);
        assert!(config.schemas.paths.is_empty());
    }

    #[test]
    fn test_serialize_config() {
        let config = HengeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[digest]"));
        assert!(toml_str.contains("algorithm = \"sha256\""));
        assert!(toml_str.contains("[limits]"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[digest]\nalgorithm = \"sha512\"\n\n[limits]\nmax_depth = 8\n",
        )
        .unwrap();

        let config = HengeConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.digest.algorithm, DigestAlgorithm::Sha512);
        assert_eq!(config.limits.max_depth, 8);
        assert_eq!(config.digest.algorithm.digest_function().version(), "sha512");
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = HengeConfig::default();
        config.schemas.paths.push(PathBuf::from("schemas/person.json"));
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = HengeConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.schemas.paths, config.schemas.paths);
    }
}
