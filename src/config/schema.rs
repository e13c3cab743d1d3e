use crate::error::{ConvertError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "ONNX_CONVERT_CONFIG";

/// Main configuration structure
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct HubConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// TOML file holding `HF_TOKEN = "..."`, read when the env var is unset
    pub secrets_file: Option<PathBuf>,
    #[serde(default = "default_revision")]
    pub revision: String,
    #[serde(default)]
    pub private: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct ToolchainConfig {
    #[serde(default = "default_transformers_version")]
    pub transformers_version: String,
    #[serde(default = "default_archive_base_url")]
    pub archive_base_url: String,
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    /// Python interpreter; looked up in PATH when unset
    pub python: Option<PathBuf>,
    #[serde(default = "default_quantize_modes")]
    pub quantize_modes: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct CacheConfig {
    /// Root of the mountable cache volume
    pub dir: Option<PathBuf>,
    #[serde(default = "default_min_free_mb")]
    pub min_free_mb: u64,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
const fn default_port() -> u16 {
    7860
}
fn default_endpoint() -> String {
    "https://huggingface.co".to_string()
}
fn default_token_env() -> String {
    "HF_TOKEN".to_string()
}
fn default_revision() -> String {
    "main".to_string()
}
fn default_transformers_version() -> String {
    "3.6.1".to_string()
}
fn default_archive_base_url() -> String {
    "https://github.com/huggingface/transformers.js/archive/refs".to_string()
}
fn default_repo_path() -> PathBuf {
    PathBuf::from("./transformers.js")
}
fn default_quantize_modes() -> Vec<String> {
    vec!["q8".to_string()]
}
const fn default_min_free_mb() -> u64 {
    100
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token_env: default_token_env(),
            secrets_file: None,
            revision: default_revision(),
            private: false,
        }
    }
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            transformers_version: default_transformers_version(),
            archive_base_url: default_archive_base_url(),
            repo_path: default_repo_path(),
            python: None,
            quantize_modes: default_quantize_modes(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: None,
            min_free_mb: default_min_free_mb(),
        }
    }
}

impl Config {
    /// Load config from `ONNX_CONVERT_CONFIG` or the user config dir.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let path = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(p) => PathBuf::from(p),
            None => config_path()?,
        };

        if !path.exists() {
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        Self::load_from(&path)
    }

    /// Load config from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            ConvertError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Cache root, defaulting to the platform cache dir
    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.cache.dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|d| d.join("onnx-convert"))
            .ok_or_else(|| ConvertError::Config("Cannot determine cache directory".to_string()))
    }

    /// Directory used as the hub download cache
    pub fn hub_cache_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("hub"))
    }

    /// Parent directory for exported artifacts
    pub fn output_dir(&self) -> Result<PathBuf> {
        Ok(self.cache_dir()?.join("output"))
    }

    /// Secrets file, defaulting to `secrets.toml` next to config.toml
    pub fn secrets_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.hub.secrets_file {
            return Ok(path.clone());
        }
        Ok(config_dir()?.join("secrets.toml"))
    }
}

fn config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("onnx-convert"))
        .ok_or_else(|| ConvertError::Config("Cannot determine config directory".to_string()))
}

/// Default config file location
pub fn config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 7860);
        assert_eq!(config.hub.endpoint, "https://huggingface.co");
        assert_eq!(config.hub.token_env, "HF_TOKEN");
        assert_eq!(config.toolchain.transformers_version, "3.6.1");
        assert_eq!(config.toolchain.quantize_modes, vec!["q8".to_string()]);
    }

    #[test]
    fn test_partial_config_merges_defaults() {
        let config: Config = toml::from_str(
            r#"
            [server]
            port = 8080

            [cache]
            dir = "/data"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.cache.min_free_mb, 100);
        assert_eq!(config.hub_cache_dir().unwrap(), PathBuf::from("/data/hub"));
        assert_eq!(config.output_dir().unwrap(), PathBuf::from("/data/output"));
    }

    #[test]
    fn test_load_from_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[server\nport = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, ConvertError::Config(_)));
    }
}
