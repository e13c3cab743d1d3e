//! Access token handling.
//!
//! The process-wide token is resolved once at startup and never logged.
//! Resolution order:
//! 1. The environment variable named by `hub.token_env` (default `HF_TOKEN`)
//! 2. The secrets TOML file (`HF_TOKEN = "..."`)

use crate::config::schema::HubConfig;
use std::fmt;
use std::path::Path;

/// Environment variable set by hosted Spaces to the owning account
pub const SPACE_AUTHOR_ENV: &str = "SPACE_AUTHOR_NAME";

/// Opaque write-scoped access token
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    /// Wrap a raw token. Blank input yields `None`.
    #[must_use]
    pub fn new(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(Self {
                token: token.to_string(),
            })
        }
    }

    /// Raw token for request headers and child process environments
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.token
    }

    /// `Authorization` header value
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Deserialize an optional raw token field straight into a `Credential`
pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<Credential>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Credential::new))
}

/// Where the process token came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    EnvVar,
    SecretsFile,
}

impl fmt::Display for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnvVar => f.write_str("environment"),
            Self::SecretsFile => f.write_str("secrets file"),
        }
    }
}

/// Resolve the process token from the environment or the secrets file
#[must_use]
pub fn resolve_credential(hub: &HubConfig, secrets_path: &Path) -> Option<(Credential, TokenSource)> {
    if let Some(cred) = std::env::var(&hub.token_env)
        .ok()
        .as_deref()
        .and_then(Credential::new)
    {
        return Some((cred, TokenSource::EnvVar));
    }

    read_secrets_file(secrets_path, &hub.token_env).map(|cred| (cred, TokenSource::SecretsFile))
}

fn read_secrets_file(path: &Path, key: &str) -> Option<Credential> {
    let content = std::fs::read_to_string(path).ok()?;
    let table: toml::Table = match toml::from_str(&content) {
        Ok(table) => table,
        Err(e) => {
            tracing::warn!("Ignoring unparsable secrets file {}: {e}", path.display());
            return None;
        }
    };
    table.get(key)?.as_str().and_then(Credential::new)
}

/// Account name from the hosting environment, if any
#[must_use]
pub fn space_author() -> Option<String> {
    std::env::var(SPACE_AUTHOR_ENV)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn hub_config(token_env: &str) -> HubConfig {
        HubConfig {
            token_env: token_env.to_string(),
            ..HubConfig::default()
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let cred = Credential::new("hf_secret_value").unwrap();
        let printed = format!("{cred:?}");
        assert!(!printed.contains("hf_secret_value"));
        assert_eq!(printed, "Credential(***)");
    }

    #[test]
    fn test_blank_token_rejected() {
        assert!(Credential::new("").is_none());
        assert!(Credential::new("   \n").is_none());
        assert_eq!(Credential::new(" hf_x \n").unwrap().expose(), "hf_x");
    }

    #[test]
    #[serial]
    fn test_env_var_wins_over_secrets_file() {
        let temp = TempDir::new().unwrap();
        let secrets = temp.path().join("secrets.toml");
        std::fs::write(&secrets, "ONNX_CONVERT_TEST_TOKEN = \"from_file\"\n").unwrap();

        std::env::set_var("ONNX_CONVERT_TEST_TOKEN", "from_env");
        let (cred, source) =
            resolve_credential(&hub_config("ONNX_CONVERT_TEST_TOKEN"), &secrets).unwrap();
        std::env::remove_var("ONNX_CONVERT_TEST_TOKEN");

        assert_eq!(cred.expose(), "from_env");
        assert_eq!(source, TokenSource::EnvVar);
    }

    #[test]
    #[serial]
    fn test_secrets_file_fallback() {
        let temp = TempDir::new().unwrap();
        let secrets = temp.path().join("secrets.toml");
        std::fs::write(&secrets, "ONNX_CONVERT_TEST_TOKEN = \"from_file\"\n").unwrap();

        std::env::remove_var("ONNX_CONVERT_TEST_TOKEN");
        let (cred, source) =
            resolve_credential(&hub_config("ONNX_CONVERT_TEST_TOKEN"), &secrets).unwrap();

        assert_eq!(cred.expose(), "from_file");
        assert_eq!(source, TokenSource::SecretsFile);
    }

    #[test]
    #[serial]
    fn test_no_token_anywhere() {
        let temp = TempDir::new().unwrap();
        std::env::remove_var("ONNX_CONVERT_TEST_TOKEN");
        let resolved = resolve_credential(
            &hub_config("ONNX_CONVERT_TEST_TOKEN"),
            &temp.path().join("missing.toml"),
        );
        assert!(resolved.is_none());
    }
}
