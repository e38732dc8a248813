use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::pki::signer::DEFAULT_SIGN_TIMEOUT;
use crate::pki::Identity;
use crate::retry::RetryConfig;

/// Directory under `$HOME` holding the config file and credentials
pub const PERSYS_DIR: &str = ".persys";

const DEFAULT_API_ENDPOINT: &str = "https://localhost:8084";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the orchestrator API (must be https)
    #[serde(default = "default_api_endpoint")]
    pub api_endpoint: String,

    /// Credential locations
    #[serde(default)]
    pub tls: TlsConfig,

    /// Signing authority and client identity
    #[serde(default)]
    pub signing: SigningConfig,
}

/// Where the CA root and the client credential live
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub ca_cert_path: PathBuf,

    #[serde(default)]
    pub cert_path: PathBuf,

    #[serde(default)]
    pub key_path: PathBuf,
}

/// Signing authority configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Base URL of the CFSSL endpoint
    #[serde(default)]
    pub url: String,

    /// Subject CN requested for the client certificate
    #[serde(default)]
    pub common_name: String,

    /// Subject O requested for the client certificate
    #[serde(default)]
    pub organization: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Signing attempts on transport failure (1 = no retry)
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
}

fn default_api_endpoint() -> String { DEFAULT_API_ENDPOINT.to_string() }
fn default_timeout_secs() -> u64 { DEFAULT_SIGN_TIMEOUT.as_secs() }
fn default_retry_attempts() -> u32 { 1 }

impl Default for TlsConfig {
    fn default() -> Self {
        let dir = persys_dir();
        Self {
            ca_cert_path: dir.join("ca.crt"),
            cert_path: dir.join("client.crt"),
            key_path: dir.join("client.key"),
        }
    }
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            url: "https://localhost:8888".to_string(),
            common_name: "persysctl".to_string(),
            organization: "Persys".to_string(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_endpoint: default_api_endpoint(),
            tls: TlsConfig::default(),
            signing: SigningConfig::default(),
        }
    }
}

/// `~/.persys`, or `./.persys` when no home directory is known
pub fn persys_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(PERSYS_DIR)
}

impl Config {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        persys_dir().join("config.toml")
    }

    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .context("Failed to parse config file")?;

        Ok(config)
    }

    /// Effective configuration: file (or defaults), then environment, then path fallbacks
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        let mut config = if path.exists() {
            debug!(path = %path.display(), "Loading config");
            Self::from_file(&path)?
        } else {
            warn!(path = %path.display(), "No config file found, using defaults");
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok());
        config.fill_empty_paths();
        Ok(config)
    }

    /// Apply `PERSYS_*` overrides obtained from `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("PERSYS_API_ENDPOINT") {
            self.api_endpoint = v;
        }
        if let Some(v) = non_empty("PERSYS_SIGNING_URL") {
            self.signing.url = v;
        }
        if let Some(v) = non_empty("PERSYS_COMMON_NAME") {
            self.signing.common_name = v;
        }
        if let Some(v) = non_empty("PERSYS_ORGANIZATION") {
            self.signing.organization = v;
        }
    }

    /// Blank credential paths fall back to the files under `~/.persys`
    pub fn fill_empty_paths(&mut self) {
        let defaults = TlsConfig::default();
        if self.tls.ca_cert_path.as_os_str().is_empty() {
            self.tls.ca_cert_path = defaults.ca_cert_path;
        }
        if self.tls.cert_path.as_os_str().is_empty() {
            self.tls.cert_path = defaults.cert_path;
        }
        if self.tls.key_path.as_os_str().is_empty() {
            self.tls.key_path = defaults.key_path;
        }
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        if let Some(dir) = path.as_ref().parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .context("Failed to create config directory")?;
        }

        fs::write(path.as_ref(), content)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Create a default config file, refusing to clobber an existing one
    pub fn create_default<P: AsRef<Path>>(path: P) -> Result<()> {
        if path.as_ref().exists() {
            anyhow::bail!("Config file already exists: {}", path.as_ref().display());
        }
        Self::default().to_file(path)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.api_endpoint.starts_with("https://") {
            anyhow::bail!(
                "api_endpoint must start with https:// when using mTLS, got: {}",
                self.api_endpoint
            );
        }

        if self.signing.timeout_secs == 0 {
            anyhow::bail!("signing.timeout_secs must be greater than 0");
        }

        self.identity().validate()?;
        Ok(())
    }

    /// Client identity derived from the `[tls]` and `[signing]` sections
    pub fn identity(&self) -> Identity {
        Identity {
            common_name: self.signing.common_name.clone(),
            organization: self.signing.organization.clone(),
            ca_cert_path: self.tls.ca_cert_path.clone(),
            cert_path: self.tls.cert_path.clone(),
            key_path: self.tls.key_path.clone(),
            signing_url: self.signing.url.clone(),
        }
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_secs(self.signing.timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::with_max_attempts(self.signing.retry_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.signing.timeout_secs, 10);
        assert_eq!(config.signing.retry_attempts, 1);
        assert!(config.tls.key_path.ends_with(".persys/client.key"));
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let toml_str = r#"
            api_endpoint = "https://prow.example:8084"

            [signing]
            url = "https://ca.example:8888"
            common_name = "bob"
        "#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        config.fill_empty_paths();

        assert_eq!(config.api_endpoint, "https://prow.example:8084");
        assert_eq!(config.signing.common_name, "bob");
        assert_eq!(config.signing.organization, "");
        assert_eq!(config.signing.timeout_secs, 10);
        assert!(config.tls.ca_cert_path.ends_with("ca.crt"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_paths_fall_back() {
        let toml_str = r#"
            [tls]
            ca_cert_path = ""
            cert_path = "/etc/persys/me.crt"
        "#;
        let mut config: Config = toml::from_str(toml_str).unwrap();
        config.fill_empty_paths();

        assert_eq!(config.tls.cert_path, PathBuf::from("/etc/persys/me.crt"));
        assert!(config.tls.ca_cert_path.ends_with(".persys/ca.crt"));
        assert!(config.tls.key_path.ends_with(".persys/client.key"));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("PERSYS_API_ENDPOINT", "https://override:9000"),
            ("PERSYS_COMMON_NAME", "carol"),
            ("PERSYS_ORGANIZATION", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_endpoint, "https://override:9000");
        assert_eq!(config.signing.common_name, "carol");
        // Blank values do not override
        assert_eq!(config.signing.organization, "Persys");
        assert_eq!(config.signing.url, SigningConfig::default().url);
    }

    #[test]
    fn test_plain_http_endpoint_is_rejected() {
        let mut config = Config::default();
        config.api_endpoint = "http://localhost:8084".to_string();

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("https://"));
    }

    #[test]
    fn test_missing_common_name_is_rejected() {
        let mut config = Config::default();
        config.signing.common_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip_and_init() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        Config::create_default(&path).unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), Config::default());

        // Second init must not overwrite
        assert!(Config::create_default(&path).is_err());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert!(config.tls.cert_path.ends_with("client.crt"));
    }

    #[test]
    fn test_identity_mirrors_sections() {
        let config = Config::default();
        let identity = config.identity();

        assert_eq!(identity.common_name, config.signing.common_name);
        assert_eq!(identity.signing_url, config.signing.url);
        assert_eq!(identity.key_path, config.tls.key_path);
        assert_eq!(config.retry_config().max_attempts, 1);
        assert_eq!(config.sign_timeout(), Duration::from_secs(10));
    }
}
