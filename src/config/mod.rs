//! Configuration for walletdesk.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! Values chosen during `walletdesk configure` live in `~/.walletdesk/.env`
//! (loaded via dotenvy early in startup), so they behave like env vars.

pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_AUTH_URL: &str = "https://auth.walletdesk.dev";
pub const DEFAULT_STORAGE_URL: &str = "https://storage.walletdesk.dev";
pub const DEFAULT_ADMIN_ORIGINATOR: &str = "admin.walletdesk.local";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Chain the wallet operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    #[default]
    Main,
    Test,
}

impl Network {
    pub(crate) fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "main" | "mainnet" => Ok(Self::Main),
            "test" | "testnet" => Ok(Self::Test),
            _ => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected 'main' or 'test', got '{value}'"),
            }),
        }
    }

    /// Short form used in persisted configuration.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Test => "test",
        }
    }

    /// Label the wallet engine expects.
    pub fn chain_label(self) -> &'static str {
        match self {
            Self::Main => "mainnet",
            Self::Test => "testnet",
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inputs wallet construction depends on.
///
/// This is the editable draft the bootstrap state machine validates before
/// marking configuration complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
    pub auth_url: String,
    pub network: Network,
    pub storage_url: String,
    pub auth_method: Option<String>,
}

impl WalletConfig {
    /// Check the minimum required fields.
    ///
    /// Returns the first missing or invalid field as an error.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth_url.trim().is_empty() {
            return Err(ConfigError::missing(
                "WALLETDESK_AUTH_URL",
                "Set the auth endpoint URL.",
            ));
        }
        helpers::validate_endpoint("WALLETDESK_AUTH_URL", &self.auth_url)?;

        if self.storage_url.trim().is_empty() {
            return Err(ConfigError::missing(
                "WALLETDESK_STORAGE_URL",
                "Set the storage endpoint URL.",
            ));
        }
        helpers::validate_endpoint("WALLETDESK_STORAGE_URL", &self.storage_url)?;

        match self.auth_method.as_deref() {
            Some(method) if !method.trim().is_empty() => Ok(()),
            _ => Err(ConfigError::missing(
                "WALLETDESK_AUTH_METHOD",
                "Pick one of the auth methods the auth endpoint supports.",
            )),
        }
    }
}

/// Optional TOML overlay, `~/.walletdesk/config.toml` by default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub auth_url: Option<String>,
    pub network: Option<String>,
    pub storage_url: Option<String>,
    pub auth_method: Option<String>,
    pub admin_originator: Option<String>,
    pub store_path: Option<PathBuf>,
    pub http_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn default_path() -> PathBuf {
        crate::bootstrap::walletdesk_dir().join("config.toml")
    }

    /// Load a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ConfigError::Io(e)),
        };

        toml::from_str(&data)
            .map(Some)
            .map_err(|e| ConfigError::ParseError(format!("invalid TOML in {}: {}", path.display(), e)))
    }
}

/// Main configuration for the wallet host.
#[derive(Debug, Clone)]
pub struct Config {
    pub wallet: WalletConfig,
    /// Originator the host itself acts as when talking to the engine.
    pub admin_originator: String,
    /// JSON file standing in for the host's local storage.
    pub store_path: PathBuf,
    pub http_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables and the default
    /// TOML file.
    ///
    /// Loads both `./.env` (standard, higher priority) and
    /// `~/.walletdesk/.env` (lower priority) via dotenvy, which never
    /// overwrites existing vars.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional explicit TOML config file.
    ///
    /// If `explicit_path` is `Some`, a missing or broken file is an error.
    /// If `None`, tries `~/.walletdesk/config.toml` and ignores a missing
    /// file.
    pub fn from_env_with_toml(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_walletdesk_env();

        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(FileConfig::default_path);

        let file = match FileConfig::load(&path) {
            Ok(Some(file)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                file
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                FileConfig::default()
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(e);
                }
                tracing::warn!("Failed to load default config file: {}", e);
                FileConfig::default()
            }
        };

        Self::resolve(&file)
    }

    /// Resolve every value from env vars, then `file`, then defaults.
    pub fn resolve(file: &FileConfig) -> Result<Self, ConfigError> {
        let auth_url = helpers::optional_env("WALLETDESK_AUTH_URL")?
            .or_else(|| file.auth_url.clone())
            .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string());
        let auth_url = helpers::validate_endpoint("WALLETDESK_AUTH_URL", &auth_url)?;

        let network = match helpers::optional_env("WALLETDESK_NETWORK")? {
            Some(value) => Network::parse(&value, "WALLETDESK_NETWORK")?,
            None => match file.network.as_deref() {
                Some(value) => Network::parse(value, "network")?,
                None => Network::default(),
            },
        };

        let storage_url = helpers::optional_env("WALLETDESK_STORAGE_URL")?
            .or_else(|| file.storage_url.clone())
            .unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string());
        let storage_url = helpers::validate_endpoint("WALLETDESK_STORAGE_URL", &storage_url)?;

        let auth_method = helpers::optional_env("WALLETDESK_AUTH_METHOD")?
            .or_else(|| file.auth_method.clone())
            .filter(|m| !m.trim().is_empty());

        let admin_originator = helpers::optional_env("WALLETDESK_ADMIN_ORIGINATOR")?
            .or_else(|| file.admin_originator.clone())
            .unwrap_or_else(|| DEFAULT_ADMIN_ORIGINATOR.to_string());

        let store_path = helpers::optional_env("WALLETDESK_STORE_PATH")?
            .map(PathBuf::from)
            .or_else(|| file.store_path.clone())
            .unwrap_or_else(default_store_path);

        let timeout_secs = helpers::parse_optional_env(
            "WALLETDESK_HTTP_TIMEOUT_SECS",
            file.http_timeout_secs.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        )?;
        if timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "WALLETDESK_HTTP_TIMEOUT_SECS".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        Ok(Self {
            wallet: WalletConfig {
                auth_url,
                network,
                storage_url,
                auth_method,
            },
            admin_originator,
            store_path,
            http_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

fn default_store_path() -> PathBuf {
    crate::bootstrap::walletdesk_dir().join("local_storage.json")
}
