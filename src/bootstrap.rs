//! Bootstrap helpers for walletdesk.
//!
//! The configuration chosen during `walletdesk configure` (auth endpoint,
//! network, storage endpoint, auth method) is persisted to disk so the next
//! start can skip the configuration step.
//!
//! File: `~/.walletdesk/.env` (standard dotenvy format)

use std::path::{Path, PathBuf};

use crate::config::WalletConfig;

/// Base directory for walletdesk state: `~/.walletdesk`.
pub fn walletdesk_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".walletdesk")
}

/// Path to the walletdesk-specific `.env` file: `~/.walletdesk/.env`.
pub fn walletdesk_env_path() -> PathBuf {
    walletdesk_dir().join(".env")
}

/// Load env vars from `~/.walletdesk/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that the standard `./.env`
/// takes priority over `~/.walletdesk/.env`. dotenvy never overwrites
/// existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.walletdesk/.env`
pub fn load_walletdesk_env() {
    let path = walletdesk_env_path();
    if path.exists()
        && let Err(e) = dotenvy::from_path(&path)
    {
        tracing::warn!("Failed to load {}: {}", path.display(), e);
    }
}

/// Write bootstrap vars to `~/.walletdesk/.env`.
pub fn save_bootstrap_env(vars: &[(&str, &str)]) -> std::io::Result<()> {
    save_bootstrap_env_to(&walletdesk_env_path(), vars)
}

/// Write bootstrap vars to `path`, replacing its contents.
///
/// Creates the parent directory if it doesn't exist.
/// Values are double-quoted so that `#` and other shell-special characters
/// are preserved by dotenvy.
pub fn save_bootstrap_env_to(path: &Path, vars: &[(&str, &str)]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut content = String::new();
    for (key, value) in vars {
        // Escape backslashes and double quotes so a value can't break out
        // of its quotes and define another var.
        let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
        content.push_str(&format!("{}=\"{}\"\n", key, escaped));
    }
    std::fs::write(path, content)
}

fn push_env_var(vars: &mut Vec<(&'static str, String)>, key: &'static str, value: Option<&str>) {
    if let Some(value) = value {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            vars.push((key, trimmed.to_string()));
        }
    }
}

/// The env vars that reproduce `wallet` on the next start.
pub fn bootstrap_env_vars(wallet: &WalletConfig) -> Vec<(&'static str, String)> {
    let mut vars = Vec::new();
    push_env_var(&mut vars, "WALLETDESK_AUTH_URL", Some(&wallet.auth_url));
    push_env_var(&mut vars, "WALLETDESK_NETWORK", Some(wallet.network.as_str()));
    push_env_var(&mut vars, "WALLETDESK_STORAGE_URL", Some(&wallet.storage_url));
    push_env_var(
        &mut vars,
        "WALLETDESK_AUTH_METHOD",
        wallet.auth_method.as_deref(),
    );
    vars
}
