//! `walletdesk doctor` - active health diagnostics.
//!
//! Validates configuration and probes the auth and storage endpoints so
//! problems show up before the wallet tries to bootstrap. Both endpoints are
//! reached through the same [`AuthInfoClient`] the wallet uses, so timeouts
//! and TLS settings match what bootstrap will see.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::AuthInfoError;
use crate::storage::{FileStore, SnapshotStore};
use crate::wallet::AuthInfoClient;

/// Run diagnostic checks and print results.
pub async fn run_doctor_command(toml_path: Option<&Path>, strict: bool) -> anyhow::Result<()> {
    println!("walletdesk doctor");
    println!("=================\n");

    let mut report = Report::default();

    match Config::from_env_with_toml(toml_path) {
        Ok(config) => {
            report.record(
                "Configuration",
                Outcome::Pass(format!(
                    "network {}, admin originator {}",
                    config.wallet.network.chain_label(),
                    config.admin_originator
                )),
            );
            run_config_checks(&config, &mut report).await;
        }
        Err(e) => report.record("Configuration", Outcome::Fail(e.to_string())),
    }

    println!();
    println!("  {} passed, {} failed", report.passed, report.failed);

    if report.failed > 0 && strict {
        anyhow::bail!("doctor strict mode failed with {} check(s)", report.failed);
    }

    Ok(())
}

async fn run_config_checks(config: &Config, report: &mut Report) {
    report.record("Auth method", auth_method_outcome(config));

    match AuthInfoClient::new(config.http_timeout) {
        Ok(client) => {
            report.record("Auth endpoint", auth_endpoint_outcome(&client, config).await);
            report.record(
                "Storage endpoint",
                storage_endpoint_outcome(&client, &config.wallet.storage_url).await,
            );
        }
        Err(e) => {
            report.record("Auth endpoint", Outcome::Fail(e.to_string()));
            report.record("Storage endpoint", Outcome::Skip("no HTTP client".to_string()));
        }
    }

    report.record("Persisted session", snapshot_outcome(&config.store_path));
}

#[derive(Debug)]
enum Outcome {
    Pass(String),
    Fail(String),
    Skip(String),
}

/// Tally of printed checks.
#[derive(Debug, Default)]
struct Report {
    passed: u32,
    failed: u32,
}

impl Report {
    fn record(&mut self, name: &str, outcome: Outcome) {
        let (tag, detail) = match &outcome {
            Outcome::Pass(detail) => {
                self.passed += 1;
                ("pass", detail)
            }
            Outcome::Fail(detail) => {
                self.failed += 1;
                ("FAIL", detail)
            }
            Outcome::Skip(detail) => ("skip", detail),
        };
        println!("  [{tag}] {name}: {detail}");
    }
}

fn auth_method_outcome(config: &Config) -> Outcome {
    match config.wallet.auth_method.as_deref() {
        Some(method) => Outcome::Pass(method.to_string()),
        None => Outcome::Skip(
            "not set; picked from the auth endpoint during configuration".to_string(),
        ),
    }
}

async fn auth_endpoint_outcome(client: &AuthInfoClient, config: &Config) -> Outcome {
    let info = match client.fetch(&config.wallet.auth_url).await {
        Ok(info) => info,
        Err(e) => return Outcome::Fail(e.to_string()),
    };
    let methods = info.supported_auth_methods.join(", ");
    match config.wallet.auth_method.as_deref() {
        Some(method) if !info.supports(method) => Outcome::Fail(format!(
            "configured auth method '{method}' not offered (supported: {methods})"
        )),
        _ => Outcome::Pass(format!(
            "{} (methods: {methods})",
            display_url(&config.wallet.auth_url)
        )),
    }
}

async fn storage_endpoint_outcome(client: &AuthInfoClient, endpoint: &str) -> Outcome {
    if endpoint.trim().is_empty() {
        return Outcome::Fail("storage URL is empty".to_string());
    }
    let shown = display_url(endpoint);
    match client.reachability(endpoint).await {
        Ok(status) if status.is_server_error() => {
            Outcome::Fail(format!("{shown} answered {status}"))
        }
        Ok(status) => Outcome::Pass(format!("{shown} ({status})")),
        Err(AuthInfoError::InvalidUrl(_)) => Outcome::Fail(format!("{shown} is not a valid URL")),
        Err(AuthInfoError::Request { reason, .. }) => {
            Outcome::Fail(format!("{shown} unreachable: {reason}"))
        }
        Err(e) => Outcome::Fail(e.to_string()),
    }
}

fn snapshot_outcome(store_path: &Path) -> Outcome {
    let store = match FileStore::open(store_path) {
        Ok(store) => store,
        Err(e) => return Outcome::Fail(e.to_string()),
    };
    match SnapshotStore::new(Arc::new(store)).load() {
        Ok(Some(bytes)) => Outcome::Pass(format!("snapshot present ({} bytes)", bytes.len())),
        Ok(None) => Outcome::Skip("no persisted snapshot".to_string()),
        Err(e) => Outcome::Fail(format!("{e}; it will be discarded at next start")),
    }
}

/// Endpoint as printed: credentials stripped, or a placeholder when the URL
/// does not parse.
fn display_url(raw: &str) -> String {
    let Ok(mut url) = url::Url::parse(raw.trim()) else {
        return "<invalid url>".to_string();
    };
    // Fails only for cannot-be-a-base URLs, which carry no credentials.
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.to_string()
}
