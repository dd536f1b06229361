//! Command-line surface of the `walletdesk` binary.

pub mod doctor;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::bootstrap::{bootstrap_env_vars, save_bootstrap_env, walletdesk_env_path};
use crate::config::{Config, Network};
use crate::storage::{FileStore, SnapshotStore};
use crate::wallet::AuthInfoClient;

/// walletdesk - desktop wallet host tooling
#[derive(Parser, Debug)]
#[command(name = "walletdesk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// TOML config file (default: ~/.walletdesk/config.toml)
    #[arg(short, long, global = true, env = "WALLETDESK_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch the auth endpoint's supported methods
    AuthInfo {
        /// Auth endpoint to query instead of the configured one
        #[arg(long)]
        url: Option<String>,
    },

    /// Inspect resolved configuration
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Choose and persist the wallet configuration to ~/.walletdesk/.env
    Configure(ConfigureArgs),

    /// Inspect or clear the persisted session snapshot
    #[command(subcommand)]
    Snapshot(SnapshotCommand),

    /// Check configuration and endpoint reachability
    Doctor {
        /// Exit with an error if any check fails
        #[arg(long)]
        strict: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the resolved configuration
    Show {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args, Debug)]
pub struct ConfigureArgs {
    /// Auth endpoint URL
    #[arg(long)]
    pub auth_url: Option<String>,

    /// Network: main or test
    #[arg(long)]
    pub network: Option<String>,

    /// Storage endpoint URL
    #[arg(long)]
    pub storage_url: Option<String>,

    /// Auth method; auto-selected when the endpoint offers exactly one
    #[arg(long)]
    pub auth_method: Option<String>,

    /// Don't contact the auth endpoint
    #[arg(long)]
    pub offline: bool,
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCommand {
    /// Report whether a snapshot is stored and decodes
    Status,
    /// Remove the stored snapshot
    Clear,
}

/// Dispatch a parsed command line.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let toml_path = cli.config.as_deref();
    match cli.command {
        Command::AuthInfo { url } => run_auth_info(toml_path, url).await,
        Command::Config(ConfigCommand::Show { json }) => run_config_show(toml_path, json),
        Command::Configure(args) => run_configure(toml_path, args).await,
        Command::Snapshot(command) => run_snapshot(toml_path, command),
        Command::Doctor { strict } => doctor::run_doctor_command(toml_path, strict).await,
    }
}

async fn run_auth_info(toml_path: Option<&Path>, url: Option<String>) -> anyhow::Result<()> {
    let config = Config::from_env_with_toml(toml_path)?;
    let auth_url = url.unwrap_or_else(|| config.wallet.auth_url.clone());
    let client = AuthInfoClient::new(config.http_timeout)?;
    let info = client
        .fetch(&auth_url)
        .await
        .with_context(|| format!("Could not fetch auth info from {auth_url}"))?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

fn run_config_show(toml_path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = Config::from_env_with_toml(toml_path)?;
    let auth_method = config.wallet.auth_method.as_deref().unwrap_or("(unset)");
    if json {
        let value = serde_json::json!({
            "auth_url": config.wallet.auth_url,
            "network": config.wallet.network,
            "storage_url": config.wallet.storage_url,
            "auth_method": config.wallet.auth_method,
            "admin_originator": config.admin_originator,
            "store_path": config.store_path,
            "http_timeout_secs": config.http_timeout.as_secs(),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("auth_url          {}", config.wallet.auth_url);
    println!(
        "network           {} ({})",
        config.wallet.network,
        config.wallet.network.chain_label()
    );
    println!("storage_url       {}", config.wallet.storage_url);
    println!("auth_method       {auth_method}");
    println!("admin_originator  {}", config.admin_originator);
    println!("store_path        {}", config.store_path.display());
    println!("http_timeout      {}s", config.http_timeout.as_secs());
    Ok(())
}

async fn run_configure(toml_path: Option<&Path>, args: ConfigureArgs) -> anyhow::Result<()> {
    let config = Config::from_env_with_toml(toml_path)?;
    let mut wallet = config.wallet.clone();
    if let Some(url) = args.auth_url {
        wallet.auth_url = url;
    }
    if let Some(network) = args.network {
        wallet.network = Network::parse(&network, "--network")?;
    }
    if let Some(url) = args.storage_url {
        wallet.storage_url = url;
    }
    if let Some(method) = args.auth_method {
        wallet.auth_method = Some(method);
    }

    if !args.offline {
        let client = AuthInfoClient::new(config.http_timeout)?;
        let info = client
            .fetch(&wallet.auth_url)
            .await
            .with_context(|| format!("Could not fetch auth info from {}", wallet.auth_url))?;
        match wallet.auth_method.as_deref() {
            Some(method) if !info.supports(method) => anyhow::bail!(
                "auth method '{method}' is not offered by {} (supported: {})",
                wallet.auth_url,
                info.supported_auth_methods.join(", ")
            ),
            Some(_) => {}
            None => match info.sole_method() {
                Some(method) => {
                    println!("Auto-selected auth method: {method}");
                    wallet.auth_method = Some(method.to_string());
                }
                None => anyhow::bail!(
                    "pick an auth method with --auth-method (supported: {})",
                    info.supported_auth_methods.join(", ")
                ),
            },
        }
    }

    wallet.validate()?;

    let vars = bootstrap_env_vars(&wallet);
    let pairs: Vec<(&str, &str)> = vars.iter().map(|(k, v)| (*k, v.as_str())).collect();
    save_bootstrap_env(&pairs)
        .with_context(|| format!("failed to write {}", walletdesk_env_path().display()))?;
    println!(
        "Configuration saved to {}",
        walletdesk_env_path().display()
    );
    Ok(())
}

fn run_snapshot(toml_path: Option<&Path>, command: SnapshotCommand) -> anyhow::Result<()> {
    let config = Config::from_env_with_toml(toml_path)?;
    let store = FileStore::open(&config.store_path)?;
    let snapshots = SnapshotStore::new(Arc::new(store));

    match command {
        SnapshotCommand::Status => match snapshots.load() {
            Ok(Some(bytes)) => println!("snapshot present ({} bytes)", bytes.len()),
            Ok(None) => println!("no snapshot stored"),
            Err(e) => println!("snapshot unusable: {e}"),
        },
        SnapshotCommand::Clear => {
            snapshots.clear()?;
            println!("snapshot cleared");
        }
    }
    Ok(())
}
