use clap::Parser;

use walletdesk::bootstrap::load_walletdesk_env;
use walletdesk::cli::{self, Cli};
use walletdesk::logging::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    load_walletdesk_env();

    let cli = Cli::parse();
    init_logging();

    cli::run(cli).await
}
