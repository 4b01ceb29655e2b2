//! cryptopay-settlement CLI entry point.

mod cli;

use clap::Parser;
use cli::{Cli, Command};
use color_eyre::eyre::eyre;
use cryptopay_settlement::config::default_config_path;
use cryptopay_settlement::{ServiceBuilder, ServiceConfig, TransactionVerifier};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    info!("cryptopay-settlement v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        None | Some(Command::Run) => {
            let config = cli.load_config()?;
            let mut service = ServiceBuilder::new(config).build().await?;
            service.run().await?;
        }
        Some(Command::Verify {
            ref currency,
            ref tx,
            ref address,
            amount,
        }) => {
            let config = cli.load_config()?;
            let address = match address {
                Some(address) => address.clone(),
                None => config
                    .payment_address(currency)
                    .map(str::to_string)
                    .ok_or_else(|| eyre!("no payment address configured for {currency}"))?,
            };
            let verifier = TransactionVerifier::from_config(&config)?;
            let result = verifier.verify(currency, tx, &address, amount).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Some(Command::InitConfig { ref path }) => {
            let path = path.clone().unwrap_or_else(default_config_path);
            if path.exists() {
                return Err(eyre!("{} already exists", path.display()));
            }
            ServiceConfig::default().to_file(&path)?;
            info!("Wrote default configuration to {}", path.display());
        }
    }

    info!("Goodbye!");
    Ok(())
}
