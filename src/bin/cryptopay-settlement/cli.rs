//! Command-line interface definition.

use clap::{Parser, Subcommand};
use cryptopay_settlement::config::{default_config_path, ServiceConfig};
use rust_decimal::Decimal;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Crypto payment verification, settlement and AML compliance service.
#[derive(Parser, Debug)]
#[command(name = "cryptopay-settlement")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(long, short, global = true, env = "CRYPTOPAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// HTTP listen address.
    #[arg(long, global = true, env = "CRYPTOPAY_LISTEN_ADDR")]
    pub listen_addr: Option<SocketAddr>,

    /// Upper bound on one chain round-trip, in seconds.
    #[arg(long, global = true, env = "CRYPTOPAY_CHAIN_TIMEOUT_SECS")]
    pub chain_timeout_secs: Option<u64>,

    /// Log level.
    #[arg(long, global = true, default_value = "info", env = "CRYPTOPAY_LOG_LEVEL")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "CRYPTOPAY_JSON_LOGS")]
    pub json_logs: bool,

    /// Command to run; defaults to `run`.
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the HTTP interface until Ctrl-C.
    Run,

    /// Verify one transaction on-chain and print the result.
    Verify {
        /// Currency code, e.g. BTC.
        #[arg(long)]
        currency: String,

        /// Transaction reference.
        #[arg(long)]
        tx: String,

        /// Expected receiving address; defaults to the configured one.
        #[arg(long)]
        address: Option<String>,

        /// Expected amount in display units.
        #[arg(long)]
        amount: Decimal,
    },

    /// Write a default configuration file.
    InitConfig {
        /// Destination; defaults to the per-user config location.
        path: Option<PathBuf>,
    },
}

impl Cli {
    /// Load the configuration file, then apply CLI overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file is specified but cannot be loaded.
    pub fn load_config(&self) -> color_eyre::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    ServiceConfig::from_file(&path)?
                } else {
                    ServiceConfig::default()
                }
            }
        };

        if let Some(addr) = self.listen_addr {
            config.listen_addr = addr;
        }
        if let Some(secs) = self.chain_timeout_secs {
            config.chain_timeout_secs = secs;
        }
        config.log_level.clone_from(&self.log_level);

        config.validate()?;
        Ok(config)
    }
}
