use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lumen_crypto::{address_of, generate_secret_key, secret_key_from_hex};
use lumen_node::{bootstrap, unix_now, NodeConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lumen-node")]
#[command(about = "Lumen PoA authority node", long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single-authority devnet and pack blocks
    Start {
        /// Stop after packing this many blocks
        #[arg(long)]
        blocks: Option<usize>,

        /// Hex secret key of the node master; overrides the config file
        #[arg(long)]
        key: Option<String>,
    },

    /// Print a fresh node master key and its address
    Keygen,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = NodeConfig::load(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Start { blocks, key } => {
            let key = match key {
                Some(hex) => secret_key_from_hex(&hex)?,
                None => match cfg.master_key()? {
                    Some(key) => key,
                    None => {
                        warn!("no master key configured, using a throwaway key");
                        generate_secret_key()
                    }
                },
            };
            info!(master = %address_of(&key), "starting node");

            let node = bootstrap(&cfg, key)?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, shutting down");
                    on_signal.cancel();
                }
            });

            let packed = node.pack_loop.run(cancel, unix_now, blocks).await.context("packing loop failed")?;
            let best = node.chain.best_header()?;
            info!(packed, best = %best.id(), number = best.number(), "node stopped");
        }
        Commands::Keygen => {
            let key = generate_secret_key();
            println!("key:     0x{}", hex::encode(key.secret_bytes()));
            println!("address: {}", address_of(&key));
        }
    }

    Ok(())
}
