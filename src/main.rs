//! `wallet-sync` command line.
//!
//! Drives a [`WalletEngine`] against a JSON-RPC endpoint with a local-key
//! wallet. The key is read from `WALLET_SYNC_PRIVATE_KEY`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use wallet_sync::blockchain::{BlockchainClient, LocalWallet};
use wallet_sync::config::{load_config, EngineConfig};
use wallet_sync::notify::LogNotifier;
use wallet_sync::observability::{logging, metrics};
use wallet_sync::tokens::TokenRegistry;
use wallet_sync::tracker::PendingTransaction;
use wallet_sync::{EngineEvent, WalletEngine};

#[derive(Parser)]
#[command(name = "wallet-sync")]
#[command(about = "Wallet balance sync and ERC20 transfer tracking", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print native and token balances
    Balances,
    /// Quote the fee for a transfer
    Estimate {
        #[arg(short, long)]
        amount: String,
        #[arg(short, long)]
        to: String,
    },
    /// Send a transfer and wait for it to resolve
    Send {
        #[arg(short, long)]
        amount: String,
        #[arg(short, long)]
        to: String,
    },
    /// Stream engine events until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EngineConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!("wallet-sync v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let ledger = BlockchainClient::new(config.blockchain.clone()).await?;
    let wallet = LocalWallet::from_env(&config.blockchain.rpc_url, config.blockchain.chain_id)?;
    let tokens = TokenRegistry::from_config(&config.tokens)?;
    let engine = WalletEngine::new(
        &config,
        Some(Arc::new(wallet)),
        Arc::new(ledger),
        Arc::new(LogNotifier),
        &tokens,
    )?;

    let mut events = engine.subscribe();
    engine.connect().await?;

    match cli.command {
        Commands::Balances => {
            let snapshot = match engine.balances() {
                Some(snapshot) => snapshot,
                None => engine
                    .refresh_balances()
                    .await?
                    .map(Arc::new)
                    .ok_or("session changed during refresh")?,
            };
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "address": snapshot.address,
                    "block_number": snapshot.block_number,
                    "native": snapshot.native(),
                    "token": snapshot.token(),
                    "symbol": snapshot.token_symbol,
                }))?
            );
        }
        Commands::Estimate { amount, to } => {
            let quote = engine.estimate_transfer(&amount, &to).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "gas_units": quote.gas_units,
                    "gas_price_gwei": quote.gas_price_gwei(),
                    "fee_wei": quote.fee_wei().to_string(),
                    "fee": quote.fee_native(),
                }))?
            );
        }
        Commands::Send { amount, to } => {
            let quote = engine.estimate_transfer(&amount, &to).await?;
            let submitted = engine.submit_transfer_with_quote(&amount, &to, quote).await?;
            print_transaction(&submitted)?;

            let budget = Duration::from_millis(
                config.tracking.receipt_poll_interval_ms
                    * (config.tracking.max_receipt_attempts as u64 + 1),
            );
            let resolved = tokio::time::timeout(budget, async {
                loop {
                    match events.recv().await {
                        Ok(EngineEvent::TransactionStatusChanged(tx))
                            if tx.hash == submitted.hash && tx.is_terminal() =>
                        {
                            return Some(tx)
                        }
                        Ok(_) | Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => return None,
                    }
                }
            })
            .await;
            match resolved {
                Ok(Some(tx)) => print_transaction(&tx)?,
                _ => tracing::warn!("Transfer did not resolve while waiting"),
            }
        }
        Commands::Watch => loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => println!("{}", serde_json::to_string(&event)?),
                    Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event stream lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        },
    }

    engine.disconnect();
    tracing::info!("Shutdown complete");
    Ok(())
}

fn print_transaction(tx: &PendingTransaction) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(tx)?);
    Ok(())
}
