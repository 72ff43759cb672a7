use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use sniperbot::api::{DexScreenerClient, JupiterClient, PriceSource};
use sniperbot::config::BotConfig;
use sniperbot::execution::manager::{ExecutionConfig, ExecutionCore, PositionManager};
use sniperbot::execution::TxSubmitter;
use sniperbot::ledger::JsonlLedger;
use sniperbot::risk::{BreakerConfig, CircuitBreaker};
use sniperbot::rpc::{BlockhashCache, RpcPool, RpcPoolConfig};

#[derive(Parser)]
#[command(name = "sniperbot", about = "Token position engine with automated exits")]
struct Cli {
    /// Path to a TOML config file; falls back to sniperbot.toml and env vars.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Buy a token and monitor it until its exit plan closes it.
    Buy {
        /// Token mint address to buy.
        mint: String,
        /// Amount of the base currency to spend, in whole SOL.
        #[arg(long, default_value_t = 0.1)]
        amount_sol: f64,
        /// Sell out any remaining holdings when the bot exits.
        #[arg(long, default_value_t = true)]
        liquidate_on_exit: bool,
    },
    /// Print current market data for a token and exit.
    Price { mint: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();
    let config = BotConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Price { mint } => print_price(&mint).await,
        Command::Buy {
            mint,
            amount_sol,
            liquidate_on_exit,
        } => run_engine(&config, &mint, amount_sol, liquidate_on_exit).await,
    }
}

async fn print_price(mint: &str) -> Result<()> {
    let prices = DexScreenerClient::new();
    let info = prices.get_price(mint).await?;
    println!("mint:       {}", info.mint);
    println!("price:      {} SOL", info.native_price);
    println!("liquidity:  {:.2} (quote units)", info.liquidity_quote);
    println!("volume 24h: {:.2}", info.volume_24h);
    println!(
        "txns 24h:   {} buys / {} sells",
        info.txn_counts.buys, info.txn_counts.sells
    );
    Ok(())
}

async fn run_engine(
    config: &BotConfig,
    mint: &str,
    amount_sol: f64,
    liquidate_on_exit: bool,
) -> Result<()> {
    anyhow::ensure!(amount_sol > 0.0, "amount must be positive");
    let spend = (amount_sol * 1e9) as u64;

    let signer = Arc::new(config.load_keypair()?);
    let pool = Arc::new(RpcPool::new(&config.rpc_urls, RpcPoolConfig::default())?);
    let root = CancellationToken::new();
    pool.spawn_probe_task(root.child_token());

    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let blockhash = Arc::new(BlockhashCache::new(pool.clone()));
    let submitter = Arc::new(TxSubmitter::new(pool.clone(), blockhash, breaker.clone()));

    let prices: Arc<dyn PriceSource> = Arc::new(DexScreenerClient::new());
    let swap = Arc::new(JupiterClient::new());

    let ledger_path = config
        .ledger_path
        .clone()
        .unwrap_or_else(|| "data/fills.jsonl".to_string());
    let ledger = Arc::new(JsonlLedger::new(&ledger_path));

    let core = Arc::new(ExecutionCore::new(
        prices.clone(),
        swap,
        submitter,
        breaker.clone(),
        ledger,
        signer,
        ExecutionConfig {
            base_mint: config.base_mint.clone(),
            slippage_bps: config.slippage_bps,
            submit: config.submit_options(),
            liquidation_concurrency: config.liquidation_concurrency,
        },
    ));

    let manager = PositionManager::new(core, prices, breaker, config.scheduler_config());

    let position = manager
        .open_position(mint, spend, config.exit_plan())
        .await
        .context("failed to open position")?;
    tracing::info!(position_id = %position.id, "monitoring until exit plan completes");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, shutting down");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(5)) => {
                if manager.list_open_positions().await.is_empty() {
                    tracing::info!("all positions closed");
                    break;
                }
            }
        }
    }

    root.cancel();
    let report = manager
        .shutdown(liquidate_on_exit, Duration::from_secs(30))
        .await;
    println!(
        "shutdown: {} stopped, {} liquidated, {} failed",
        report.stopped,
        report.liquidated,
        report.failed.len()
    );
    for (mint, error) in &report.failed {
        println!("  {mint}: {error}");
    }
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sniperbot=info")),
        )
        .init();
}
