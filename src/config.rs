use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use solana_sdk::signature::Keypair;

use crate::execution::exit_strategy::{ExitPlan, LadderRung, TrailingStop};
use crate::execution::scheduler::SchedulerConfig;
use crate::execution::submitter::SubmitOptions;

pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Immutable bot configuration.
///
/// Loaded once at startup from an optional TOML file layered with
/// `SNIPER_`-prefixed environment variables, then passed by reference into
/// each component's constructor. Nothing reads configuration globally.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// RPC endpoints, best-first is decided at runtime by health/latency.
    pub rpc_urls: Vec<String>,
    /// Base58-encoded 64-byte keypair. Usually supplied via
    /// `SNIPER_WALLET_KEYPAIR` rather than the config file.
    pub wallet_keypair: Option<String>,
    pub base_mint: String,
    pub slippage_bps: u16,
    pub max_retries: u32,
    pub priority_fee_microlamports: Option<u64>,
    pub poll_interval_secs: u64,
    pub poll_jitter_secs: u64,
    pub price_timeout_secs: u64,
    pub confirm_timeout_secs: u64,
    /// Raw token units below which a position counts as fully closed.
    pub dust_threshold: u64,
    pub liquidation_concurrency: usize,
    pub ledger_path: Option<String>,
    pub exit: ExitConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExitConfig {
    pub stop_loss_roi: f64,
    pub ladder: Vec<LadderRungConfig>,
    pub trailing_activation_roi: f64,
    pub trail_fraction: f64,
    pub max_hold_minutes: i64,
    pub trend_sensitivity: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LadderRungConfig {
    pub roi_pct: f64,
    pub fraction: f64,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            rpc_urls: vec!["https://api.mainnet-beta.solana.com".to_string()],
            wallet_keypair: None,
            base_mint: SOL_MINT.to_string(),
            slippage_bps: 100,
            max_retries: 3,
            priority_fee_microlamports: Some(10_000),
            poll_interval_secs: 5,
            poll_jitter_secs: 1,
            price_timeout_secs: 10,
            confirm_timeout_secs: 45,
            dust_threshold: 1_000,
            liquidation_concurrency: 3,
            ledger_path: Some("data/fills.jsonl".to_string()),
            exit: ExitConfig::default(),
        }
    }
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            stop_loss_roi: -15.0,
            ladder: vec![
                LadderRungConfig { roi_pct: 25.0, fraction: 0.3 },
                LadderRungConfig { roi_pct: 60.0, fraction: 0.4 },
                LadderRungConfig { roi_pct: 100.0, fraction: 0.3 },
            ],
            trailing_activation_roi: 20.0,
            trail_fraction: 0.10,
            max_hold_minutes: 240,
            trend_sensitivity: 3,
        }
    }
}

impl BotConfig {
    /// Load configuration from an optional file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder.add_source(config::File::with_name("sniperbot").required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SNIPER")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("rpc_urls"),
        );

        let cfg: BotConfig = builder
            .build()
            .context("failed to assemble configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        anyhow::ensure!(!cfg.rpc_urls.is_empty(), "at least one RPC URL is required");
        Ok(cfg)
    }

    /// Decode the signing keypair from config or `SNIPER_WALLET_KEYPAIR`.
    pub fn load_keypair(&self) -> Result<Keypair> {
        let encoded = self
            .wallet_keypair
            .clone()
            .or_else(|| std::env::var("SNIPER_WALLET_KEYPAIR").ok())
            .context("no wallet keypair configured")?;

        let bytes = bs58::decode(encoded.trim())
            .into_vec()
            .context("wallet keypair is not valid base58")?;
        Keypair::from_bytes(&bytes).context("wallet keypair has invalid length")
    }

    pub fn exit_plan(&self) -> ExitPlan {
        ExitPlan {
            ladder: self
                .exit
                .ladder
                .iter()
                .map(|r| LadderRung {
                    roi_pct: r.roi_pct,
                    fraction: r.fraction,
                })
                .collect(),
            stop_loss_roi: self.exit.stop_loss_roi,
            trailing: Some(TrailingStop {
                activation_roi: self.exit.trailing_activation_roi,
                trail_fraction: self.exit.trail_fraction,
            }),
            max_hold: chrono::Duration::minutes(self.exit.max_hold_minutes),
            trend_sensitivity: self.exit.trend_sensitivity,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            poll_jitter: Duration::from_secs(self.poll_jitter_secs),
            price_timeout: Duration::from_secs(self.price_timeout_secs),
            dust_threshold: self.dust_threshold,
        }
    }

    pub fn submit_options(&self) -> SubmitOptions {
        SubmitOptions {
            max_retries: self.max_retries,
            confirm_timeout: Duration::from_secs(self.confirm_timeout_secs),
            priority_fee_microlamports: self.priority_fee_microlamports,
        }
    }
}
