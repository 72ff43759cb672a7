use std::num::NonZeroU32;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use tokio::time::{sleep, Duration};

use crate::models::{PriceInfo, TxnCounts};

use super::PriceSource;

const DEXSCREENER_API_BASE: &str = "https://api.dexscreener.com/latest/dex";
const RATE_LIMIT_RPM: u32 = 300;
const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;

type DexScreenerRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Client for the DexScreener pair API.
///
/// Cloneable; all clones share one rate limiter so concurrent position
/// loops cannot collectively exceed the API budget.
#[derive(Clone)]
pub struct DexScreenerClient {
    client: Client,
    base_url: String,
    rate_limiter: Arc<DexScreenerRateLimiter>,
}

#[derive(Debug, Deserialize)]
struct DexScreenerResponse {
    #[serde(default)]
    pairs: Option<Vec<PairData>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairData {
    chain_id: String,
    price_native: String,
    #[serde(default)]
    liquidity: Option<LiquidityData>,
    #[serde(default)]
    volume: VolumeData,
    #[serde(default)]
    txns: TxnData,
}

#[derive(Debug, Deserialize, Default)]
struct LiquidityData {
    #[serde(default)]
    base: f64,
    #[serde(default)]
    quote: f64,
    #[serde(default)]
    usd: f64,
}

#[derive(Debug, Deserialize, Default)]
struct VolumeData {
    #[serde(default)]
    h24: f64,
}

#[derive(Debug, Deserialize, Default)]
struct TxnData {
    #[serde(default)]
    h24: TxnWindow,
}

#[derive(Debug, Deserialize, Default)]
struct TxnWindow {
    #[serde(default)]
    buys: u64,
    #[serde(default)]
    sells: u64,
}

impl DexScreenerClient {
    pub fn new() -> Self {
        Self::with_base_url(DEXSCREENER_API_BASE.to_string())
    }

    /// Constructor with an overridable base URL, used by tests to point at
    /// a local mock server.
    pub fn with_base_url(base_url: String) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(RATE_LIMIT_RPM).unwrap());
        Self {
            client: Client::new(),
            base_url,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Fetch price data with retry and exponential backoff for transient
    /// failures.
    async fn get_price_with_retry(&self, mint: &str) -> Result<PriceInfo> {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            self.rate_limiter.until_ready().await;

            match self.fetch_price_once(mint).await {
                Ok(info) => {
                    if attempt > 1 {
                        tracing::info!(mint, attempt, "price fetch recovered");
                    }
                    return Ok(info);
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let backoff_ms = INITIAL_BACKOFF_MS * 2_u64.pow(attempt - 1);
                        tracing::warn!(
                            mint,
                            attempt,
                            max = MAX_RETRIES,
                            error = %e,
                            "price fetch failed, retrying in {}ms",
                            backoff_ms
                        );
                        sleep(Duration::from_millis(backoff_ms)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("all retry attempts failed")))
    }

    async fn fetch_price_once(&self, mint: &str) -> Result<PriceInfo> {
        let url = format!("{}/tokens/{}", self.base_url, mint);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .context("dexscreener request failed")?
            .error_for_status()
            .context("dexscreener returned error status")?;

        let body: DexScreenerResponse = response
            .json()
            .await
            .context("dexscreener response was not valid JSON")?;

        // Several pairs can exist per token; take the deepest Solana pool.
        let pair = body
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.chain_id == "solana")
            .max_by(|a, b| {
                let la = a.liquidity.as_ref().map(|l| l.usd).unwrap_or(0.0);
                let lb = b.liquidity.as_ref().map(|l| l.usd).unwrap_or(0.0);
                la.total_cmp(&lb)
            })
            .context("no solana pair found for token")?;

        let liquidity = pair.liquidity.unwrap_or_default();

        Ok(PriceInfo {
            mint: mint.to_string(),
            native_price: pair
                .price_native
                .parse()
                .context("unparseable priceNative")?,
            liquidity_base: liquidity.base,
            liquidity_quote: liquidity.quote,
            volume_24h: pair.volume.h24,
            txn_counts: TxnCounts {
                buys: pair.txns.h24.buys,
                sells: pair.txns.h24.sells,
            },
            timestamp: Utc::now(),
        })
    }
}

impl Default for DexScreenerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for DexScreenerClient {
    async fn get_price(&self, mint: &str) -> Result<PriceInfo> {
        self.get_price_with_retry(mint).await
    }
}
