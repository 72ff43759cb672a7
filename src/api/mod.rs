pub mod dexscreener;
pub mod jupiter;

use anyhow::Result;
use async_trait::async_trait;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;

use crate::models::PriceInfo;

pub use dexscreener::DexScreenerClient;
pub use jupiter::JupiterClient;

/// Live market data lookup for one token.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn get_price(&self, mint: &str) -> Result<PriceInfo>;
}

/// A swap quote, kept alongside the router's raw response so the follow-up
/// instruction request can echo it back unmodified.
#[derive(Debug, Clone)]
pub struct SwapQuote {
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: u64,
    pub out_amount: u64,
    pub price_impact_pct: f64,
    pub raw: serde_json::Value,
}

/// Swap routing: price a trade, then materialize it as instructions ready
/// for signing and submission.
#[async_trait]
pub trait SwapService: Send + Sync {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        slippage_bps: u16,
    ) -> Result<SwapQuote>;

    async fn swap_instructions(
        &self,
        quote: &SwapQuote,
        user: &Pubkey,
    ) -> Result<Vec<Instruction>>;
}
