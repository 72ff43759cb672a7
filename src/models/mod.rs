use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An open token position.
///
/// Amounts are raw token base units (no decimal scaling anywhere in the
/// engine); prices are SOL per whole token as reported by the price API.
/// A position is owned exclusively by its monitor loop: `amount` only ever
/// decreases, and only after a confirmed sell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub mint: String,
    pub amount: u64,
    pub entry_amount: u64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub status: PositionStatus,
}

impl Position {
    pub fn new(mint: String, amount: u64, entry_price: f64, entry_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            mint,
            amount,
            entry_amount: amount,
            entry_price,
            entry_time,
            status: PositionStatus::Active,
        }
    }

    /// Fraction of the original entry still held.
    pub fn remaining_fraction(&self) -> f64 {
        if self.entry_amount == 0 {
            0.0
        } else {
            self.amount as f64 / self.entry_amount as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PositionStatus {
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "buy",
            TradeSide::Sell => "sell",
        }
    }
}

/// Buy/sell transaction counts over the last 24h, as reported by the pair
/// screener. Used by callers for liquidity sanity checks.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TxnCounts {
    pub buys: u64,
    pub sells: u64,
}

/// Point-in-time market data for one token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceInfo {
    pub mint: String,
    /// Price in SOL per whole token.
    pub native_price: f64,
    pub liquidity_base: f64,
    pub liquidity_quote: f64,
    pub volume_24h: f64,
    pub txn_counts: TxnCounts,
    pub timestamp: DateTime<Utc>,
}

/// Read-only snapshot of a monitored position, published by its loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub id: Uuid,
    pub mint: String,
    pub amount: u64,
    pub entry_amount: u64,
    pub entry_price: f64,
    pub entry_time: DateTime<Utc>,
    pub current_price: f64,
    pub roi_pct: f64,
    pub highest_price: f64,
    pub lowest_price: f64,
    pub status: PositionStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remaining_fraction() {
        let mut p = Position::new("MINT".to_string(), 1_000_000, 0.5, Utc::now());
        assert_eq!(p.remaining_fraction(), 1.0);

        p.amount = 300_000;
        assert!((p.remaining_fraction() - 0.3).abs() < 1e-9);

        p.amount = 0;
        assert_eq!(p.remaining_fraction(), 0.0);
    }

    #[test]
    fn test_zero_entry_amount_has_no_remaining() {
        let mut p = Position::new("MINT".to_string(), 0, 0.5, Utc::now());
        p.entry_amount = 0;
        assert_eq!(p.remaining_fraction(), 0.0);
    }
}
