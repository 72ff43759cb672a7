use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::TradeSide;

/// One confirmed fill, buy or sell, as written to the trade ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillRecord {
    pub position_id: Uuid,
    pub mint: String,
    pub side: TradeSide,
    /// Raw token base units moved.
    pub amount: u64,
    /// Entry price for buys, proceeds in base units for sells.
    pub price_or_proceeds: f64,
    pub reason: String,
    pub signature: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Append-only record of confirmed fills.
///
/// Ledger writes are best-effort from the engine's point of view: a
/// failed append is logged and trading continues.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn record_fill(&self, fill: &FillRecord) -> Result<()>;
}

/// JSON-lines file ledger, one fill per line.
pub struct JsonlLedger {
    path: PathBuf,
}

impl JsonlLedger {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Ledger for JsonlLedger {
    async fn record_fill(&self, fill: &FillRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("creating ledger directory")?;
        }

        let mut line = serde_json::to_string(fill).context("serializing fill")?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening ledger at {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .context("appending fill")?;
        Ok(())
    }
}

/// In-memory ledger for tests.
pub struct MemoryLedger {
    fills: std::sync::Mutex<Vec<FillRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            fills: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn fills(&self) -> Vec<FillRecord> {
        self.fills.lock().expect("ledger lock poisoned").clone()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn record_fill(&self, fill: &FillRecord) -> Result<()> {
        self.fills
            .lock()
            .expect("ledger lock poisoned")
            .push(fill.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_fill() -> FillRecord {
        FillRecord {
            position_id: Uuid::new_v4(),
            mint: "MINT".to_string(),
            side: TradeSide::Sell,
            amount: 250_000,
            price_or_proceeds: 0.42,
            reason: "take_profit".to_string(),
            signature: Some("5Signature".to_string()),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_jsonl_appends_one_line_per_fill() {
        let dir = std::env::temp_dir().join(format!("ledger-test-{}", Uuid::new_v4()));
        let path = dir.join("fills.jsonl");
        let ledger = JsonlLedger::new(&path);

        ledger.record_fill(&sample_fill()).await.unwrap();
        ledger.record_fill(&sample_fill()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);

        let parsed: FillRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.mint, "MINT");
        assert_eq!(parsed.amount, 250_000);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_ledger_records_in_order() {
        let ledger = MemoryLedger::new();
        let mut fill = sample_fill();
        fill.side = TradeSide::Buy;
        ledger.record_fill(&fill).await.unwrap();
        ledger.record_fill(&sample_fill()).await.unwrap();

        let fills = ledger.fills();
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].side, TradeSide::Buy);
        assert_eq!(fills[1].side, TradeSide::Sell);
    }
}
