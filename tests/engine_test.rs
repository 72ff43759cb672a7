//! End-to-end engine tests over mocked market data and RPC.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use solana_sdk::hash::Hash;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signature};
use solana_sdk::transaction::VersionedTransaction;

use sniperbot::api::{PriceSource, SwapQuote, SwapService};
use sniperbot::error::TradeError;
use sniperbot::execution::manager::{ExecutionConfig, ExecutionCore, PositionManager};
use sniperbot::execution::{ExitPlan, LadderRung, SchedulerConfig, SubmitOptions, TxSubmitter};
use sniperbot::ledger::MemoryLedger;
use sniperbot::models::{PriceInfo, TradeSide, TxnCounts};
use sniperbot::risk::{BreakerConfig, CircuitBreaker};
use sniperbot::rpc::{BlockhashCache, RpcGateway};

/// Serves a scripted price path, repeating the final price. An optional
/// delay after `fast_calls` simulates a degraded price API.
struct ScriptedPrices {
    prices: Vec<f64>,
    calls: AtomicUsize,
    fast_calls: usize,
    slow_delay: Duration,
}

impl ScriptedPrices {
    fn new(prices: Vec<f64>) -> Self {
        Self {
            prices,
            calls: AtomicUsize::new(0),
            fast_calls: usize::MAX,
            slow_delay: Duration::ZERO,
        }
    }

    fn slow_after(prices: Vec<f64>, fast_calls: usize, slow_delay: Duration) -> Self {
        Self {
            prices,
            calls: AtomicUsize::new(0),
            fast_calls,
            slow_delay,
        }
    }
}

#[async_trait]
impl PriceSource for ScriptedPrices {
    async fn get_price(&self, mint: &str) -> anyhow::Result<PriceInfo> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n >= self.fast_calls {
            tokio::time::sleep(self.slow_delay).await;
        }
        let price = *self
            .prices
            .get(n)
            .or_else(|| self.prices.last())
            .ok_or_else(|| anyhow::anyhow!("no prices scripted"))?;
        Ok(PriceInfo {
            mint: mint.to_string(),
            native_price: price,
            liquidity_base: 1_000_000.0,
            liquidity_quote: 500.0,
            volume_24h: 10_000.0,
            txn_counts: TxnCounts { buys: 40, sells: 25 },
            timestamp: Utc::now(),
        })
    }
}

/// Quotes a fixed 1000-units-out-per-unit-in rate and produces empty
/// instruction lists; the mocked gateway accepts anything.
struct MockSwapService;

#[async_trait]
impl SwapService for MockSwapService {
    async fn quote(
        &self,
        input_mint: &str,
        output_mint: &str,
        amount: u64,
        _slippage_bps: u16,
    ) -> anyhow::Result<SwapQuote> {
        Ok(SwapQuote {
            input_mint: input_mint.to_string(),
            output_mint: output_mint.to_string(),
            in_amount: amount,
            out_amount: amount.saturating_mul(1000).max(1),
            price_impact_pct: 0.01,
            raw: serde_json::json!({}),
        })
    }

    async fn swap_instructions(
        &self,
        _quote: &SwapQuote,
        _user: &Pubkey,
    ) -> anyhow::Result<Vec<Instruction>> {
        Ok(vec![])
    }
}

/// Always-healthy gateway that confirms instantly.
struct AcceptingGateway {
    sends: AtomicUsize,
}

impl AcceptingGateway {
    fn new() -> Self {
        Self {
            sends: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl RpcGateway for AcceptingGateway {
    async fn latest_blockhash(&self) -> Result<(Hash, u64), TradeError> {
        Ok((Hash::new_unique(), 100))
    }

    async fn send_transaction(
        &self,
        tx: &VersionedTransaction,
    ) -> Result<Signature, TradeError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(tx.signatures[0])
    }

    async fn confirm_signature(
        &self,
        _sig: &Signature,
        _timeout: Duration,
    ) -> Result<(), TradeError> {
        Ok(())
    }
}

struct Harness {
    manager: PositionManager,
    ledger: Arc<MemoryLedger>,
}

fn build_harness(prices: Arc<ScriptedPrices>) -> Harness {
    let gateway = Arc::new(AcceptingGateway::new());
    let breaker = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let blockhash = Arc::new(BlockhashCache::new(gateway.clone()));
    let submitter = Arc::new(TxSubmitter::new(gateway, blockhash, breaker.clone()));
    let ledger = Arc::new(MemoryLedger::new());

    let core = Arc::new(ExecutionCore::new(
        prices.clone(),
        Arc::new(MockSwapService),
        submitter,
        breaker.clone(),
        ledger.clone(),
        Arc::new(Keypair::new()),
        ExecutionConfig {
            base_mint: "So11111111111111111111111111111111111111112".to_string(),
            slippage_bps: 100,
            submit: SubmitOptions {
                max_retries: 1,
                confirm_timeout: Duration::from_secs(5),
                priority_fee_microlamports: None,
            },
            liquidation_concurrency: 3,
        },
    ));

    let manager = PositionManager::new(
        core,
        prices,
        breaker,
        SchedulerConfig {
            poll_interval: Duration::from_millis(30),
            poll_jitter: Duration::from_millis(0),
            price_timeout: Duration::from_millis(500),
            dust_threshold: 1_000,
        },
    );

    Harness { manager, ledger }
}

fn test_plan() -> ExitPlan {
    ExitPlan {
        ladder: vec![
            LadderRung { roi_pct: 25.0, fraction: 0.5 },
            LadderRung { roi_pct: 60.0, fraction: 0.5 },
        ],
        stop_loss_roi: -15.0,
        trailing: None,
        max_hold: chrono::Duration::hours(4),
        trend_sensitivity: 3,
    }
}

#[tokio::test]
async fn test_open_then_stop_loss_closes_position() {
    // Entry at 1.0, then the price collapses past the -15% stop.
    let prices = Arc::new(ScriptedPrices::new(vec![1.0, 1.0, 0.95, 0.70]));
    let harness = build_harness(prices);

    let position = harness
        .manager
        .open_position("TokenMint1111111111111111111111111111111111", 100_000_000, test_plan())
        .await
        .unwrap();
    assert_eq!(position.amount, 100_000_000u64 * 1000);

    // Give the monitor loop time to hit the stop and sell out.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(harness.manager.list_open_positions().await.is_empty());

    let fills = harness.ledger.fills();
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[0].side, TradeSide::Buy);
    assert_eq!(fills[0].reason, "entry");
    assert_eq!(fills[1].side, TradeSide::Sell);
    assert_eq!(fills[1].reason, "stop_loss");
    assert_eq!(fills[1].amount, position.amount);
}

#[tokio::test]
async fn test_take_profit_ladder_partial_exits() {
    // Climb through both rungs.
    let prices = Arc::new(ScriptedPrices::new(vec![1.0, 1.0, 1.30, 1.70, 1.70]));
    let harness = build_harness(prices);

    harness
        .manager
        .open_position("TokenMint2222222222222222222222222222222222", 1_000_000, test_plan())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let fills = harness.ledger.fills();
    let sells: Vec<_> = fills.iter().filter(|f| f.side == TradeSide::Sell).collect();
    assert_eq!(sells.len(), 2);
    assert!(sells.iter().all(|f| f.reason == "take_profit"));
    // Both rungs are half the entry; the second sell clears the rest.
    let total_sold: u64 = sells.iter().map(|f| f.amount).sum();
    assert_eq!(total_sold, 1_000_000u64 * 1000);
    assert!(harness.manager.list_open_positions().await.is_empty());
}

#[tokio::test]
async fn test_shutdown_deadline_with_degraded_price_source() {
    // Ten entries get fast prices, then every poll hangs for 10 seconds.
    let prices = Arc::new(ScriptedPrices::slow_after(
        vec![1.0],
        10,
        Duration::from_secs(10),
    ));
    let harness = build_harness(prices);

    for i in 0..10 {
        harness
            .manager
            .open_position(&format!("Mint{i}"), 1_000_000, test_plan())
            .await
            .unwrap();
    }
    assert_eq!(harness.manager.list_open_positions().await.len(), 10);

    let started = Instant::now();
    let report = harness.manager.shutdown(false, Duration::from_secs(2)).await;
    assert!(
        started.elapsed() < Duration::from_secs(4),
        "shutdown took {:?}",
        started.elapsed()
    );
    assert_eq!(report.stopped, 10);
    assert_eq!(report.liquidated, 0);
}

#[tokio::test]
async fn test_shutdown_liquidates_remaining_holdings() {
    // Price never moves, so no exit fires before shutdown.
    let prices = Arc::new(ScriptedPrices::new(vec![1.0]));
    let harness = build_harness(prices);

    for i in 0..3 {
        harness
            .manager
            .open_position(&format!("HeldMint{i}"), 1_000_000, test_plan())
            .await
            .unwrap();
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = harness.manager.shutdown(true, Duration::from_secs(2)).await;

    assert_eq!(report.stopped, 3);
    assert_eq!(report.liquidated, 3);
    assert!(report.failed.is_empty());

    let fills = harness.ledger.fills();
    let liquidations: Vec<_> = fills
        .iter()
        .filter(|f| f.reason == "liquidation")
        .collect();
    assert_eq!(liquidations.len(), 3);
}
