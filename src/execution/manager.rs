use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use solana_sdk::signature::{Keypair, Signer};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::api::{PriceSource, SwapService};
use crate::error::TradeError;
use crate::ledger::{FillRecord, Ledger};
use crate::models::{Position, PositionStatus, PositionSummary, TradeSide};
use crate::risk::{Category, CircuitBreaker};

use super::exit_strategy::{ExitPlan, ExitReason};
use super::scheduler::{PositionScheduler, SchedulerConfig, SellExecutor};
use super::submitter::{SubmitOptions, TxSubmitter};

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    pub base_mint: String,
    pub slippage_bps: u16,
    pub submit: SubmitOptions,
    pub liquidation_concurrency: usize,
}

/// Swap plumbing shared by entries, exits and liquidation.
///
/// This is the only component that talks to the router and signs
/// transactions; the scheduler drives it through the `SellExecutor`
/// seam and never touches the chain itself.
pub struct ExecutionCore {
    price_source: Arc<dyn PriceSource>,
    swap: Arc<dyn SwapService>,
    submitter: Arc<TxSubmitter>,
    breaker: Arc<CircuitBreaker>,
    ledger: Arc<dyn Ledger>,
    signer: Arc<Keypair>,
    config: ExecutionConfig,
    /// Mints whose swaps were rejected in simulation; never traded again
    /// this run.
    blacklist: Mutex<HashSet<String>>,
}

impl ExecutionCore {
    pub fn new(
        price_source: Arc<dyn PriceSource>,
        swap: Arc<dyn SwapService>,
        submitter: Arc<TxSubmitter>,
        breaker: Arc<CircuitBreaker>,
        ledger: Arc<dyn Ledger>,
        signer: Arc<Keypair>,
        config: ExecutionConfig,
    ) -> Self {
        Self {
            price_source,
            swap,
            submitter,
            breaker,
            ledger,
            signer,
            config,
            blacklist: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_blacklisted(&self, mint: &str) -> bool {
        self.blacklist
            .lock()
            .expect("blacklist lock poisoned")
            .contains(mint)
    }

    fn blacklist_mint(&self, mint: &str) {
        self.blacklist
            .lock()
            .expect("blacklist lock poisoned")
            .insert(mint.to_string());
        tracing::warn!(mint, "mint blacklisted after simulation rejection");
    }

    /// Swap `spend` base units of the quote currency into `mint`.
    async fn execute_buy(&self, mint: &str, spend: u64) -> Result<Position> {
        let price = self
            .price_source
            .get_price(mint)
            .await
            .context("price lookup for entry")?;

        let quote = self
            .swap
            .quote(&self.config.base_mint, mint, spend, self.config.slippage_bps)
            .await
            .context("quoting entry swap")?;
        anyhow::ensure!(quote.out_amount > 0, "router quoted zero output");

        let instructions = self
            .swap
            .swap_instructions(&quote, &self.signer.pubkey())
            .await
            .context("building entry swap instructions")?;

        let signature = self
            .submit_guarded(mint, &instructions)
            .await
            .context("submitting entry swap")?;

        let position = Position::new(
            mint.to_string(),
            quote.out_amount,
            price.native_price,
            Utc::now(),
        );

        let fill = FillRecord {
            position_id: position.id,
            mint: mint.to_string(),
            side: TradeSide::Buy,
            amount: quote.out_amount,
            price_or_proceeds: price.native_price,
            reason: "entry".to_string(),
            signature: Some(signature.to_string()),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.ledger.record_fill(&fill).await {
            tracing::warn!(error = %e, "failed to record buy fill");
        }

        tracing::info!(
            position_id = %position.id,
            mint,
            amount = position.amount,
            entry_price = position.entry_price,
            %signature,
            "position opened"
        );
        Ok(position)
    }

    async fn submit_guarded(
        &self,
        mint: &str,
        instructions: &[solana_sdk::instruction::Instruction],
    ) -> Result<solana_sdk::signature::Signature, TradeError> {
        let result = self
            .submitter
            .submit(instructions, &self.signer, &self.config.submit)
            .await;
        if let Err(TradeError::SimulationRejected(_)) = &result {
            self.blacklist_mint(mint);
        }
        result
    }
}

#[async_trait]
impl SellExecutor for ExecutionCore {
    async fn execute_sell(
        &self,
        position: &Position,
        fraction: f64,
        reason: ExitReason,
    ) -> Result<u64> {
        let raw = ((position.amount as f64 * fraction).round() as u64).min(position.amount);
        if raw == 0 {
            // Rounded to nothing sellable; no transaction, no fill.
            tracing::debug!(
                position_id = %position.id,
                amount = position.amount,
                fraction,
                "sell amount rounds to zero, skipping"
            );
            return Ok(0);
        }

        let quote = self
            .swap
            .quote(&position.mint, &self.config.base_mint, raw, self.config.slippage_bps)
            .await
            .context("quoting exit swap")?;

        let instructions = self
            .swap
            .swap_instructions(&quote, &self.signer.pubkey())
            .await
            .context("building exit swap instructions")?;

        let signature = self
            .submit_guarded(&position.mint, &instructions)
            .await
            .context("submitting exit swap")?;

        let fill = FillRecord {
            position_id: position.id,
            mint: position.mint.clone(),
            side: TradeSide::Sell,
            amount: raw,
            price_or_proceeds: quote.out_amount as f64,
            reason: reason.as_str().to_string(),
            signature: Some(signature.to_string()),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.ledger.record_fill(&fill).await {
            tracing::warn!(error = %e, "failed to record sell fill");
        }

        tracing::info!(
            position_id = %position.id,
            mint = %position.mint,
            sold = raw,
            proceeds = quote.out_amount,
            reason = reason.as_str(),
            %signature,
            "sell confirmed"
        );
        Ok(raw)
    }
}

/// Outcome of an engine shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Positions whose monitor loops were stopped.
    pub stopped: usize,
    /// Positions sold out during shutdown.
    pub liquidated: usize,
    /// Mint and error for each liquidation that failed.
    pub failed: Vec<(String, String)>,
}

/// Public face of the engine: opens positions, lists them, shuts down.
pub struct PositionManager {
    core: Arc<ExecutionCore>,
    scheduler: PositionScheduler,
}

impl PositionManager {
    pub fn new(
        core: Arc<ExecutionCore>,
        price_source: Arc<dyn PriceSource>,
        breaker: Arc<CircuitBreaker>,
        scheduler_config: SchedulerConfig,
    ) -> Self {
        let scheduler = PositionScheduler::new(
            price_source,
            core.clone(),
            breaker,
            scheduler_config,
        );
        Self { core, scheduler }
    }

    /// Buy into `mint` and put the resulting position under monitoring.
    pub async fn open_position(
        &self,
        mint: &str,
        spend: u64,
        plan: ExitPlan,
    ) -> Result<Position> {
        plan.validate()?;
        anyhow::ensure!(spend > 0, "spend amount must be positive");
        anyhow::ensure!(
            !self.core.is_blacklisted(mint),
            "mint {mint} is blacklisted"
        );
        anyhow::ensure!(
            !self.core.breaker.is_open(Category::Execution),
            "execution circuit breaker is open"
        );

        let position = self.core.execute_buy(mint, spend).await?;
        self.scheduler.start(position.clone(), plan).await;
        Ok(position)
    }

    pub async fn list_open_positions(&self) -> Vec<PositionSummary> {
        self.scheduler.list().await
    }

    pub async fn update_plan(&self, id: Uuid, plan: ExitPlan) -> Result<()> {
        self.scheduler.update_plan(id, plan).await
    }

    /// Stop all monitor loops and, when asked, sell out what they held.
    ///
    /// Liquidation runs with bounded concurrency so a shutdown with many
    /// positions cannot stampede the RPC endpoints.
    pub async fn shutdown(&self, liquidate: bool, deadline: Duration) -> ShutdownReport {
        let positions = self.scheduler.stop_all(deadline).await;
        let mut report = ShutdownReport {
            stopped: positions.len(),
            ..Default::default()
        };

        if !liquidate {
            return report;
        }

        let semaphore = Arc::new(Semaphore::new(self.core.config.liquidation_concurrency.max(1)));
        let mut tasks = Vec::new();

        for position in positions {
            if position.amount == 0 || position.status == PositionStatus::Closed {
                continue;
            }
            let core = self.core.clone();
            let semaphore = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let result = core
                    .execute_sell(&position, 1.0, ExitReason::Liquidation)
                    .await;
                (position.mint, result)
            }));
        }

        for task in tasks {
            match task.await {
                Ok((_, Ok(_))) => report.liquidated += 1,
                Ok((mint, Err(e))) => report.failed.push((mint, e.to_string())),
                Err(e) => report.failed.push(("<unknown>".to_string(), e.to_string())),
            }
        }

        tracing::info!(
            stopped = report.stopped,
            liquidated = report.liquidated,
            failed = report.failed.len(),
            "shutdown complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::SwapQuote;
    use crate::ledger::MemoryLedger;
    use crate::models::PriceInfo;
    use crate::rpc::{BlockhashCache, RpcGateway};
    use solana_sdk::hash::Hash;
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;
    use std::time::Duration;

    struct StaticPrice;

    #[async_trait]
    impl PriceSource for StaticPrice {
        async fn get_price(&self, mint: &str) -> Result<PriceInfo> {
            Ok(PriceInfo {
                mint: mint.to_string(),
                native_price: 1.0,
                liquidity_base: 0.0,
                liquidity_quote: 0.0,
                volume_24h: 0.0,
                txn_counts: crate::models::TxnCounts::default(),
                timestamp: Utc::now(),
            })
        }
    }

    /// Any call means the code under test reached the router when it
    /// should not have.
    struct UnreachableSwap;

    #[async_trait]
    impl SwapService for UnreachableSwap {
        async fn quote(
            &self,
            _input_mint: &str,
            _output_mint: &str,
            _amount: u64,
            _slippage_bps: u16,
        ) -> Result<SwapQuote> {
            panic!("router must not be called");
        }

        async fn swap_instructions(
            &self,
            _quote: &SwapQuote,
            _user: &solana_sdk::pubkey::Pubkey,
        ) -> Result<Vec<solana_sdk::instruction::Instruction>> {
            panic!("router must not be called");
        }
    }

    struct NullGateway;

    #[async_trait]
    impl RpcGateway for NullGateway {
        async fn latest_blockhash(&self) -> std::result::Result<(Hash, u64), TradeError> {
            Ok((Hash::new_unique(), 1))
        }

        async fn send_transaction(
            &self,
            tx: &VersionedTransaction,
        ) -> std::result::Result<Signature, TradeError> {
            Ok(tx.signatures[0])
        }

        async fn confirm_signature(
            &self,
            _sig: &Signature,
            _timeout: Duration,
        ) -> std::result::Result<(), TradeError> {
            Ok(())
        }
    }

    fn core_with_unreachable_swap(ledger: Arc<MemoryLedger>) -> ExecutionCore {
        let gateway = Arc::new(NullGateway);
        let breaker = Arc::new(CircuitBreaker::default());
        let blockhash = Arc::new(BlockhashCache::new(gateway.clone()));
        let submitter = Arc::new(TxSubmitter::new(gateway, blockhash, breaker.clone()));
        ExecutionCore::new(
            Arc::new(StaticPrice),
            Arc::new(UnreachableSwap),
            submitter,
            breaker,
            ledger,
            Arc::new(Keypair::new()),
            ExecutionConfig {
                base_mint: "So11111111111111111111111111111111111111112".to_string(),
                slippage_bps: 100,
                submit: SubmitOptions::default(),
                liquidation_concurrency: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_zero_rounded_sell_moves_nothing() {
        let ledger = Arc::new(MemoryLedger::new());
        let core = core_with_unreachable_swap(ledger.clone());

        // 3 raw units at 10%: rounds to zero sellable.
        let position = Position::new("MINT".to_string(), 3, 1.0, Utc::now());
        let sold = core
            .execute_sell(&position, 0.1, ExitReason::TakeProfit)
            .await
            .unwrap();

        assert_eq!(sold, 0);
        assert!(ledger.fills().is_empty());
    }
}
