use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::PriceSource;
use crate::models::{Position, PositionStatus, PositionSummary};
use crate::risk::{Category, CircuitBreaker};

use super::exit_strategy::{Decision, ExitPlan, ExitReason, ExitStrategy};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    /// Random extra sleep added per tick so loops drift apart instead of
    /// hammering the price API in lockstep.
    pub poll_jitter: Duration,
    pub price_timeout: Duration,
    /// Raw token units at or below which a position counts as closed.
    pub dust_threshold: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            poll_jitter: Duration::from_secs(1),
            price_timeout: Duration::from_secs(10),
            dust_threshold: 1_000,
        }
    }
}

/// Turns a sell decision into a confirmed on-chain fill.
///
/// Returns the raw amount actually sold. The scheduler owns the position
/// and applies the returned amount itself.
#[async_trait]
pub trait SellExecutor: Send + Sync {
    async fn execute_sell(
        &self,
        position: &Position,
        fraction: f64,
        reason: ExitReason,
    ) -> anyhow::Result<u64>;
}

struct LoopHandle {
    join: JoinHandle<Position>,
    cancel: CancellationToken,
    snapshot: watch::Receiver<PositionSummary>,
    plan_tx: watch::Sender<ExitPlan>,
}

/// One monitor loop per open position.
///
/// Each loop exclusively owns its `Position` and `ExitStrategy`; the only
/// cross-loop state is the shared circuit breaker and the read-only
/// snapshots published over watch channels.
pub struct PositionScheduler {
    loops: Arc<Mutex<HashMap<Uuid, LoopHandle>>>,
    price_source: Arc<dyn PriceSource>,
    executor: Arc<dyn SellExecutor>,
    breaker: Arc<CircuitBreaker>,
    config: SchedulerConfig,
    root: CancellationToken,
}

impl PositionScheduler {
    pub fn new(
        price_source: Arc<dyn PriceSource>,
        executor: Arc<dyn SellExecutor>,
        breaker: Arc<CircuitBreaker>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            loops: Arc::new(Mutex::new(HashMap::new())),
            price_source,
            executor,
            breaker,
            config,
            root: CancellationToken::new(),
        }
    }

    /// Spawn a monitor loop for a freshly opened position.
    pub async fn start(&self, position: Position, plan: ExitPlan) -> Uuid {
        let id = position.id;
        let cancel = self.root.child_token();
        let (snapshot_tx, snapshot_rx) = watch::channel(summarize(&position, position.entry_price, 0.0));
        let (plan_tx, plan_rx) = watch::channel(plan.clone());

        let ctx = MonitorContext {
            price_source: self.price_source.clone(),
            executor: self.executor.clone(),
            breaker: self.breaker.clone(),
            config: self.config.clone(),
            loops: Arc::clone(&self.loops),
            cancel: cancel.clone(),
            snapshot_tx,
            plan_rx,
        };

        let join = tokio::spawn(monitor_loop(ctx, position, plan));

        let mut loops = self.loops.lock().await;
        loops.insert(
            id,
            LoopHandle {
                join,
                cancel,
                snapshot: snapshot_rx,
                plan_tx,
            },
        );
        tracing::info!(position_id = %id, "position monitor started");
        id
    }

    /// Stop one loop and hand back the position as the loop last saw it.
    pub async fn stop(&self, id: Uuid) -> Option<Position> {
        let handle = self.loops.lock().await.remove(&id)?;
        handle.cancel.cancel();
        match handle.join.await {
            Ok(position) => Some(position),
            Err(e) => {
                tracing::error!(position_id = %id, error = %e, "monitor loop panicked");
                None
            }
        }
    }

    /// Stop every loop, waiting up to `deadline` for them to settle.
    /// Loops that miss the deadline are aborted; their last published
    /// snapshot stands in for the owned position.
    pub async fn stop_all(&self, deadline: Duration) -> Vec<Position> {
        let handles: Vec<(Uuid, LoopHandle)> =
            self.loops.lock().await.drain().collect();

        for (_, handle) in &handles {
            handle.cancel.cancel();
        }

        // One absolute deadline shared by every join; a stuck loop cannot
        // grant the ones after it extra time.
        let deadline = Instant::now() + deadline;
        let mut positions = Vec::with_capacity(handles.len());
        for (id, mut handle) in handles {
            match timeout_at(deadline, &mut handle.join).await {
                Ok(Ok(position)) => positions.push(position),
                Ok(Err(e)) => {
                    tracing::error!(position_id = %id, error = %e, "monitor loop panicked during shutdown");
                }
                Err(_) => {
                    tracing::warn!(position_id = %id, "monitor loop missed shutdown deadline, aborting");
                    handle.join.abort();
                    let snap = handle.snapshot.borrow().clone();
                    positions.push(position_from_summary(snap));
                }
            }
        }
        positions
    }

    /// Latest published snapshot of every monitored position.
    pub async fn list(&self) -> Vec<PositionSummary> {
        let loops = self.loops.lock().await;
        loops.values().map(|h| h.snapshot.borrow().clone()).collect()
    }

    /// Swap in a new exit plan; the loop picks it up on its next tick.
    pub async fn update_plan(&self, id: Uuid, plan: ExitPlan) -> anyhow::Result<()> {
        plan.validate()?;
        let loops = self.loops.lock().await;
        let handle = loops
            .get(&id)
            .ok_or_else(|| anyhow::anyhow!("no monitored position {id}"))?;
        handle
            .plan_tx
            .send(plan)
            .map_err(|_| anyhow::anyhow!("monitor loop for {id} is gone"))?;
        Ok(())
    }

    pub async fn active_count(&self) -> usize {
        self.loops.lock().await.len()
    }
}

struct MonitorContext {
    price_source: Arc<dyn PriceSource>,
    executor: Arc<dyn SellExecutor>,
    breaker: Arc<CircuitBreaker>,
    config: SchedulerConfig,
    loops: Arc<Mutex<HashMap<Uuid, LoopHandle>>>,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<PositionSummary>,
    plan_rx: watch::Receiver<ExitPlan>,
}

async fn monitor_loop(mut ctx: MonitorContext, mut position: Position, plan: ExitPlan) -> Position {
    let mut strategy = ExitStrategy::new(plan, position.entry_price, position.entry_time);
    // Seed the strategy with how much of the entry is already gone, in
    // case the position was restored mid-life.
    let held = position.remaining_fraction();
    if held < 1.0 {
        strategy.record_fill(1.0 - held);
    }

    let mut last_price = position.entry_price;

    loop {
        let tick = jittered(ctx.config.poll_interval, ctx.config.poll_jitter);
        tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            _ = sleep(tick) => {}
        }

        if ctx.plan_rx.has_changed().unwrap_or(false) {
            let new_plan = ctx.plan_rx.borrow_and_update().clone();
            strategy.set_plan(new_plan);
            tracing::info!(position_id = %position.id, "exit plan updated");
        }

        // A tripped breaker pauses the whole tick. Execution/strategy
        // trips must be checked here, before the strategy sees the price:
        // a decision made while selling is impossible would consume rung
        // state it can never act on.
        if let Some(open) = [Category::Network, Category::Execution, Category::Strategy]
            .into_iter()
            .find(|c| ctx.breaker.is_open(*c))
        {
            tracing::debug!(
                position_id = %position.id,
                category = open.as_str(),
                "breaker open, skipping tick"
            );
            continue;
        }

        let fetch = timeout(
            ctx.config.price_timeout,
            ctx.price_source.get_price(&position.mint),
        );
        let price_info = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = fetch => result,
        };

        let price = match price_info {
            Ok(Ok(info)) => {
                ctx.breaker.record_success(Category::Network);
                info.native_price
            }
            Ok(Err(e)) => {
                ctx.breaker.record_failure(Category::Network);
                tracing::warn!(position_id = %position.id, error = %e, "price fetch failed");
                continue;
            }
            Err(_) => {
                ctx.breaker.record_failure(Category::Network);
                tracing::warn!(position_id = %position.id, "price fetch timed out");
                continue;
            }
        };

        last_price = price;
        let decision = strategy.update(price, Utc::now());
        publish(&ctx.snapshot_tx, &position, price, &strategy);

        let Decision::Sell { fraction, reason } = decision else {
            continue;
        };

        tracing::info!(
            position_id = %position.id,
            mint = %position.mint,
            fraction,
            reason = reason.as_str(),
            price,
            "sell decision"
        );

        if fraction >= 1.0 {
            position.status = PositionStatus::Closing;
        }

        // Cancellation must win over a sell stuck in a network wait, or
        // shutdown would block on swap/confirmation timeouts.
        let sell = ctx.executor.execute_sell(&position, fraction, reason);
        let sell_result = tokio::select! {
            _ = ctx.cancel.cancelled() => break,
            result = sell => result,
        };

        match sell_result {
            Ok(sold) => {
                let sold = sold.min(position.amount);
                position.amount -= sold;
                strategy.record_fill(if position.amount == 0 {
                    1.0
                } else {
                    sold as f64 / (position.amount + sold) as f64
                });
                ctx.breaker.record_success(Category::Strategy);

                if position.amount <= ctx.config.dust_threshold {
                    position.status = PositionStatus::Closed;
                    publish(&ctx.snapshot_tx, &position, price, &strategy);
                    tracing::info!(position_id = %position.id, "position closed");
                    break;
                }
                publish(&ctx.snapshot_tx, &position, price, &strategy);
            }
            Err(e) => {
                position.status = PositionStatus::Active;
                ctx.breaker.record_failure(Category::Strategy);
                tracing::warn!(
                    position_id = %position.id,
                    reason = reason.as_str(),
                    error = %e,
                    "sell execution failed"
                );
            }
        }
    }

    if position.status == PositionStatus::Closed {
        // Natural close: the loop cleans up after itself.
        ctx.loops.lock().await.remove(&position.id);
    }
    publish(&ctx.snapshot_tx, &position, last_price, &strategy);
    position
}

fn jittered(base: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0..=jitter.as_millis() as u64);
    base + Duration::from_millis(extra)
}

fn publish(
    tx: &watch::Sender<PositionSummary>,
    position: &Position,
    price: f64,
    strategy: &ExitStrategy,
) {
    let mut summary = summarize(position, price, strategy.roi_pct(price));
    summary.highest_price = strategy.highest_price();
    summary.lowest_price = strategy.lowest_price();
    let _ = tx.send(summary);
}

fn summarize(position: &Position, price: f64, roi_pct: f64) -> PositionSummary {
    PositionSummary {
        id: position.id,
        mint: position.mint.clone(),
        amount: position.amount,
        entry_amount: position.entry_amount,
        entry_price: position.entry_price,
        entry_time: position.entry_time,
        current_price: price,
        roi_pct,
        highest_price: price,
        lowest_price: price,
        status: position.status,
    }
}

fn position_from_summary(summary: PositionSummary) -> Position {
    Position {
        id: summary.id,
        mint: summary.mint,
        amount: summary.amount,
        entry_amount: summary.entry_amount,
        entry_price: summary.entry_price,
        entry_time: summary.entry_time,
        status: summary.status,
    }
}
