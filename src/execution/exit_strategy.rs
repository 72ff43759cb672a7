use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Price samples kept for trend detection. At a 5s poll interval this is
/// a three-minute window.
const PRICE_HISTORY_CAPACITY: usize = 36;
/// Trend detection needs at least this many samples to say anything.
const MIN_TREND_SAMPLES: usize = 6;
/// Trend-reversal sells below this fraction are noise; skip them.
const MIN_TREND_FRACTION: f64 = 0.05;

/// Why a sell decision fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    TakeProfit,
    TrendReversal,
    TimeExit,
    Liquidation,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrendReversal => "trend_reversal",
            ExitReason::TimeExit => "time_exit",
            ExitReason::Liquidation => "liquidation",
        }
    }
}

/// Outcome of one strategy update.
///
/// `fraction` is a fraction of the position as currently held (never of
/// the original entry), always in `(0.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Hold,
    Sell { fraction: f64, reason: ExitReason },
}

/// One rung of the take-profit ladder. `fraction` is a share of the
/// original entry amount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderRung {
    pub roi_pct: f64,
    pub fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingStop {
    /// ROI (vs entry) at which the trailing stop arms, in percent.
    pub activation_roi: f64,
    /// How far below the peak the floor sits, e.g. 0.10 for 10%.
    pub trail_fraction: f64,
}

/// Immutable exit configuration captured at position creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitPlan {
    pub ladder: Vec<LadderRung>,
    /// Negative ROI percent at which the whole position is dumped.
    pub stop_loss_roi: f64,
    pub trailing: Option<TrailingStop>,
    pub max_hold: Duration,
    /// 1 (least sensitive) to 5 (most sensitive).
    pub trend_sensitivity: u8,
}

impl ExitPlan {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.stop_loss_roi < 0.0,
            "stop_loss_roi must be negative, got {}",
            self.stop_loss_roi
        );
        anyhow::ensure!(
            (1..=5).contains(&self.trend_sensitivity),
            "trend_sensitivity must be 1-5, got {}",
            self.trend_sensitivity
        );
        anyhow::ensure!(self.max_hold > Duration::zero(), "max_hold must be positive");

        let mut total = 0.0;
        let mut prev_roi = f64::NEG_INFINITY;
        for (i, rung) in self.ladder.iter().enumerate() {
            anyhow::ensure!(
                rung.fraction > 0.0 && rung.fraction <= 1.0,
                "ladder rung {i} fraction out of range"
            );
            anyhow::ensure!(
                rung.roi_pct > prev_roi,
                "ladder thresholds must be strictly increasing"
            );
            prev_roi = rung.roi_pct;
            total += rung.fraction;
        }
        anyhow::ensure!(
            total <= 1.0 + 1e-9,
            "ladder fractions sum to {total}, must be <= 1.0"
        );

        if let Some(trailing) = &self.trailing {
            anyhow::ensure!(
                trailing.trail_fraction > 0.0 && trailing.trail_fraction < 1.0,
                "trail_fraction out of range"
            );
        }
        Ok(())
    }
}

/// Per-position exit state machine.
///
/// Pure over its own state: `update` never performs IO and never fails;
/// callers act on the returned `Decision` and report confirmed fills
/// back through `record_fill`.
#[derive(Debug)]
pub struct ExitStrategy {
    plan: ExitPlan,
    entry_price: f64,
    entry_time: DateTime<Utc>,
    highest_price: f64,
    lowest_price: f64,
    /// Fraction of the original entry still held, by this strategy's
    /// accounting of confirmed fills.
    remaining: f64,
    completed_rungs: Vec<bool>,
    trailing_active: bool,
    trailing_floor: f64,
    history: VecDeque<f64>,
    last_decision_at: Option<DateTime<Utc>>,
}

impl ExitStrategy {
    pub fn new(plan: ExitPlan, entry_price: f64, entry_time: DateTime<Utc>) -> Self {
        let rungs = plan.ladder.len();
        Self {
            plan,
            entry_price,
            entry_time,
            highest_price: entry_price,
            lowest_price: entry_price,
            remaining: 1.0,
            completed_rungs: vec![false; rungs],
            trailing_active: false,
            trailing_floor: 0.0,
            history: VecDeque::with_capacity(PRICE_HISTORY_CAPACITY),
            last_decision_at: None,
        }
    }

    /// Replace the plan atomically. Completed rungs are re-mapped by
    /// index; a longer ladder simply adds un-fired rungs at the end.
    pub fn set_plan(&mut self, plan: ExitPlan) {
        self.completed_rungs.resize(plan.ladder.len(), false);
        self.completed_rungs.truncate(plan.ladder.len());
        self.plan = plan;
    }

    pub fn roi_pct(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * 100.0
    }

    pub fn highest_price(&self) -> f64 {
        self.highest_price
    }

    pub fn lowest_price(&self) -> f64 {
        self.lowest_price
    }

    pub fn trailing_floor(&self) -> Option<f64> {
        self.trailing_active.then_some(self.trailing_floor)
    }

    /// A confirmed sell of `fraction` of the remaining position.
    pub fn record_fill(&mut self, fraction: f64) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.remaining = (self.remaining * (1.0 - fraction)).max(0.0);
    }

    /// Feed one price sample; returns the action to take, if any.
    pub fn update(&mut self, price: f64, now: DateTime<Utc>) -> Decision {
        if self.entry_price <= 0.0 {
            tracing::error!(entry_price = self.entry_price, "position has invalid entry price");
            return Decision::Hold;
        }
        if !price.is_finite() || price <= 0.0 {
            tracing::warn!(price, "ignoring invalid price sample");
            return Decision::Hold;
        }

        if price > self.highest_price {
            self.highest_price = price;
        }
        if price < self.lowest_price {
            self.lowest_price = price;
        }

        let roi = self.roi_pct(price);
        self.update_trailing(roi);
        self.push_history(price);

        let decision = self.evaluate(price, roi, now);
        if decision != Decision::Hold {
            self.last_decision_at = Some(now);
        }
        decision
    }

    fn evaluate(&mut self, price: f64, roi: f64, now: DateTime<Utc>) -> Decision {
        // Capital preservation outranks profit taking.
        if roi <= self.plan.stop_loss_roi {
            return Decision::Sell {
                fraction: 1.0,
                reason: ExitReason::StopLoss,
            };
        }

        if self.trailing_active && price <= self.trailing_floor {
            return Decision::Sell {
                fraction: 1.0,
                reason: ExitReason::TrailingStop,
            };
        }

        if let Some(fraction) = self.next_ladder_fraction(roi) {
            return Decision::Sell {
                fraction,
                reason: ExitReason::TakeProfit,
            };
        }

        if roi > 0.0 {
            if let Some(fraction) = self.trend_reversal_fraction(roi) {
                return Decision::Sell {
                    fraction,
                    reason: ExitReason::TrendReversal,
                };
            }
        }

        if now - self.entry_time >= self.plan.max_hold {
            return Decision::Sell {
                fraction: 1.0,
                reason: ExitReason::TimeExit,
            };
        }

        Decision::Hold
    }

    fn update_trailing(&mut self, roi: f64) {
        let Some(trailing) = self.plan.trailing else {
            return;
        };

        if !self.trailing_active && roi >= trailing.activation_roi {
            self.trailing_active = true;
            self.trailing_floor = self.highest_price * (1.0 - trailing.trail_fraction);
            tracing::debug!(floor = self.trailing_floor, "trailing stop armed");
        } else if self.trailing_active {
            // The floor only ever ratchets upward with new highs.
            let candidate = self.highest_price * (1.0 - trailing.trail_fraction);
            if candidate > self.trailing_floor {
                self.trailing_floor = candidate;
            }
        }
    }

    /// Lowest uncompleted rung whose threshold is reached. Marks it
    /// completed; a rung never fires twice even if price re-crosses it.
    fn next_ladder_fraction(&mut self, roi: f64) -> Option<f64> {
        let rung_idx = self
            .plan
            .ladder
            .iter()
            .enumerate()
            .find(|(i, rung)| !self.completed_rungs[*i] && roi >= rung.roi_pct)
            .map(|(i, _)| i)?;

        self.completed_rungs[rung_idx] = true;

        let rung = &self.plan.ladder[rung_idx];
        if self.remaining <= 0.0 {
            return None;
        }
        // Ladder fractions are shares of the original entry; convert to a
        // share of what is still held.
        Some((rung.fraction / self.remaining).min(1.0))
    }

    /// Consecutive duplicates are not recorded so a repeated read of the
    /// same price is a true no-op.
    fn push_history(&mut self, price: f64) {
        if self.history.back() == Some(&price) {
            return;
        }
        if self.history.len() == PRICE_HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(price);
    }

    /// Short-window move against the longer trend while in profit.
    fn trend_reversal_fraction(&self, roi: f64) -> Option<f64> {
        if self.history.len() < MIN_TREND_SAMPLES {
            return None;
        }

        let whole = delta_pct(&self.history, 0);
        let recent_start = self.history.len() - (self.history.len() / 3).max(2);
        let recent = delta_pct(&self.history, recent_start);

        if whole == 0.0 || recent == 0.0 || whole.signum() == recent.signum() {
            return None;
        }

        let threshold = (6 - self.plan.trend_sensitivity) as f64;
        let magnitude = recent.abs();
        if magnitude <= threshold {
            return None;
        }

        let severity = magnitude / threshold;
        let fraction = (0.25 * severity * roi / 20.0).min(0.75);
        (fraction >= MIN_TREND_FRACTION).then_some(fraction)
    }
}

fn delta_pct(history: &VecDeque<f64>, start: usize) -> f64 {
    let first = history[start];
    let last = history[history.len() - 1];
    if first == 0.0 {
        return 0.0;
    }
    (last - first) / first * 100.0
}
