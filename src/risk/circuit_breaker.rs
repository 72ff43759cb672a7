use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Operation categories tracked independently by the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Price lookups, RPC probes, anything read-only over the network.
    Network,
    /// Transaction submission and confirmation.
    Execution,
    /// Sell decisions that repeatedly cannot be acted on.
    Strategy,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Network => "network",
            Category::Execution => "execution",
            Category::Strategy => "strategy",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub network_threshold: u32,
    pub execution_threshold: u32,
    pub strategy_threshold: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            network_threshold: 5,
            execution_threshold: 3,
            strategy_threshold: 4,
            base_cooldown: Duration::from_secs(5 * 60),
            max_cooldown: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct CategoryState {
    consecutive_failures: u32,
    tripped_until: Option<Instant>,
}

/// Failure-counting gate shared by every position loop.
///
/// Each category sits behind its own mutex: loops reporting network
/// failures never contend with the submitter reporting execution
/// failures. The cooldown grows exponentially with repeated trips and a
/// running cooldown is never shortened — a success only clears the
/// consecutive counter.
pub struct CircuitBreaker {
    config: BreakerConfig,
    network: Mutex<CategoryState>,
    execution: Mutex<CategoryState>,
    strategy: Mutex<CategoryState>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            network: Mutex::new(CategoryState::default()),
            execution: Mutex::new(CategoryState::default()),
            strategy: Mutex::new(CategoryState::default()),
        }
    }

    fn state(&self, category: Category) -> &Mutex<CategoryState> {
        match category {
            Category::Network => &self.network,
            Category::Execution => &self.execution,
            Category::Strategy => &self.strategy,
        }
    }

    fn threshold(&self, category: Category) -> u32 {
        match category {
            Category::Network => self.config.network_threshold,
            Category::Execution => self.config.execution_threshold,
            Category::Strategy => self.config.strategy_threshold,
        }
    }

    pub fn record_failure(&self, category: Category) {
        let threshold = self.threshold(category);
        let mut state = self.state(category).lock().expect("breaker lock poisoned");

        state.consecutive_failures += 1;

        if state.consecutive_failures >= threshold {
            let exponent = (state.consecutive_failures / threshold).min(16);
            let cooldown = self
                .config
                .base_cooldown
                .checked_mul(1 << exponent)
                .unwrap_or(self.config.max_cooldown)
                .min(self.config.max_cooldown);

            state.tripped_until = Some(Instant::now() + cooldown);
            tracing::warn!(
                category = category.as_str(),
                failures = state.consecutive_failures,
                cooldown_secs = cooldown.as_secs(),
                "circuit breaker tripped"
            );
        }
    }

    /// A success clears the consecutive counter. It does not close an
    /// already-running cooldown early; once that expires the category is
    /// fully restored.
    pub fn record_success(&self, category: Category) {
        let mut state = self.state(category).lock().expect("breaker lock poisoned");
        state.consecutive_failures = 0;
    }

    pub fn is_open(&self, category: Category) -> bool {
        let state = self.state(category).lock().expect("breaker lock poisoned");
        matches!(state.tripped_until, Some(until) if Instant::now() < until)
    }

    pub fn time_until_close(&self, category: Category) -> Option<Duration> {
        let state = self.state(category).lock().expect("breaker lock poisoned");
        state.tripped_until.and_then(|until| {
            let now = Instant::now();
            (now < until).then(|| until - now)
        })
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}
