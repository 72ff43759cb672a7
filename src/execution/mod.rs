pub mod exit_strategy;
pub mod manager;
pub mod scheduler;
pub mod submitter;

pub use exit_strategy::{Decision, ExitPlan, ExitReason, ExitStrategy, LadderRung, TrailingStop};
pub use manager::{ExecutionCore, PositionManager, ShutdownReport};
pub use scheduler::{PositionScheduler, SchedulerConfig, SellExecutor};
pub use submitter::{SubmitOptions, TxSubmitter};
