pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod models;
pub mod risk;
pub mod rpc;

pub use config::BotConfig;
pub use error::TradeError;
pub use execution::{PositionManager, PositionScheduler, TxSubmitter};
pub use risk::CircuitBreaker;
pub use rpc::{BlockhashCache, RpcPool};
