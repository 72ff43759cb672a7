use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use solana_sdk::compute_budget::ComputeBudgetInstruction;
use solana_sdk::instruction::Instruction;
use solana_sdk::message::{v0, VersionedMessage};
use solana_sdk::signature::{Keypair, Signature, Signer};
use solana_sdk::transaction::VersionedTransaction;
use tokio::time::sleep;

use crate::risk::{Category, CircuitBreaker};
use crate::rpc::{BlockhashCache, RpcGateway};
use crate::error::TradeError;

const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 15_000;

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    /// Extra attempts after the first; 0 means exactly one try.
    pub max_retries: u32,
    pub confirm_timeout: Duration,
    pub priority_fee_microlamports: Option<u64>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            confirm_timeout: Duration::from_secs(45),
            priority_fee_microlamports: Some(10_000),
        }
    }
}

/// Signs and lands one logical transaction, retrying transient failures.
///
/// Every retry re-signs against a freshly fetched blockhash, so an
/// attempt that died of staleness cannot be replayed and double-spend.
/// The whole logical submission reports exactly one success or failure
/// to the execution breaker, however many attempts it took.
pub struct TxSubmitter {
    gateway: Arc<dyn RpcGateway>,
    blockhash: Arc<BlockhashCache>,
    breaker: Arc<CircuitBreaker>,
}

impl TxSubmitter {
    pub fn new(
        gateway: Arc<dyn RpcGateway>,
        blockhash: Arc<BlockhashCache>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            gateway,
            blockhash,
            breaker,
        }
    }

    pub async fn submit(
        &self,
        instructions: &[Instruction],
        signer: &Keypair,
        options: &SubmitOptions,
    ) -> Result<Signature, TradeError> {
        let attempts = options.max_retries + 1;
        let mut last_error = TradeError::Unknown("no attempts made".to_string());

        for attempt in 1..=attempts {
            // The first attempt may reuse a cached blockhash; retries
            // always force a refresh.
            match self.try_once(instructions, signer, options, attempt > 1).await {
                Ok(signature) => {
                    self.breaker.record_success(Category::Execution);
                    tracing::info!(%signature, attempt, "transaction confirmed");
                    return Ok(signature);
                }
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "submission attempt failed");
                    let retryable = e.is_retryable();
                    last_error = e;
                    if !retryable || attempt == attempts {
                        break;
                    }
                    sleep(backoff(attempt)).await;
                }
            }
        }

        self.breaker.record_failure(Category::Execution);
        Err(last_error)
    }

    async fn try_once(
        &self,
        instructions: &[Instruction],
        signer: &Keypair,
        options: &SubmitOptions,
        force_refresh: bool,
    ) -> Result<Signature, TradeError> {
        let (blockhash, _height) = self.blockhash.get(force_refresh).await?;

        let mut all = Vec::with_capacity(instructions.len() + 1);
        if let Some(fee) = options.priority_fee_microlamports {
            all.push(ComputeBudgetInstruction::set_compute_unit_price(fee));
        }
        all.extend_from_slice(instructions);

        let payer = signer.pubkey();
        let message = v0::Message::try_compile(&payer, &all, &[], blockhash)
            .map_err(|e| TradeError::Unknown(format!("message compile failed: {e}")))?;
        let transaction =
            VersionedTransaction::try_new(VersionedMessage::V0(message), &[signer])
                .map_err(|e| TradeError::Unknown(format!("signing failed: {e}")))?;

        let signature = self.gateway.send_transaction(&transaction).await?;
        self.gateway
            .confirm_signature(&signature, options.confirm_timeout)
            .await?;
        Ok(signature)
    }
}

fn backoff(attempt: u32) -> Duration {
    let base = BACKOFF_BASE_MS.saturating_mul(1 << (attempt - 1).min(10));
    let jitter = rand::thread_rng().gen_range(0.8..1.2);
    Duration::from_millis(((base as f64 * jitter) as u64).min(BACKOFF_CAP_MS))
}
