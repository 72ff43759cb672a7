use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_config::RpcSendTransactionConfig;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::hash::Hash;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::VersionedTransaction;
use solana_transaction_status::TransactionConfirmationStatus;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

use crate::error::TradeError;

use super::RpcGateway;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct RpcPoolConfig {
    /// Consecutive failures before an endpoint is flagged unhealthy.
    pub unhealthy_threshold: u32,
    pub probe_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for RpcPoolConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            probe_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Health and latency bookkeeping for one endpoint.
struct EndpointState {
    url: String,
    client: Arc<RpcClient>,
    healthy: bool,
    latency_ms: u64,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl EndpointState {
    fn new(url: String, request_timeout: Duration) -> Self {
        let client = Arc::new(RpcClient::new_with_timeout_and_commitment(
            url.clone(),
            request_timeout,
            CommitmentConfig::confirmed(),
        ));
        Self {
            url,
            client,
            healthy: true,
            latency_ms: 0,
            consecutive_failures: 0,
            last_failure: None,
        }
    }
}

/// A small pool of RPC endpoints with observed latency and health.
///
/// `best()` prefers the fastest healthy endpoint; when everything is
/// marked unhealthy it hands out the least-recently-failed one so the
/// engine degrades instead of halting.
pub struct RpcPool {
    endpoints: RwLock<Vec<EndpointState>>,
    config: RpcPoolConfig,
}

impl RpcPool {
    pub fn new(urls: &[String], config: RpcPoolConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!urls.is_empty(), "rpc pool needs at least one endpoint");
        let endpoints = urls
            .iter()
            .map(|u| EndpointState::new(u.clone(), config.request_timeout))
            .collect();
        Ok(Self {
            endpoints: RwLock::new(endpoints),
            config,
        })
    }

    /// Index and client of the endpoint to use for the next call.
    pub fn best(&self) -> (usize, Arc<RpcClient>) {
        let endpoints = self.endpoints.read().expect("rpc pool lock poisoned");

        let healthy_best = endpoints
            .iter()
            .enumerate()
            .filter(|(_, e)| e.healthy)
            .min_by_key(|(_, e)| e.latency_ms);

        let (idx, state) = match healthy_best {
            Some(found) => found,
            // All unhealthy: pick the one that failed longest ago.
            None => endpoints
                .iter()
                .enumerate()
                .max_by_key(|(_, e)| {
                    e.last_failure
                        .map(|t| t.elapsed())
                        .unwrap_or(Duration::MAX)
                })
                .expect("pool is never empty"),
        };

        (idx, state.client.clone())
    }

    pub fn mark_failed(&self, index: usize) {
        let mut endpoints = self.endpoints.write().expect("rpc pool lock poisoned");
        if let Some(e) = endpoints.get_mut(index) {
            e.consecutive_failures += 1;
            e.last_failure = Some(Instant::now());
            if e.consecutive_failures >= self.config.unhealthy_threshold && e.healthy {
                e.healthy = false;
                tracing::warn!(url = %e.url, failures = e.consecutive_failures, "rpc endpoint marked unhealthy");
            }
        }
    }

    pub fn mark_success(&self, index: usize, latency_ms: u64) {
        let mut endpoints = self.endpoints.write().expect("rpc pool lock poisoned");
        if let Some(e) = endpoints.get_mut(index) {
            e.latency_ms = latency_ms;
            e.consecutive_failures = e.consecutive_failures.saturating_sub(1);
            if !e.healthy && e.consecutive_failures < self.config.unhealthy_threshold {
                e.healthy = true;
                tracing::info!(url = %e.url, "rpc endpoint recovered");
            }
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.read().expect("rpc pool lock poisoned").len()
    }

    fn is_healthy(&self, index: usize) -> bool {
        self.endpoints
            .read()
            .expect("rpc pool lock poisoned")
            .get(index)
            .map(|e| e.healthy)
            .unwrap_or(false)
    }

    /// Probe every endpoint once with a cheap `getSlot` call.
    pub async fn probe_all(&self) {
        let clients: Vec<(usize, Arc<RpcClient>)> = {
            let endpoints = self.endpoints.read().expect("rpc pool lock poisoned");
            endpoints
                .iter()
                .enumerate()
                .map(|(i, e)| (i, e.client.clone()))
                .collect()
        };

        for (idx, client) in clients {
            let started = Instant::now();
            match timeout(self.config.request_timeout, client.get_slot()).await {
                Ok(Ok(_slot)) => {
                    self.mark_success(idx, started.elapsed().as_millis() as u64);
                }
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "rpc probe failed");
                    self.mark_failed(idx);
                }
                Err(_) => self.mark_failed(idx),
            }
        }
    }

    /// Spawn the periodic health probe; stops when the token is cancelled.
    pub fn spawn_probe_task(self: &Arc<Self>, cancel: CancellationToken) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(pool.config.probe_interval) => pool.probe_all().await,
                }
            }
        });
    }

    /// Run one gateway call against the best endpoint, updating health.
    async fn with_best<T, F, Fut>(&self, op: F) -> Result<T, TradeError>
    where
        F: FnOnce(Arc<RpcClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T, solana_client::client_error::ClientError>>,
    {
        let (idx, client) = self.best();
        let started = Instant::now();

        match timeout(self.config.request_timeout, op(client)).await {
            Ok(Ok(value)) => {
                self.mark_success(idx, started.elapsed().as_millis() as u64);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.mark_failed(idx);
                Err(TradeError::classify(&e.to_string()))
            }
            Err(_) => {
                self.mark_failed(idx);
                Err(TradeError::Timeout)
            }
        }
    }
}

#[async_trait]
impl RpcGateway for RpcPool {
    async fn latest_blockhash(&self) -> Result<(Hash, u64), TradeError> {
        self.with_best(|client| async move {
            client
                .get_latest_blockhash_with_commitment(CommitmentConfig::confirmed())
                .await
        })
        .await
    }

    async fn send_transaction(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<Signature, TradeError> {
        let config = RpcSendTransactionConfig {
            skip_preflight: false,
            max_retries: Some(0),
            ..Default::default()
        };
        self.with_best(|client| async move {
            client
                .send_transaction_with_config(transaction, config)
                .await
        })
        .await
    }

    async fn confirm_signature(
        &self,
        signature: &Signature,
        confirm_timeout: Duration,
    ) -> Result<(), TradeError> {
        let deadline = Instant::now() + confirm_timeout;

        loop {
            let statuses = self
                .with_best(|client| async move {
                    client.get_signature_statuses(&[*signature]).await
                })
                .await;

            match statuses {
                Ok(response) => {
                    if let Some(Some(status)) = response.value.first() {
                        if let Some(err) = &status.err {
                            return Err(TradeError::classify(&err.to_string()));
                        }
                        if matches!(
                            status.confirmation_status,
                            Some(TransactionConfirmationStatus::Confirmed)
                                | Some(TransactionConfirmationStatus::Finalized)
                        ) {
                            return Ok(());
                        }
                    }
                }
                // Status polling failures are transient; keep waiting
                // until the deadline decides.
                Err(e) => tracing::debug!(error = %e, "signature status poll failed"),
            }

            if Instant::now() >= deadline {
                return Err(TradeError::Timeout);
            }
            sleep(CONFIRM_POLL_INTERVAL).await;
        }
    }
}
