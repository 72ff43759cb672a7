use std::sync::Arc;
use std::time::{Duration, Instant};

use solana_sdk::hash::Hash;
use tokio::sync::Mutex;

use crate::error::TradeError;

use super::RpcGateway;

/// Soft TTL: after this age a fresh fetch is attempted.
const SOFT_TTL: Duration = Duration::from_secs(20);
/// Hard ceiling: a cached hash older than this is never served.
const HARD_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy)]
struct CachedBlockhash {
    hash: Hash,
    last_valid_block_height: u64,
    fetched_at: Instant,
}

/// Short-TTL cache for the network's latest blockhash.
///
/// A fetch failure falls back to a still-serviceable cached value (past
/// the soft TTL but inside the hard ceiling) so that one flaky RPC call
/// does not fail a whole submission. The mutex is held across the fetch
/// so concurrent callers share one refresh.
pub struct BlockhashCache {
    gateway: Arc<dyn RpcGateway>,
    inner: Mutex<Option<CachedBlockhash>>,
    soft_ttl: Duration,
    hard_ttl: Duration,
}

impl BlockhashCache {
    pub fn new(gateway: Arc<dyn RpcGateway>) -> Self {
        Self::with_ttls(gateway, SOFT_TTL, HARD_TTL)
    }

    pub fn with_ttls(gateway: Arc<dyn RpcGateway>, soft_ttl: Duration, hard_ttl: Duration) -> Self {
        Self {
            gateway,
            inner: Mutex::new(None),
            soft_ttl,
            hard_ttl,
        }
    }

    /// Current blockhash and the last block height it is valid for.
    pub async fn get(&self, force_refresh: bool) -> Result<(Hash, u64), TradeError> {
        let mut cached = self.inner.lock().await;

        if !force_refresh {
            if let Some(c) = cached.as_ref() {
                if c.fetched_at.elapsed() < self.soft_ttl {
                    return Ok((c.hash, c.last_valid_block_height));
                }
            }
        }

        match self.gateway.latest_blockhash().await {
            Ok((hash, height)) => {
                *cached = Some(CachedBlockhash {
                    hash,
                    last_valid_block_height: height,
                    fetched_at: Instant::now(),
                });
                Ok((hash, height))
            }
            Err(e) => {
                // Stale-but-usable fallback window.
                if let Some(c) = cached.as_ref() {
                    if c.fetched_at.elapsed() < self.hard_ttl {
                        tracing::warn!(
                            error = %e,
                            age_ms = c.fetched_at.elapsed().as_millis() as u64,
                            "blockhash refresh failed, serving cached value"
                        );
                        return Ok((c.hash, c.last_valid_block_height));
                    }
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use solana_sdk::signature::Signature;
    use solana_sdk::transaction::VersionedTransaction;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct ScriptedGateway {
        fetches: AtomicU32,
        failing: AtomicBool,
    }

    impl ScriptedGateway {
        fn new() -> Self {
            Self {
                fetches: AtomicU32::new(0),
                failing: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl RpcGateway for ScriptedGateway {
        async fn latest_blockhash(&self) -> Result<(Hash, u64), TradeError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(TradeError::EndpointUnavailable);
            }
            let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
            Ok((Hash::new_unique(), n as u64))
        }

        async fn send_transaction(
            &self,
            _tx: &VersionedTransaction,
        ) -> Result<Signature, TradeError> {
            unimplemented!("not used in blockhash tests")
        }

        async fn confirm_signature(
            &self,
            _sig: &Signature,
            _timeout: Duration,
        ) -> Result<(), TradeError> {
            unimplemented!("not used in blockhash tests")
        }
    }

    #[tokio::test]
    async fn test_cache_hit_within_soft_ttl() {
        let gateway = Arc::new(ScriptedGateway::new());
        let cache = BlockhashCache::new(gateway.clone());

        let (h1, _) = cache.get(false).await.unwrap();
        let (h2, _) = cache.get(false).await.unwrap();

        assert_eq!(h1, h2);
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_force_refresh_always_fetches() {
        let gateway = Arc::new(ScriptedGateway::new());
        let cache = BlockhashCache::new(gateway.clone());

        let (h1, _) = cache.get(false).await.unwrap();
        let (h2, _) = cache.get(true).await.unwrap();

        assert_ne!(h1, h2);
        assert_eq!(gateway.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_serves_stale_within_hard_ttl() {
        let gateway = Arc::new(ScriptedGateway::new());
        let cache = BlockhashCache::with_ttls(
            gateway.clone(),
            Duration::from_millis(0), // soft TTL: always refetch
            Duration::from_secs(60),
        );

        let (h1, _) = cache.get(false).await.unwrap();
        gateway.failing.store(true, Ordering::SeqCst);

        let (h2, _) = cache.get(false).await.unwrap();
        assert_eq!(h1, h2);
    }

    #[tokio::test]
    async fn test_fetch_failure_past_hard_ttl_propagates() {
        let gateway = Arc::new(ScriptedGateway::new());
        let cache = BlockhashCache::with_ttls(
            gateway.clone(),
            Duration::from_millis(0),
            Duration::from_millis(10),
        );

        cache.get(false).await.unwrap();
        gateway.failing.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let result = cache.get(false).await;
        assert_eq!(result, Err(TradeError::EndpointUnavailable));
    }

    #[tokio::test]
    async fn test_cold_cache_failure_propagates() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.failing.store(true, Ordering::SeqCst);
        let cache = BlockhashCache::new(gateway);

        assert!(cache.get(false).await.is_err());
    }
}
