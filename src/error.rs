use thiserror::Error;

/// Classified trading/network errors.
///
/// Every failure coming back from an RPC endpoint, the swap router or the
/// price API is mapped onto one of these classes before any retry decision
/// is made. Unmatched errors become `Unknown` and are treated as
/// non-retryable so that logic bugs cannot spin in a retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TradeError {
    #[error("blockhash expired or not found")]
    StaleBlockhash,

    #[error("operation timed out")]
    Timeout,

    #[error("rate limited by endpoint")]
    RateLimited,

    #[error("endpoint unavailable")]
    EndpointUnavailable,

    #[error("transaction simulation rejected: {0}")]
    SimulationRejected(String),

    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("{0}")]
    Unknown(String),
}

impl TradeError {
    /// Map an underlying error message onto an error class.
    ///
    /// Matching is by substring because the Solana RPC surface (and the
    /// HTTP APIs in front of it) report most failures as free-form strings
    /// or JSON-RPC messages rather than stable codes.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();

        if msg.contains("blockhash not found")
            || msg.contains("blockhashnotfound")
            || msg.contains("blockhash expired")
        {
            TradeError::StaleBlockhash
        } else if msg.contains("429")
            || msg.contains("rate limit")
            || msg.contains("too many requests")
        {
            TradeError::RateLimited
        } else if msg.contains("timed out") || msg.contains("timeout") || msg.contains("deadline") {
            TradeError::Timeout
        } else if msg.contains("connection")
            || msg.contains("connect")
            || msg.contains("dns")
            || msg.contains("unavailable")
            || msg.contains("refused")
        {
            TradeError::EndpointUnavailable
        } else if msg.contains("insufficient") {
            TradeError::InsufficientBalance
        } else if msg.contains("simulation failed")
            || msg.contains("instructionerror")
            || msg.contains("instruction error")
            || msg.contains("custom program error")
            || msg.contains("invalidaccountdata")
        {
            TradeError::SimulationRejected(message.to_string())
        } else {
            TradeError::Unknown(message.to_string())
        }
    }

    /// Whether a retry with backoff is worthwhile for this class.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TradeError::StaleBlockhash
                | TradeError::Timeout
                | TradeError::RateLimited
                | TradeError::EndpointUnavailable
        )
    }

    /// Short stable label for logs and metrics.
    pub fn class_name(&self) -> &'static str {
        match self {
            TradeError::StaleBlockhash => "stale_blockhash",
            TradeError::Timeout => "timeout",
            TradeError::RateLimited => "rate_limited",
            TradeError::EndpointUnavailable => "endpoint_unavailable",
            TradeError::SimulationRejected(_) => "simulation_rejected",
            TradeError::InsufficientBalance => "insufficient_balance",
            TradeError::Unknown(_) => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stale_blockhash() {
        let err = TradeError::classify("Transaction failed: Blockhash not found");
        assert_eq!(err, TradeError::StaleBlockhash);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_rate_limited() {
        let err = TradeError::classify("HTTP status 429 Too Many Requests");
        assert_eq!(err, TradeError::RateLimited);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_timeout() {
        let err = TradeError::classify("request timed out after 10s");
        assert_eq!(err, TradeError::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_endpoint_unavailable() {
        let err = TradeError::classify("error sending request: connection refused");
        assert_eq!(err, TradeError::EndpointUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_simulation_rejected_is_fatal() {
        let err = TradeError::classify("Transaction simulation failed: custom program error: 0x1771");
        assert!(matches!(err, TradeError::SimulationRejected(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify_insufficient_balance_is_fatal() {
        let err = TradeError::classify("insufficient funds for instruction");
        assert_eq!(err, TradeError::InsufficientBalance);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unmatched_defaults_to_unknown_non_retryable() {
        let err = TradeError::classify("something completely novel happened");
        assert!(matches!(err, TradeError::Unknown(_)));
        assert!(!err.is_retryable());
    }
}
