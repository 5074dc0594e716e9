//! Error types for the transaction flow engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Signer error: {0}")]
    Signer(String),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Transaction {id} not found")]
    TransactionNotFound { id: String },

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Insufficient balance on chain {chain_id}: have {have}, need {need}")]
    InsufficientBalance {
        chain_id: u64,
        have: String,
        need: String,
    },

    #[error("Rate limited on chain {chain_id}")]
    RateLimited { chain_id: u64 },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// How a failed step should be treated by the caller.
///
/// Every error maps to exactly one kind, on every execution path: `Abort`
/// ends the flow with no retry, `Retry` is transient and the caller may
/// resubmit from the failed step, and `Validation` means the plan itself was
/// malformed before anything ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Abort,
    Retry,
    Validation,
}

impl EngineError {
    /// Classify this error for retry handling
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            EngineError::InvalidPlan(_) | EngineError::InvalidStateTransition { .. } => {
                FailureKind::Validation
            }
            EngineError::ChainConnection { .. }
            | EngineError::Timeout { .. }
            | EngineError::RateLimited { .. }
            | EngineError::Nonce { .. }
            | EngineError::TransactionNotFound { .. } => FailureKind::Retry,
            EngineError::Config(_)
            | EngineError::Signer(_)
            | EngineError::Transaction(_)
            | EngineError::GasEstimation(_)
            | EngineError::ChainNotFound { .. }
            | EngineError::InsufficientBalance { .. }
            | EngineError::Internal(_) => FailureKind::Abort,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        self.failure_kind() == FailureKind::Retry
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientBalance { .. } | EngineError::Signer(_)
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_classification() {
        assert_eq!(
            EngineError::InvalidPlan("no permit".into()).failure_kind(),
            FailureKind::Validation
        );
        assert_eq!(
            EngineError::InvalidStateTransition {
                from: "confirmed".into(),
                to: "pending".into()
            }
            .failure_kind(),
            FailureKind::Validation
        );
        assert_eq!(
            EngineError::ChainConnection {
                chain_id: 1,
                message: "connection refused".into()
            }
            .failure_kind(),
            FailureKind::Retry
        );
        assert_eq!(
            EngineError::Timeout {
                operation: "send transaction".into()
            }
            .failure_kind(),
            FailureKind::Retry
        );
        assert_eq!(
            EngineError::Signer("rejected".into()).failure_kind(),
            FailureKind::Abort
        );
        assert_eq!(
            EngineError::Transaction("reverted".into()).failure_kind(),
            FailureKind::Abort
        );
    }

    #[test]
    fn test_retryable_matches_kind() {
        assert!(EngineError::RateLimited { chain_id: 10 }.is_retryable());
        assert!(!EngineError::Internal("bug".into()).is_retryable());
        assert!(!EngineError::InvalidPlan("bad".into()).is_retryable());
    }

    #[test]
    fn test_alerting_errors() {
        assert!(EngineError::Signer("locked".into()).should_alert());
        assert!(!EngineError::Timeout {
            operation: "receipt".into()
        }
        .should_alert());
    }
}
