//! Error types for the wallet engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Provider error for chain {chain_id}: {message}")]
    Provider { chain_id: u64, message: String },

    #[error("Private relay error for chain {chain_id}: {message}")]
    Relay { chain_id: u64, message: String },

    #[error("Order service error: {0}")]
    OrderService(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Signature request rejected by user")]
    UserRejected,

    #[error("Submission failed on chain {chain_id}: {message}")]
    Submission { chain_id: u64, message: String },

    #[error("Insufficient funds on chain {chain_id}")]
    InsufficientFunds { chain_id: u64 },

    #[error("Stale nonce on chain {chain_id}")]
    StaleNonce { chain_id: u64 },

    #[error("Quote expired before execution")]
    QuoteExpired,

    #[error("Context was prepared for a different account")]
    AccountMismatch,

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Chain {chain_id} not found")]
    ChainNotFound { chain_id: u64 },

    #[error("Transaction {tx_id} not found")]
    TransactionNotFound { tx_id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Check if the error is transient and worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Provider { .. }
                | EngineError::Relay { .. }
                | EngineError::OrderService(_)
                | EngineError::Timeout { .. }
        )
    }

    /// Check if the error came from the user declining a signature
    pub fn is_user_rejection(&self) -> bool {
        matches!(self, EngineError::UserRejected)
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
