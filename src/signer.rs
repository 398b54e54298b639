//! Signing seam
//!
//! Key management stays with the host wallet. The engine hands over fully
//! formed payloads and gets back signatures; a host that wants to surface a
//! confirmation prompt does so inside its implementation and returns
//! [`EngineError::UserRejected`](crate::error::EngineError::UserRejected)
//! when the user declines.

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::transaction::eip712::TypedData;
use ethers::types::{Address, Bytes, Signature};

use crate::error::EngineResult;

/// Signs on behalf of one account
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account this signer controls
    fn address(&self) -> Address;

    /// Sign a transaction, returning the raw bytes ready for broadcast
    async fn sign_transaction(&self, tx: &TypedTransaction) -> EngineResult<Bytes>;

    /// Sign EIP-712 typed data (permits and off-chain orders)
    async fn sign_typed_data(&self, data: &TypedData) -> EngineResult<Signature>;
}
