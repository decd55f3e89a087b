//! ChainClient trait definition.
//!
//! The read-only chain queries the transaction watcher depends on.

use crate::core::{Result, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A mined transaction receipt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Transaction hash
    pub tx_hash: TxHash,
    /// Block containing the transaction
    pub block_number: u64,
    /// Gas consumed
    pub gas_used: u64,
    /// Price actually paid per gas unit, in wei
    pub effective_gas_price: Option<u64>,
    /// Whether execution succeeded
    pub success: bool,
    /// Created contract, for deployments
    pub contract_address: Option<String>,
    /// Receipt as returned by the node
    pub raw: serde_json::Value,
}

/// A transaction known to the node but not yet mined.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    /// Transaction hash
    pub tx_hash: TxHash,
    /// Offered gas price, in wei
    pub gas_price: Option<u64>,
    /// Sender nonce
    pub nonce: Option<u64>,
}

/// Read access to one chain.
///
/// One client exists per enabled network.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Receipt for `hash`, or `None` if it has not been mined.
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>>;

    /// Transaction for `hash` if the node still knows it.
    async fn get_pending_transaction(&self, hash: &TxHash) -> Result<Option<PendingTransaction>>;

    /// Current head block number.
    async fn latest_block(&self) -> Result<u64>;

    /// Current gas price, in wei.
    async fn gas_price(&self) -> Result<u64>;

    /// Network name this client serves.
    fn network(&self) -> &str;
}
