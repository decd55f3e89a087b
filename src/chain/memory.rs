//! In-memory chain client.
//!
//! Holds receipts, pending transactions and a head block set by the caller.
//! Used for dry runs and tests.

use crate::chain::client::{ChainClient, PendingTransaction, TxReceipt};
use crate::core::{lock, Error, Result, TxHash};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct ChainState {
    head: u64,
    gas_price: u64,
    receipts: HashMap<TxHash, TxReceipt>,
    pending: HashMap<TxHash, PendingTransaction>,
    failing: HashSet<TxHash>,
    head_unavailable: bool,
}

/// Chain client backed by in-memory state.
pub struct StaticChainClient {
    network: String,
    state: Mutex<ChainState>,
}

impl StaticChainClient {
    /// Create an empty chain at head 0.
    pub fn new(network: &str) -> Self {
        Self {
            network: network.to_string(),
            state: Mutex::new(ChainState {
                gas_price: 1_000_000_000,
                ..Default::default()
            }),
        }
    }

    /// Set the head block.
    pub fn set_head(&self, head: u64) {
        lock(&self.state).head = head;
    }

    /// Set the network gas price.
    pub fn set_gas_price(&self, gas_price: u64) {
        lock(&self.state).gas_price = gas_price;
    }

    /// Put a transaction in the pending pool.
    pub fn add_pending(&self, hash: &TxHash, gas_price: Option<u64>) {
        lock(&self.state).pending.insert(
            hash.clone(),
            PendingTransaction {
                tx_hash: hash.clone(),
                gas_price,
                nonce: None,
            },
        );
    }

    /// Mine a transaction into `block`, removing it from the pool.
    pub fn mine(&self, hash: &TxHash, block: u64, gas_used: u64, success: bool) {
        let mut state = lock(&self.state);
        let effective_gas_price = state
            .pending
            .remove(hash)
            .and_then(|tx| tx.gas_price)
            .unwrap_or(state.gas_price);
        let raw = serde_json::json!({
            "transactionHash": hash.to_hex(),
            "blockNumber": format!("0x{:x}", block),
            "gasUsed": format!("0x{:x}", gas_used),
            "effectiveGasPrice": format!("0x{:x}", effective_gas_price),
            "status": if success { "0x1" } else { "0x0" },
        });
        state.receipts.insert(
            hash.clone(),
            TxReceipt {
                tx_hash: hash.clone(),
                block_number: block,
                gas_used,
                effective_gas_price: Some(effective_gas_price),
                success,
                contract_address: None,
                raw,
            },
        );
    }

    /// Forget a transaction entirely.
    pub fn evict(&self, hash: &TxHash) {
        let mut state = lock(&self.state);
        state.pending.remove(hash);
        state.receipts.remove(hash);
    }

    /// Make every query about `hash` fail.
    pub fn fail_hash(&self, hash: &TxHash) {
        lock(&self.state).failing.insert(hash.clone());
    }

    /// Stop failing queries about `hash`.
    pub fn heal_hash(&self, hash: &TxHash) {
        lock(&self.state).failing.remove(hash);
    }

    /// Make head lookups fail.
    pub fn set_head_unavailable(&self, unavailable: bool) {
        lock(&self.state).head_unavailable = unavailable;
    }

    fn check(&self, state: &ChainState, hash: &TxHash) -> Result<()> {
        if state.failing.contains(hash) {
            return Err(Error::RpcTransport(format!(
                "{}: connection refused while querying {}",
                self.network, hash
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChainClient for StaticChainClient {
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        let state = lock(&self.state);
        self.check(&state, hash)?;
        Ok(state.receipts.get(hash).cloned())
    }

    async fn get_pending_transaction(&self, hash: &TxHash) -> Result<Option<PendingTransaction>> {
        let state = lock(&self.state);
        self.check(&state, hash)?;
        Ok(state.pending.get(hash).cloned())
    }

    async fn latest_block(&self) -> Result<u64> {
        let state = lock(&self.state);
        if state.head_unavailable {
            return Err(Error::RpcTransport(format!("{}: head unavailable", self.network)));
        }
        Ok(state.head)
    }

    async fn gas_price(&self) -> Result<u64> {
        Ok(lock(&self.state).gas_price)
    }

    fn network(&self) -> &str {
        &self.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pending_then_mined() {
        let client = StaticChainClient::new("hyperion");
        let hash = TxHash::new([7u8; 32]);

        client.add_pending(&hash, Some(5));
        assert!(client.get_receipt(&hash).await.unwrap().is_none());
        assert!(client.get_pending_transaction(&hash).await.unwrap().is_some());

        client.mine(&hash, 100, 21_000, true);
        let receipt = client.get_receipt(&hash).await.unwrap().unwrap();
        assert_eq!(receipt.block_number, 100);
        assert_eq!(receipt.effective_gas_price, Some(5));
        assert!(client.get_pending_transaction(&hash).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_hash() {
        let client = StaticChainClient::new("hyperion");
        let hash = TxHash::new([1u8; 32]);
        client.fail_hash(&hash);
        assert!(client.get_receipt(&hash).await.is_err());

        client.heal_hash(&hash);
        assert!(client.get_receipt(&hash).await.unwrap().is_none());
    }
}
