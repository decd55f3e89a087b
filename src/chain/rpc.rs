//! Ethereum JSON-RPC chain client.
//!
//! Speaks `eth_getTransactionReceipt`, `eth_getTransactionByHash`,
//! `eth_blockNumber` and `eth_gasPrice` over HTTP.

use crate::chain::client::{ChainClient, PendingTransaction, TxReceipt};
use crate::chain::config::NetworkConfig;
use crate::core::{Error, Result, TxHash};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC client for one network.
pub struct RpcChainClient {
    network: String,
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcChainClient {
    /// Create a client for a configured network.
    pub fn new(network: &str, config: &NetworkConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            network: network.to_string(),
            url: config.rpc_url.clone(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    /// RPC endpoint.
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        debug!(network = %self.network, method, id = request.id, "RPC call");

        let response: RpcResponse = self
            .http
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(err) = response.error {
            return Err(Error::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_receipt(&self, hash: &TxHash) -> Result<Option<TxReceipt>> {
        let value = self
            .call("eth_getTransactionReceipt", json!([hash.to_hex()]))
            .await?;
        parse_receipt(hash.clone(), value)
    }

    async fn get_pending_transaction(&self, hash: &TxHash) -> Result<Option<PendingTransaction>> {
        let value = self
            .call("eth_getTransactionByHash", json!([hash.to_hex()]))
            .await?;
        parse_transaction(hash.clone(), value)
    }

    async fn latest_block(&self) -> Result<u64> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        quantity(&value, "blockNumber")
    }

    async fn gas_price(&self) -> Result<u64> {
        let value = self.call("eth_gasPrice", json!([])).await?;
        quantity(&value, "gasPrice")
    }

    fn network(&self) -> &str {
        &self.network
    }
}

/// Parse a hex `QUANTITY` such as `"0x1a"`.
pub fn parse_quantity(s: &str) -> Result<u64> {
    let digits = s
        .strip_prefix("0x")
        .ok_or_else(|| Error::MalformedResponse(format!("quantity without 0x prefix: {}", s)))?;
    if digits.is_empty() {
        return Err(Error::MalformedResponse("empty quantity".to_string()));
    }
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::MalformedResponse(format!("bad quantity {}: {}", s, e)))
}

fn quantity(value: &Value, field: &str) -> Result<u64> {
    value
        .as_str()
        .ok_or_else(|| Error::MalformedResponse(format!("{} is not a string", field)))
        .and_then(parse_quantity)
}

fn optional_quantity(object: &Value, field: &str) -> Result<Option<u64>> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => quantity(v, field).map(Some),
    }
}

fn required_quantity(object: &Value, field: &str) -> Result<u64> {
    optional_quantity(object, field)?
        .ok_or_else(|| Error::MalformedResponse(format!("missing {}", field)))
}

fn parse_receipt(hash: TxHash, value: Value) -> Result<Option<TxReceipt>> {
    if value.is_null() {
        return Ok(None);
    }
    let block_number = required_quantity(&value, "blockNumber")?;
    let gas_used = required_quantity(&value, "gasUsed")?;
    let effective_gas_price = optional_quantity(&value, "effectiveGasPrice")?;
    // Pre-Byzantium receipts carry no status field and are treated as successful
    let success = optional_quantity(&value, "status")?.map_or(true, |s| s == 1);
    let contract_address = value
        .get("contractAddress")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Some(TxReceipt {
        tx_hash: hash,
        block_number,
        gas_used,
        effective_gas_price,
        success,
        contract_address,
        raw: value,
    }))
}

fn parse_transaction(hash: TxHash, value: Value) -> Result<Option<PendingTransaction>> {
    if value.is_null() {
        return Ok(None);
    }
    let gas_price = match optional_quantity(&value, "gasPrice")? {
        Some(price) => Some(price),
        None => optional_quantity(&value, "maxFeePerGas")?,
    };
    Ok(Some(PendingTransaction {
        tx_hash: hash,
        gas_price,
        nonce: optional_quantity(&value, "nonce")?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> TxHash {
        TxHash::new([0xde; 32])
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert!(parse_quantity("1a").is_err());
        assert!(parse_quantity("0x").is_err());
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_parse_receipt() {
        let raw = json!({
            "blockNumber": "0x64",
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "status": "0x1",
            "contractAddress": "0x1234",
        });
        let receipt = parse_receipt(hash(), raw).unwrap().unwrap();
        assert_eq!(receipt.block_number, 100);
        assert_eq!(receipt.gas_used, 21_000);
        assert_eq!(receipt.effective_gas_price, Some(1_000_000_000));
        assert!(receipt.success);
        assert_eq!(receipt.contract_address.as_deref(), Some("0x1234"));
    }

    #[test]
    fn test_parse_reverted_receipt() {
        let raw = json!({"blockNumber": "0x1", "gasUsed": "0x1", "status": "0x0"});
        let receipt = parse_receipt(hash(), raw).unwrap().unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.effective_gas_price, None);
    }

    #[test]
    fn test_parse_null_receipt() {
        assert!(parse_receipt(hash(), Value::Null).unwrap().is_none());
    }

    #[test]
    fn test_parse_receipt_missing_block() {
        let raw = json!({"gasUsed": "0x1"});
        assert!(matches!(
            parse_receipt(hash(), raw),
            Err(Error::MalformedResponse(_))
        ));
    }

    #[test]
    fn test_parse_transaction_fee_market() {
        let raw = json!({"maxFeePerGas": "0x10", "nonce": "0x2", "blockNumber": null});
        let tx = parse_transaction(hash(), raw).unwrap().unwrap();
        assert_eq!(tx.gas_price, Some(16));
        assert_eq!(tx.nonce, Some(2));
    }
}
