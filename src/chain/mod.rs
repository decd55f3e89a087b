//! Chain Module
//!
//! Transaction confirmation tracking:
//! - ChainClient trait with JSON-RPC and in-memory clients
//! - Per-network configuration
//! - TransactionWatcher with a message-passing handle

pub mod client;
pub mod config;
pub mod memory;
pub mod rpc;
pub mod watcher;

pub use client::{ChainClient, PendingTransaction, TxReceipt};
pub use config::{NetworkConfig, WatcherConfig};
pub use memory::StaticChainClient;
pub use rpc::RpcChainClient;
pub use watcher::{
    AggregateTxMetrics, PollReport, TransactionStatus, TransactionWatcher, TxCallback, TxState,
    WatcherHandle,
};
