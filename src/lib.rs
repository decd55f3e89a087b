//! # chainpulse - Observability for contract deployment pipelines
//!
//! Provides:
//! - **Metrics**: bounded in-memory time series with Prometheus export
//! - **Alerting**: threshold rules with debounced trigger and resolve
//! - **Sampling**: periodic host CPU, memory, disk and network readings
//! - **Transactions**: confirmation tracking across EVM networks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chainpulse::config::ObservabilityConfig;
//! use chainpulse::service::ObservabilityService;
//!
//! #[tokio::main]
//! async fn main() -> chainpulse::Result<()> {
//!     let service = ObservabilityService::new(ObservabilityConfig::default())?;
//!     service.start()?;
//!     service.recorder().record_deployment(12.5, true, "hyperion");
//!     println!("{}", service.export_json()?);
//!     service.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod chain;
pub mod config;
pub mod core;
pub mod monitoring;
pub mod service;

pub use crate::core::error::{Error, Result};
