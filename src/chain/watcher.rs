//! Transaction confirmation watcher.
//!
//! Tracks broadcast transactions until they are buried under enough blocks
//! or disappear from the node. The watcher's map and aggregate are owned by
//! a single task; everything else talks to it through a [`WatcherHandle`].

use crate::chain::client::{ChainClient, TxReceipt};
use crate::chain::config::WatcherConfig;
use crate::chain::rpc::RpcChainClient;
use crate::core::{now, Error, Result, Timestamp, TxHash};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lifecycle state of a watched transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    /// Broadcast, not yet mined
    Pending,
    /// Mined and executed successfully
    Confirmed,
    /// Mined but reverted
    Failed,
    /// No longer known to the node
    Dropped,
}

/// Everything known about one watched transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub tx_hash: TxHash,
    pub status: TxState,
    pub network: String,
    pub first_seen_at: Timestamp,
    pub updated_at: Timestamp,
    pub block_number: Option<u64>,
    pub gas_used: Option<u64>,
    /// Last observed offered gas price while pending
    pub gas_price: Option<u64>,
    pub effective_gas_price: Option<u64>,
    pub confirmation_count: u64,
    /// Most recent per-hash failure, cleared by the next good observation
    pub error_message: Option<String>,
    pub receipt: Option<serde_json::Value>,
}

impl TransactionStatus {
    fn pending(tx_hash: TxHash, network: &str) -> Self {
        let at = now();
        Self {
            tx_hash,
            status: TxState::Pending,
            network: network.to_string(),
            first_seen_at: at,
            updated_at: at,
            block_number: None,
            gas_used: None,
            gas_price: None,
            effective_gas_price: None,
            confirmation_count: 0,
            error_message: None,
            receipt: None,
        }
    }
}

/// Aggregate statistics, maintained incrementally.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateTxMetrics {
    pub total: u64,
    pub confirmed: u64,
    /// Reverted plus dropped
    pub failed: u64,
    pub pending: u64,
    pub avg_gas_used: f64,
    pub avg_gas_price: f64,
    /// Percentage of terminal outcomes that succeeded
    pub success_rate: f64,
    #[serde(skip)]
    gas_samples: u64,
    #[serde(skip)]
    price_samples: u64,
}

impl AggregateTxMetrics {
    fn on_registered(&mut self) {
        self.total += 1;
        self.pending += 1;
    }

    fn on_receipt(&mut self, success: bool, gas_used: u64, gas_price: Option<u64>) {
        self.pending = self.pending.saturating_sub(1);
        if success {
            self.confirmed += 1;
        } else {
            self.failed += 1;
        }

        self.gas_samples += 1;
        self.avg_gas_used = incremental_mean(self.avg_gas_used, self.gas_samples, gas_used as f64);
        if let Some(price) = gas_price {
            self.price_samples += 1;
            self.avg_gas_price =
                incremental_mean(self.avg_gas_price, self.price_samples, price as f64);
        }
        self.update_success_rate();
    }

    fn on_dropped(&mut self) {
        self.pending = self.pending.saturating_sub(1);
        self.failed += 1;
        self.update_success_rate();
    }

    fn update_success_rate(&mut self) {
        let finished = self.confirmed + self.failed;
        self.success_rate = if finished == 0 {
            0.0
        } else {
            self.confirmed as f64 / finished as f64 * 100.0
        };
    }
}

/// Running mean after the `n`th sample `x`.
fn incremental_mean(avg: f64, n: u64, x: f64) -> f64 {
    (avg * (n - 1) as f64 + x) / n as f64
}

/// Invoked once per transaction when it reaches a terminal state.
pub type TxCallback = Arc<dyn Fn(&TransactionStatus) + Send + Sync>;

/// Counts from one polling tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    /// Hashes examined
    pub checked: usize,
    /// Hashes whose receipt appeared this tick
    pub mined: usize,
    /// Hashes retired after reaching the confirmation threshold
    pub retired: usize,
    /// Hashes dropped
    pub dropped: usize,
    /// Hashes whose RPC calls failed
    pub errors: usize,
}

struct Watched {
    status: TransactionStatus,
    callback: Option<TxCallback>,
    /// Whether the receipt has been folded into the aggregate
    counted: bool,
}

enum Observation {
    Mined(TxReceipt),
    Pending { gas_price: Option<u64> },
    Missing,
    Error(String),
}

async fn observe(client: &dyn ChainClient, hash: &TxHash) -> Observation {
    match client.get_receipt(hash).await {
        Ok(Some(receipt)) => return Observation::Mined(receipt),
        Ok(None) => {}
        Err(e) => return Observation::Error(e.to_string()),
    }
    match client.get_pending_transaction(hash).await {
        Ok(Some(tx)) => {
            let gas_price = match tx.gas_price {
                Some(price) => Some(price),
                None => client.gas_price().await.ok(),
            };
            Observation::Pending { gas_price }
        }
        Ok(None) => Observation::Missing,
        Err(e) => Observation::Error(e.to_string()),
    }
}

/// Transaction watcher state and polling logic.
pub struct TransactionWatcher {
    config: WatcherConfig,
    clients: HashMap<String, Arc<dyn ChainClient>>,
    live: HashMap<TxHash, Watched>,
    retired: VecDeque<TransactionStatus>,
    metrics: AggregateTxMetrics,
}

impl TransactionWatcher {
    /// Create a watcher over the given clients, keyed by their network name.
    pub fn new(config: WatcherConfig, clients: Vec<Arc<dyn ChainClient>>) -> Self {
        let clients = clients
            .into_iter()
            .map(|c| (c.network().to_string(), c))
            .collect();
        Self {
            config,
            clients,
            live: HashMap::new(),
            retired: VecDeque::new(),
            metrics: AggregateTxMetrics::default(),
        }
    }

    /// Create a watcher with one JSON-RPC client per enabled network.
    pub fn from_config(config: WatcherConfig) -> Result<Self> {
        config.validate()?;
        let mut clients: Vec<Arc<dyn ChainClient>> = Vec::new();
        for name in config.enabled_networks() {
            let network = &config.networks[name];
            let client = RpcChainClient::new(name, network)?;
            info!(network = name, url = %client.url(), "Chain client configured");
            clients.push(Arc::new(client));
        }
        Ok(Self::new(config, clients))
    }

    /// Networks this watcher can poll.
    pub fn networks(&self) -> HashSet<String> {
        self.clients.keys().cloned().collect()
    }

    /// Start watching a transaction.
    ///
    /// Returns `false` for unconfigured networks and for strings that are not
    /// hex at all. Registering a hash that is already watched leaves its
    /// state untouched.
    pub fn register(&mut self, hash: &str, network: &str, callback: Option<TxCallback>) -> bool {
        match self.try_register(hash, network, callback) {
            Ok(()) => true,
            Err(e) => {
                warn!(tx_hash = hash, network, error = %e, "Rejected transaction registration");
                false
            }
        }
    }

    /// Start watching a transaction, reporting why a registration was refused.
    pub fn try_register(
        &mut self,
        hash: &str,
        network: &str,
        callback: Option<TxCallback>,
    ) -> Result<()> {
        if !self.clients.contains_key(network) {
            return Err(Error::UnknownNetwork(network.to_string()));
        }
        let tx_hash = TxHash::from_hex(hash)?;

        if let Some(existing) = self.live.get_mut(&tx_hash) {
            if existing.callback.is_none() {
                existing.callback = callback;
            }
            debug!(tx_hash = %tx_hash, "Transaction already watched");
            return Ok(());
        }

        info!(tx_hash = %tx_hash, network, "Watching transaction");
        let status = TransactionStatus::pending(tx_hash.clone(), network);
        self.live.insert(
            tx_hash,
            Watched {
                status,
                callback,
                counted: false,
            },
        );
        self.metrics.on_registered();
        Ok(())
    }

    /// Run one polling tick over every live transaction.
    pub async fn poll_once(&mut self) -> PollReport {
        let mut report = PollReport::default();
        if self.live.is_empty() {
            return report;
        }

        let networks: BTreeSet<String> =
            self.live.values().map(|w| w.status.network.clone()).collect();
        let head_lookups = networks.into_iter().filter_map(|name| {
            let client = self.clients.get(&name)?.clone();
            Some(async move {
                let head = client.latest_block().await.map_err(|e| e.to_string());
                (name, head)
            })
        });
        let heads: HashMap<String, std::result::Result<u64, String>> =
            join_all(head_lookups).await.into_iter().collect();

        let targets: Vec<(TxHash, Arc<dyn ChainClient>)> = self
            .live
            .iter()
            .filter_map(|(hash, w)| {
                self.clients
                    .get(&w.status.network)
                    .map(|c| (hash.clone(), Arc::clone(c)))
            })
            .collect();
        let observations = join_all(targets.into_iter().map(|(hash, client)| async move {
            let observation = observe(client.as_ref(), &hash).await;
            (hash, observation)
        }))
        .await;

        for (hash, observation) in observations {
            report.checked += 1;
            self.apply(hash, observation, &heads, &mut report);
        }

        debug!(
            checked = report.checked,
            mined = report.mined,
            retired = report.retired,
            dropped = report.dropped,
            errors = report.errors,
            "Transaction poll complete"
        );
        report
    }

    fn apply(
        &mut self,
        hash: TxHash,
        observation: Observation,
        heads: &HashMap<String, std::result::Result<u64, String>>,
        report: &mut PollReport,
    ) {
        let Some(watched) = self.live.get_mut(&hash) else {
            return;
        };
        let status = &mut watched.status;
        status.updated_at = now();
        let mut retire = false;

        match observation {
            Observation::Mined(receipt) => {
                status.status = if receipt.success {
                    TxState::Confirmed
                } else {
                    TxState::Failed
                };
                status.block_number = Some(receipt.block_number);
                status.gas_used = Some(receipt.gas_used);
                status.effective_gas_price = receipt.effective_gas_price;
                status.error_message = None;

                match heads.get(&status.network) {
                    Some(Ok(head)) => {
                        status.confirmation_count =
                            head.saturating_sub(receipt.block_number) + 1;
                    }
                    Some(Err(e)) => {
                        status.error_message = Some(format!("head lookup failed: {}", e));
                    }
                    None => {}
                }

                if !watched.counted {
                    watched.counted = true;
                    let price = receipt.effective_gas_price.or(status.gas_price);
                    self.metrics
                        .on_receipt(receipt.success, receipt.gas_used, price);
                    report.mined += 1;
                    info!(
                        tx_hash = %hash,
                        network = %status.network,
                        block = receipt.block_number,
                        gas_used = receipt.gas_used,
                        success = receipt.success,
                        "Transaction mined"
                    );
                }
                status.receipt = Some(receipt.raw);

                if status.confirmation_count >= self.config.confirmation_blocks {
                    retire = true;
                    report.retired += 1;
                    info!(
                        tx_hash = %hash,
                        confirmations = status.confirmation_count,
                        "Transaction reached confirmation threshold"
                    );
                }
            }
            Observation::Pending { gas_price } => {
                if gas_price.is_some() {
                    status.gas_price = gas_price;
                }
                status.error_message = None;
            }
            Observation::Missing if watched.counted => {
                // Mined earlier and already folded into the aggregate
                status.status = TxState::Dropped;
                status.error_message = Some("receipt no longer available".to_string());
                report.dropped += 1;
                retire = true;
                warn!(tx_hash = %hash, network = %status.network, "Mined transaction vanished");
            }
            Observation::Missing => {
                status.status = TxState::Dropped;
                self.metrics.on_dropped();
                report.dropped += 1;
                retire = true;
                warn!(tx_hash = %hash, network = %status.network, "Transaction dropped");
            }
            Observation::Error(e) => {
                warn!(tx_hash = %hash, error = %e, "Transaction poll failed");
                status.error_message = Some(e);
                report.errors += 1;
            }
        }

        if retire {
            self.retire(&hash);
        }
    }

    fn retire(&mut self, hash: &TxHash) {
        let Some(watched) = self.live.remove(hash) else {
            return;
        };
        if let Some(callback) = &watched.callback {
            if catch_unwind(AssertUnwindSafe(|| callback(&watched.status))).is_err() {
                error!(tx_hash = %hash, "Transaction callback panicked");
            }
        }
        if self.config.retain_terminal == 0 {
            return;
        }
        if self.retired.len() >= self.config.retain_terminal {
            self.retired.pop_front();
        }
        self.retired.push_back(watched.status);
    }

    /// Remove retained terminal records older than `max_age_hours`.
    ///
    /// An age too large to represent as a point in time removes nothing.
    pub fn cleanup(&mut self, max_age_hours: u64) -> usize {
        let cutoff = i64::try_from(max_age_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .and_then(|age| now().checked_sub_signed(age));
        match cutoff {
            Some(cutoff) => self.cleanup_before(cutoff),
            None => 0,
        }
    }

    /// Remove retained terminal records last updated before `cutoff`.
    pub fn cleanup_before(&mut self, cutoff: Timestamp) -> usize {
        let before = self.retired.len();
        self.retired.retain(|s| s.updated_at >= cutoff);
        let removed = before - self.retired.len();
        if removed > 0 {
            info!(removed, "Cleaned up terminal transaction records");
        }
        removed
    }

    /// Status of a live transaction.
    pub fn status(&self, hash: &str) -> Option<TransactionStatus> {
        let hash = TxHash::from_hex(hash).ok()?;
        self.live.get(&hash).map(|w| w.status.clone())
    }

    /// Copy of the aggregate statistics.
    pub fn metrics(&self) -> AggregateTxMetrics {
        self.metrics.clone()
    }

    /// Live transactions, oldest first.
    pub fn tracked(&self) -> Vec<TransactionStatus> {
        let mut tracked: Vec<TransactionStatus> =
            self.live.values().map(|w| w.status.clone()).collect();
        tracked.sort_by_key(|s| s.first_seen_at);
        tracked
    }

    /// Retained terminal records, oldest first.
    pub fn recent_terminal(&self) -> Vec<TransactionStatus> {
        self.retired.iter().cloned().collect()
    }

    /// Move the watcher into its own task and return a handle to it.
    pub fn spawn(self) -> (WatcherHandle, JoinHandle<TransactionWatcher>) {
        let (tx, rx) = mpsc::channel(256);
        let handle = WatcherHandle {
            commands: tx,
            networks: Arc::new(self.networks()),
        };
        (handle, tokio::spawn(self.run(rx)))
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Self {
        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.poll_interval_secs,
            confirmation_blocks = self.config.confirmation_blocks,
            "Transaction watcher started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                command = commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.handle(command).await,
                },
            }
        }

        info!(tracked = self.live.len(), "Transaction watcher stopped");
        self
    }

    async fn handle(&mut self, command: Command) {
        // A dropped reply receiver only means the caller stopped waiting
        match command {
            Command::Register {
                hash,
                network,
                callback,
                reply,
            } => {
                let _ = reply.send(self.register(&hash, &network, callback));
            }
            Command::Status { hash, reply } => {
                let _ = reply.send(self.status(&hash));
            }
            Command::Metrics { reply } => {
                let _ = reply.send(self.metrics());
            }
            Command::Tracked { reply } => {
                let _ = reply.send(self.tracked());
            }
            Command::RecentTerminal { reply } => {
                let _ = reply.send(self.recent_terminal());
            }
            Command::Cleanup {
                max_age_hours,
                reply,
            } => {
                let _ = reply.send(self.cleanup(max_age_hours));
            }
            Command::PollNow { reply } => {
                let report = self.poll_once().await;
                let _ = reply.send(report);
            }
            Command::Shutdown => {}
        }
    }
}

enum Command {
    Register {
        hash: String,
        network: String,
        callback: Option<TxCallback>,
        reply: oneshot::Sender<bool>,
    },
    Status {
        hash: String,
        reply: oneshot::Sender<Option<TransactionStatus>>,
    },
    Metrics {
        reply: oneshot::Sender<AggregateTxMetrics>,
    },
    Tracked {
        reply: oneshot::Sender<Vec<TransactionStatus>>,
    },
    RecentTerminal {
        reply: oneshot::Sender<Vec<TransactionStatus>>,
    },
    Cleanup {
        max_age_hours: u64,
        reply: oneshot::Sender<usize>,
    },
    PollNow {
        reply: oneshot::Sender<PollReport>,
    },
    Shutdown,
}

/// Cloneable handle to a running watcher task.
#[derive(Clone)]
pub struct WatcherHandle {
    commands: mpsc::Sender<Command>,
    networks: Arc<HashSet<String>>,
}

impl WatcherHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| Error::WatcherStopped)?;
        response.await.map_err(|_| Error::WatcherStopped)
    }

    /// Start watching a transaction.
    ///
    /// Unconfigured networks are rejected without contacting the task.
    pub async fn register(
        &self,
        hash: &str,
        network: &str,
        callback: Option<TxCallback>,
    ) -> bool {
        if !self.networks.contains(network) {
            warn!(tx_hash = hash, network, "Rejected registration for unconfigured network");
            return false;
        }
        self.request(|reply| Command::Register {
            hash: hash.to_string(),
            network: network.to_string(),
            callback,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    /// Status of a live transaction.
    pub async fn status(&self, hash: &str) -> Option<TransactionStatus> {
        self.request(|reply| Command::Status {
            hash: hash.to_string(),
            reply,
        })
        .await
        .ok()
        .flatten()
    }

    /// Aggregate statistics.
    pub async fn metrics(&self) -> Result<AggregateTxMetrics> {
        self.request(|reply| Command::Metrics { reply }).await
    }

    /// Live transactions.
    pub async fn tracked(&self) -> Result<Vec<TransactionStatus>> {
        self.request(|reply| Command::Tracked { reply }).await
    }

    /// Retained terminal records.
    pub async fn recent_terminal(&self) -> Result<Vec<TransactionStatus>> {
        self.request(|reply| Command::RecentTerminal { reply }).await
    }

    /// Remove retained terminal records older than `max_age_hours`.
    pub async fn cleanup(&self, max_age_hours: u64) -> Result<usize> {
        self.request(|reply| Command::Cleanup {
            max_age_hours,
            reply,
        })
        .await
    }

    /// Run a polling tick now instead of waiting for the timer.
    pub async fn poll_now(&self) -> Result<PollReport> {
        self.request(|reply| Command::PollNow { reply }).await
    }

    /// Ask the task to stop after its current tick.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Whether the task is still accepting commands.
    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }
}
