//! Background OS resource sampling.
//!
//! A dedicated thread reads CPU, memory, disk and network counters on a
//! fixed period and records them through a metrics sink.

use crate::core::{lock, Error, Result};
use crate::monitoring::metrics::MetricPoint;
use crate::monitoring::sink::MetricsSink;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tracing::{debug, error, info, warn};

pub const CPU_PERCENT: &str = "system.cpu_percent";
pub const MEMORY_PERCENT: &str = "system.memory_percent";
pub const MEMORY_USED_BYTES: &str = "system.memory_used_bytes";
pub const DISK_PERCENT: &str = "system.disk_percent";
pub const NETWORK_BYTES_SENT: &str = "system.network_bytes_sent";
pub const NETWORK_BYTES_RECV: &str = "system.network_bytes_recv";

/// Default sampling period.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Source of OS resource counters.
///
/// Each counter is read separately so one failing read does not hide the
/// others.
pub trait ResourceProbe: Send {
    /// Refresh cached OS state before the counters are read.
    fn refresh(&mut self) -> Result<()>;

    /// Global CPU utilisation, 0-100.
    fn cpu_percent(&mut self) -> Result<f64>;

    /// Memory utilisation as `(percent, used_bytes)`.
    fn memory(&mut self) -> Result<(f64, u64)>;

    /// Root filesystem utilisation, 0-100.
    fn disk_percent(&mut self) -> Result<f64>;

    /// Cumulative network bytes as `(sent, received)`.
    fn network_bytes(&mut self) -> Result<(u64, u64)>;
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    /// Create a probe and prime the CPU baseline.
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu();
        system.refresh_disks_list();
        system.refresh_networks_list();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceProbe for SysinfoProbe {
    fn refresh(&mut self) -> Result<()> {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        self.system.refresh_disks();
        self.system.refresh_networks();
        Ok(())
    }

    fn cpu_percent(&mut self) -> Result<f64> {
        Ok(self.system.global_cpu_info().cpu_usage() as f64)
    }

    fn memory(&mut self) -> Result<(f64, u64)> {
        let total = self.system.total_memory();
        if total == 0 {
            return Err(Error::SamplingFailed("total memory reported as zero".into()));
        }
        let used = self.system.used_memory();
        Ok((used as f64 / total as f64 * 100.0, used))
    }

    fn disk_percent(&mut self) -> Result<f64> {
        let disks = self.system.disks();
        let root = disks
            .iter()
            .find(|d| d.mount_point() == Path::new("/"))
            .or_else(|| disks.first())
            .ok_or_else(|| Error::SamplingFailed("no filesystems reported".into()))?;

        let total = root.total_space();
        if total == 0 {
            return Err(Error::SamplingFailed("root filesystem size is zero".into()));
        }
        let used = total.saturating_sub(root.available_space());
        Ok(used as f64 / total as f64 * 100.0)
    }

    fn network_bytes(&mut self) -> Result<(u64, u64)> {
        let (sent, recv) = self
            .system
            .networks()
            .iter()
            .fold((0u64, 0u64), |(s, r), (_, data)| {
                (s + data.total_transmitted(), r + data.total_received())
            });
        Ok((sent, recv))
    }
}

struct Worker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic sampler of OS resource counters.
pub struct SystemSampler {
    sink: Arc<dyn MetricsSink>,
    probe: Arc<Mutex<Box<dyn ResourceProbe>>>,
    interval: Duration,
    worker: Mutex<Option<Worker>>,
}

impl SystemSampler {
    /// Create a sampler using the `sysinfo` probe.
    pub fn new(sink: Arc<dyn MetricsSink>, interval: Duration) -> Self {
        Self::with_probe(sink, interval, Box::new(SysinfoProbe::new()))
    }

    /// Create a sampler with a custom probe.
    pub fn with_probe(
        sink: Arc<dyn MetricsSink>,
        interval: Duration,
        probe: Box<dyn ResourceProbe>,
    ) -> Self {
        Self {
            sink,
            probe: Arc::new(Mutex::new(probe)),
            interval,
            worker: Mutex::new(None),
        }
    }

    /// Whether the background thread is running.
    pub fn is_running(&self) -> bool {
        lock(&self.worker).is_some()
    }

    /// Start the background thread. Starting a running sampler is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut worker = lock(&self.worker);
        if worker.is_some() {
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let sink = Arc::clone(&self.sink);
        let probe = Arc::clone(&self.probe);
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("chainpulse-sampler".to_string())
            .spawn(move || loop {
                let recorded = catch_unwind(AssertUnwindSafe(|| sample(&probe, sink.as_ref())));
                if recorded.is_err() {
                    error!("System sampling panicked; continuing");
                }

                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => continue,
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| Error::Internal(format!("failed to spawn sampler thread: {}", e)))?;

        info!(interval_secs = interval.as_secs_f64(), "System sampler started");
        *worker = Some(Worker { stop: stop_tx, handle });
        Ok(())
    }

    /// Stop and join the background thread. Stopping an idle sampler is a no-op.
    pub fn stop(&self) {
        let Some(worker) = lock(&self.worker).take() else {
            return;
        };
        let _ = worker.stop.send(());
        if worker.handle.join().is_err() {
            error!("System sampler thread terminated abnormally");
        }
        info!("System sampler stopped");
    }

    /// Take one sample synchronously. Returns the number of metrics recorded.
    pub fn sample_once(&self) -> usize {
        sample(&self.probe, self.sink.as_ref())
    }
}

impl Drop for SystemSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sample(probe: &Mutex<Box<dyn ResourceProbe>>, sink: &dyn MetricsSink) -> usize {
    let mut probe = lock(probe);
    if let Err(e) = probe.refresh() {
        warn!(error = %e, "System refresh failed; skipping tick");
        return 0;
    }

    let mut values: Vec<(&str, f64)> = Vec::with_capacity(6);
    match probe.cpu_percent() {
        Ok(cpu) => values.push((CPU_PERCENT, cpu)),
        Err(e) => warn!(error = %e, metric = CPU_PERCENT, "Sampling failed"),
    }
    match probe.memory() {
        Ok((percent, used)) => {
            values.push((MEMORY_PERCENT, percent));
            values.push((MEMORY_USED_BYTES, used as f64));
        }
        Err(e) => warn!(error = %e, metric = MEMORY_PERCENT, "Sampling failed"),
    }
    match probe.disk_percent() {
        Ok(disk) => values.push((DISK_PERCENT, disk)),
        Err(e) => warn!(error = %e, metric = DISK_PERCENT, "Sampling failed"),
    }
    match probe.network_bytes() {
        Ok((sent, recv)) => {
            values.push((NETWORK_BYTES_SENT, sent as f64));
            values.push((NETWORK_BYTES_RECV, recv as f64));
        }
        Err(e) => warn!(error = %e, metric = NETWORK_BYTES_SENT, "Sampling failed"),
    }
    drop(probe);

    let mut tags = HashMap::new();
    tags.insert("type".to_string(), "system".to_string());
    let recorded = values.len();
    for (name, value) in values {
        sink.record(MetricPoint::new(name, value).with_tags(&tags));
    }
    debug!(recorded, "System sample recorded");
    recorded
}
