use std::sync::{Arc, Mutex};
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::floodgate::common::Shutdown;
use crate::floodgate::config::{FilterSettings, MongoBackend};
use crate::floodgate::mongo::filter::{DataSizeMonitor, FileCountMonitor, StatsSource};
use crate::floodgate::mongo::protocol::OpCode;

pub const BLOCKED: u32 = 1;
pub const UNBLOCKED: u32 = 0;

/// A full queue only means a recomputation is already pending; dropped
/// tokens coalesce with it.
const DIRTY_QUEUE_CAPACITY: usize = 100;

/// The policy consulted on the session fast path. Sessions ask `pass` with
/// one atomic load; the background monitors own the other side of the
/// `blocked` bit and publish it with release stores.
pub struct QuotaFilter {
    enabled: bool,
    /// 0 means pass, 1 means block
    blocked: AtomicU32,
    dirty_tx: mpsc::Sender<()>,
    dirty_rx: Mutex<Option<mpsc::Receiver<()>>>,
    settings: FilterSettings,
    backend: MongoBackend,
    /// process-level stop, raised if a monitor gives up for good
    stop: Arc<Shutdown>,
    /// cancels the monitors on filter shutdown
    halt: Arc<Shutdown>,
    monitors: Mutex<Vec<JoinHandle<()>>>,
}

impl QuotaFilter {
    pub fn new(settings: FilterSettings, backend: MongoBackend, stop: Arc<Shutdown>) -> Arc<Self> {
        let (dirty_tx, dirty_rx) = mpsc::channel(DIRTY_QUEUE_CAPACITY);
        Arc::new(QuotaFilter {
            enabled: settings.enabled,
            blocked: AtomicU32::new(UNBLOCKED),
            dirty_tx,
            dirty_rx: Mutex::new(Some(dirty_rx)),
            settings,
            backend,
            stop,
            halt: Shutdown::new(),
            monitors: Mutex::new(Vec::new()),
        })
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True iff op may be forwarded right now. Write operations are held
    /// back while the quota monitors have the blocked bit set; everything
    /// else always passes.
    pub fn pass(&self, op: OpCode) -> bool {
        !self.enabled || !op.is_write() || self.blocked.load(Acquire) == UNBLOCKED
    }

    /// Wakes the data-size monitor for storage-changing operations.
    /// Never blocks; when the queue is full the token is dropped.
    pub fn note_dirty(&self, op: OpCode) {
        if self.enabled && op.is_dirty() {
            let _ = self.dirty_tx.try_send(());
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked.load(Acquire) == BLOCKED
    }

    pub fn block(&self) {
        self.blocked.store(BLOCKED, Release);
    }

    /// Clears the blocked bit only if it is currently set, so a concurrent
    /// monitor's decision to block is never clobbered by a stale unblock.
    pub fn clear_block(&self) {
        let _ = self.blocked.compare_exchange(BLOCKED, UNBLOCKED, Release, Relaxed);
    }

    pub(crate) fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub(crate) fn backend(&self) -> &MongoBackend {
        &self.backend
    }

    pub(crate) fn halt(&self) -> &Arc<Shutdown> {
        &self.halt
    }

    /// Raised when a monitor has failed too many times in a row to keep
    /// enforcing the quota; the process winds down rather than run open.
    pub(crate) fn raise_stop(&self) {
        self.stop.raise_fault();
    }

    /// Spawns the background storage monitors. A no-op when the filter is
    /// disabled. The file-count monitor additionally needs a data directory
    /// to watch.
    pub fn start(self: &Arc<Self>, stats: Box<dyn StatsSource>) {
        if !self.enabled {
            return;
        }
        let mut monitors = self.monitors.lock().unwrap();
        if let Some(dirty_rx) = self.dirty_rx.lock().unwrap().take() {
            let monitor = DataSizeMonitor::new(self.clone(), stats);
            monitors.push(tokio::spawn(monitor.run(dirty_rx)));
        }
        if !self.settings.base_dir.is_empty() {
            let monitor = FileCountMonitor::new(self.clone());
            monitors.push(tokio::spawn(monitor.run()));
        }
    }

    /// Signals the monitors and joins them. Idempotent.
    pub async fn shutdown(&self) {
        self.halt.raise();
        let monitors = std::mem::take(&mut *self.monitors.lock().unwrap());
        for handle in monitors {
            let _ = handle.await;
        }
        debug!("quota filter shut down");
    }
}
