use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::floodgate::common::Result;
use crate::floodgate::mongo::filter::stats::{fs_usable_size, journal_files_size};
use crate::floodgate::mongo::filter::{QuotaFilter, StatsSource};

/// After this many consecutive failed recomputations the monitor stops
/// pretending it can recover and asks the process to wind down. The filter
/// stays blocked the whole time, so no quota is leaked while failing.
const MAX_MONITOR_ERRORS: u32 = 5;

/// Recomputes backend storage usage whenever a session reports a
/// storage-changing operation, and drives the filter's blocked bit from
/// the result. Event-driven: it sleeps on the dirty queue, not a timer.
pub(crate) struct DataSizeMonitor {
    filter: Arc<QuotaFilter>,
    stats: Box<dyn StatsSource>,
    quota_bytes: u64,
    journal_dir: Option<PathBuf>,
    errors: u32,
}

impl DataSizeMonitor {
    pub fn new(filter: Arc<QuotaFilter>, stats: Box<dyn StatsSource>) -> Self {
        let settings = filter.settings();
        let mut quota_bytes = settings.quota_data_size as u64 * 1024 * 1024;
        let mut journal_dir = None;
        if !settings.base_dir.is_empty() {
            // The quota can never exceed what the filesystem can hold.
            match fs_usable_size(&settings.base_dir, settings.fs_reserved_blocks) {
                Ok(usable) => quota_bytes = quota_bytes.min(usable),
                Err(e) => {
                    warn!(%e, base_dir = %settings.base_dir, "could not stat filesystem, using configured quota");
                },
            }
            journal_dir = Some(Path::new(&settings.base_dir).join("data").join("journal"));
        }
        DataSizeMonitor {
            filter,
            stats,
            quota_bytes,
            journal_dir,
            errors: 0,
        }
    }

    pub async fn run(mut self, mut dirty: mpsc::Receiver<()>) {
        let halt = self.filter.halt().clone();
        loop {
            tokio::select! {
                _ = halt.wait() => break,
                token = dirty.recv() => {
                    if token.is_none() {
                        break;
                    }
                    // fetch all pending tokens so a burst of writes costs
                    // one recomputation
                    while dirty.try_recv().is_ok() {}
                    self.recalculate().await;
                },
            }
        }
        debug!("data size monitor exits");
    }

    async fn recalculate(&mut self) {
        match self.current_usage().await {
            Ok(used) => {
                self.errors = 0;
                debug!(used, quota = self.quota_bytes, "recalculated disk usage");
                if used >= self.quota_bytes as f64 {
                    error!(used, quota = self.quota_bytes, "database size exceeds quota");
                    self.filter.block();
                } else {
                    self.filter.clear_block();
                }
            },
            Err(e) => {
                // fail closed: an unreachable backend must not leak quota
                error!(%e, "failed to read database stats");
                self.filter.block();
                self.errors += 1;
                if self.errors >= MAX_MONITOR_ERRORS {
                    error!(errors = self.errors, "giving up on the stats backend, stopping the server");
                    self.filter.raise_stop();
                }
            },
        }
    }

    async fn current_usage(&mut self) -> Result<f64> {
        let stats = self.stats.fetch().await?;
        let mut used = stats.data_size + stats.index_size;
        if let Some(journal_dir) = &self.journal_dir {
            used += journal_files_size(journal_dir) as f64;
        }
        Ok(used)
    }
}
