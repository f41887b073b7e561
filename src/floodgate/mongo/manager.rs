use std::sync::{Arc, Mutex};
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;

use fnv::FnvHashMap;
use tokio::sync::Notify;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::floodgate::mongo::filter::QuotaFilter;
use crate::floodgate::mongo::session::Session;
use crate::floodgate::server::Conn;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks live sessions and recycles finished ones. A session whose
/// forwarders have both exited is parked in the idle map and handed back
/// out on a later accept instead of being rebuilt from scratch.
pub struct SessionManager {
    active: Mutex<FnvHashMap<u64, Arc<Session>>>,
    idle: Mutex<FnvHashMap<u64, Arc<Session>>>,
    next_sid: AtomicU64,
    drained: Notify,
}

impl SessionManager {
    pub fn new() -> Arc<Self> {
        Arc::new(SessionManager {
            active: Mutex::new(FnvHashMap::default()),
            idle: Mutex::new(FnvHashMap::default()),
            next_sid: AtomicU64::new(1),
            drained: Notify::new(),
        })
    }

    /// Builds (or revives) a session for a freshly accepted client/backend
    /// socket pair and registers it as active. The caller spawns it.
    pub fn attach(
        self: &Arc<Self>,
        client: Conn,
        backend: Conn,
        filter: Arc<QuotaFilter>,
    ) -> Arc<Session> {
        let recycled = {
            let mut idle = self.idle.lock().unwrap();
            idle.keys().next().copied().and_then(|sid| idle.remove(&sid))
        };
        let session = match recycled.map(Arc::try_unwrap) {
            Some(Ok(mut session)) => {
                debug!(sid = session.sid(), "reviving idle session");
                session.reset(client, backend);
                Arc::new(session)
            },
            other => {
                if let Some(Err(session)) = other {
                    // a forwarder task still holds a reference, park it again
                    self.idle.lock().unwrap().insert(session.sid(), session);
                }
                let sid = self.next_sid.fetch_add(1, Relaxed);
                Arc::new(Session::new(sid, client, backend, filter, Arc::downgrade(self)))
            },
        };
        self.active.lock().unwrap().insert(session.sid(), session.clone());
        session
    }

    /// Called by the session itself once both forwarders have exited.
    pub(crate) fn reclaim(&self, sid: u64) {
        let session = self.active.lock().unwrap().remove(&sid);
        if let Some(session) = session {
            debug!(sid, "session idle");
            self.idle.lock().unwrap().insert(sid, session);
        }
        if self.active.lock().unwrap().is_empty() {
            self.drained.notify_waiters();
        }
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Signals every active session and waits, with a bound, for their
    /// forwarders to wind down. Safe to call more than once.
    pub async fn shutdown(&self) {
        {
            let active = self.active.lock().unwrap();
            if active.is_empty() {
                return;
            }
            for session in active.values() {
                session.shutdown();
            }
        }
        let drained = timeout(DRAIN_TIMEOUT, async {
            while self.active_count() > 0 {
                // notify_waiters does not buffer a wakeup, so re-check
                // periodically instead of trusting a single notified()
                let _ = timeout(Duration::from_millis(50), self.drained.notified()).await;
            }
        })
        .await;
        if drained.is_err() {
            warn!(sessions = self.active_count(), "shutdown timed out waiting for sessions");
        }
    }
}
