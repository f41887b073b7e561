use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64};
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};

use chrono::{DateTime, Duration, Local, TimeZone};
use tracing::info;

const BLOCKED: u32 = 1;
const UNBLOCKED: u32 = 0;

/// The per-listener daily byte allowance, covering both directions of
/// every session on that listener. Once the running total passes the
/// budget the listener is blocked until the next local midnight.
pub struct DayBudget {
    block_size: u64,
    passed: AtomicU64,
    blocked: AtomicU32,
    reset_at: Mutex<DateTime<Local>>,
}

impl DayBudget {
    pub fn new(block_size: u64) -> Self {
        DayBudget {
            block_size,
            passed: AtomicU64::new(0),
            blocked: AtomicU32::new(UNBLOCKED),
            reset_at: Mutex::new(next_local_midnight(Local::now())),
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn passed(&self) -> u64 {
        self.passed.load(Acquire)
    }

    pub fn blocked(&self) -> bool {
        self.blocked.load(Acquire) == BLOCKED
    }

    /// Starts a new accounting day if the clock has crossed reset_at.
    /// Called on every accept and every accounted chunk, so a blocked
    /// listener resumes on the first activity after midnight.
    pub fn roll_over_if_due(&self) {
        let mut reset_at = self.reset_at.lock().unwrap();
        let now = Local::now();
        if now < *reset_at {
            return;
        }
        *reset_at = next_local_midnight(now);
        self.passed.store(0, Release);
        self.blocked.store(UNBLOCKED, Release);
        info!(capacity = self.block_size, "daily budget reset, resuming traffic");
    }

    /// Accounts n forwarded bytes. Returns false when the chunk exceeds the
    /// day's budget; the caller must not forward it and should close the
    /// session.
    pub fn try_consume(&self, n: u64) -> bool {
        self.roll_over_if_due();
        if self.blocked() {
            return false;
        }
        let total = self.passed.fetch_add(n, AcqRel) + n;
        if total > self.block_size {
            self.blocked.store(BLOCKED, Release);
            return false;
        }
        true
    }

    #[cfg(test)]
    pub(crate) fn set_reset_at(&self, at: DateTime<Local>) {
        *self.reset_at.lock().unwrap() = at;
    }
}

/// 00:00:00 of the day after now. Computed fresh at every day boundary;
/// never derived by mutating a stored timestamp.
pub fn next_local_midnight(now: DateTime<Local>) -> DateTime<Local> {
    let tomorrow = now.date() + Duration::days(1);
    tomorrow
        .and_hms_opt(0, 0, 0)
        // midnight may not exist on a DST switch day; any instant in the
        // first hour keeps the schedule daily
        .unwrap_or_else(|| Local.from_utc_datetime(&(now.naive_utc() + Duration::days(1))))
}
