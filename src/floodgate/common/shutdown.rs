use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{Acquire, Release};

use tokio::sync::watch;

/// A broadcast stop signal shared by the accept loops, sessions and
/// quota monitors. Raising it is idempotent; `wait` resolves immediately
/// once raised, so a task that checks late still observes the signal.
pub struct Shutdown {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    fault: AtomicBool,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = watch::channel(false);
        Arc::new(Shutdown { tx, rx, fault: AtomicBool::new(false) })
    }

    pub fn raise(&self) {
        // We hold a receiver ourselves, send cannot fail
        let _ = self.tx.send(true);
    }

    /// Raise because something is broken beyond recovery; the process
    /// should exit non-zero after winding down.
    pub fn raise_fault(&self) {
        self.fault.store(true, Release);
        self.raise();
    }

    pub fn is_fault(&self) -> bool {
        self.fault.load(Acquire)
    }

    pub fn is_raised(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn wait_resolves_after_raise() {
        let stop = Shutdown::new();
        assert!(!stop.is_raised());

        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.wait().await })
        };
        stop.raise();
        stop.raise(); // second raise is a no-op
        timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter timed out")
            .unwrap();
        assert!(stop.is_raised());

        // late waiters resolve immediately
        timeout(Duration::from_secs(1), stop.wait())
            .await
            .expect("late waiter timed out");
    }
}
