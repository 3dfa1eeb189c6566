/// Cooperative run control
///
/// Stop is a one-shot `CancellationToken`. Pause is a single global gate
/// published on a `watch` channel: closing it makes every task block at its
/// next checkpoint, opening it releases all of them at once. Breakpoints are
/// shared with the engine so they can be toggled while a run is in flight.

use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Granularity of interruptible waits
const WAIT_SLICE: Duration = Duration::from_millis(50);

pub type BreakpointSet = Arc<RwLock<BTreeSet<String>>>;

/// Stop token, pause gate and breakpoint set of one run
#[derive(Debug, Clone)]
pub struct ControlSignal {
    stop: CancellationToken,
    /// `true` while the gate is open
    gate: Arc<watch::Sender<bool>>,
    breakpoints: BreakpointSet,
}

impl ControlSignal {
    /// Fresh signal: not stopped, gate open
    pub fn new(breakpoints: BreakpointSet) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            stop: CancellationToken::new(),
            gate: Arc::new(gate),
            breakpoints,
        }
    }

    /// Request stop; also opens the gate so paused tasks can observe it
    pub fn stop(&self) {
        self.stop.cancel();
        self.gate.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.stop
    }

    /// Close the gate; false if it was already closed
    pub fn pause(&self) -> bool {
        self.gate.send_replace(false)
    }

    /// Open the gate; false if it was already open
    pub fn resume(&self) -> bool {
        !self.gate.send_replace(true)
    }

    pub fn is_paused(&self) -> bool {
        !*self.gate.borrow()
    }

    /// Block while the gate is closed; returns early on stop
    pub async fn wait_if_paused(&self) {
        let mut rx = self.gate.subscribe();
        tokio::select! {
            _ = rx.wait_for(|open| *open) => {}
            _ = self.stop.cancelled() => {}
        }
    }

    pub fn is_breakpoint(&self, node_id: &str) -> bool {
        self.breakpoints.read().contains(node_id)
    }

    /// Sleep for `duration`, honoring pause and stop
    ///
    /// Time spent paused counts toward the wait. Returns false when stop
    /// interrupted it.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_stopped() {
                return false;
            }
            self.wait_if_paused().await;
            let now = Instant::now();
            if now >= deadline {
                return !self.is_stopped();
            }
            let slice = WAIT_SLICE.min(deadline - now);
            tokio::select! {
                _ = self.stop.cancelled() => return false,
                _ = tokio::time::sleep(slice) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal() -> ControlSignal {
        ControlSignal::new(Arc::new(RwLock::new(BTreeSet::new())))
    }

    #[tokio::test]
    async fn stop_interrupts_sleep() {
        let control = signal();
        let sleeper = control.clone();
        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.stop();
        let finished = tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert!(!finished);
    }

    #[tokio::test]
    async fn gate_releases_every_waiter() {
        let control = signal();
        assert!(control.pause());
        assert!(!control.pause());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let c = control.clone();
                tokio::spawn(async move { c.wait_if_paused().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        assert!(control.resume());
        for waiter in waiters {
            tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        }
        assert!(!control.is_paused());
    }

    #[tokio::test]
    async fn stop_releases_paused_tasks() {
        let control = signal();
        control.pause();
        let c = control.clone();
        let waiter = tokio::spawn(async move { c.wait_if_paused().await });
        control.stop();
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn short_sleep_completes() {
        assert!(signal().sleep(Duration::from_millis(10)).await);
    }

    #[test]
    fn breakpoints_are_shared() {
        let set: BreakpointSet = Arc::new(RwLock::new(BTreeSet::new()));
        let control = ControlSignal::new(Arc::clone(&set));
        set.write().insert("n1".into());
        assert!(control.is_breakpoint("n1"));
        assert!(!control.is_breakpoint("n2"));
    }
}
