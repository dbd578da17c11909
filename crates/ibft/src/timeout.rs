//! Round timer.
//!
//! Each round waits `base * 2^(r-1)`, bounded by a maximum. The timer is a
//! tokio task that fires at most once per reset; resetting replaces any
//! pending timer, cancellation aborts it.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// Exponential per-round timeout.
pub struct RoundTimer {
    base: Duration,
    max: Duration,
    fired_tx: mpsc::Sender<u64>,
    handle: Option<JoinHandle<()>>,
}

impl RoundTimer {
    /// Create a timer. Fired rounds arrive on the returned receiver.
    pub fn new(base: Duration, max: Duration) -> (Self, mpsc::Receiver<u64>) {
        let (fired_tx, fired_rx) = mpsc::channel(8);
        (
            Self {
                base,
                max,
                fired_tx,
                handle: None,
            },
            fired_rx,
        )
    }

    /// Timeout for a round: `base * 2^(r-1)`, capped.
    pub fn timeout_for(&self, round: u64) -> Duration {
        let exp = round.saturating_sub(1).min(16) as u32;
        let timeout = self.base.saturating_mul(1u32 << exp);
        timeout.min(self.max)
    }

    /// Arm the timer for a round, replacing any pending one.
    pub fn reset(&mut self, round: u64) {
        self.cancel();
        let duration = self.timeout_for(round);
        let tx = self.fired_tx.clone();
        trace!(round, ?duration, "round timer armed");
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(round).await;
        }));
    }

    /// Abort the pending timer, if any.
    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_grows_exponentially_and_caps() {
        let (timer, _rx) = RoundTimer::new(Duration::from_secs(3), Duration::from_secs(120));
        assert_eq!(timer.timeout_for(1), Duration::from_secs(3));
        assert_eq!(timer.timeout_for(2), Duration::from_secs(6));
        assert_eq!(timer.timeout_for(3), Duration::from_secs(12));
        assert_eq!(timer.timeout_for(6), Duration::from_secs(96));
        assert_eq!(timer.timeout_for(7), Duration::from_secs(120));
        assert_eq!(timer.timeout_for(60), Duration::from_secs(120));
    }

    #[tokio::test]
    async fn fires_with_the_armed_round() {
        let (mut timer, mut rx) = RoundTimer::new(Duration::from_millis(5), Duration::from_secs(1));
        timer.reset(1);
        let fired = tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert_eq!(fired, 1);
    }

    #[tokio::test]
    async fn reset_replaces_pending_timer() {
        let (mut timer, mut rx) =
            RoundTimer::new(Duration::from_millis(50), Duration::from_secs(1));
        timer.reset(1);
        // Replace before the first fires; only round 2 should arrive.
        timer.reset(2);
        let fired = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert_eq!(fired, 2);
    }

    #[tokio::test]
    async fn cancel_prevents_firing() {
        let (mut timer, mut rx) =
            RoundTimer::new(Duration::from_millis(10), Duration::from_secs(1));
        timer.reset(1);
        timer.cancel();
        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not fire");
    }
}
