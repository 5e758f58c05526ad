//! Elapsed-time publisher
//!
//! Publishes the age of the current buffer window in whole seconds, clamped
//! to the retention limit, once per tick. Display only.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Whole seconds between `window_start` and `now`, clamped to `[0, limit_secs]`
pub fn elapsed_secs(window_start: Instant, now: Instant, limit_secs: u64) -> u64 {
    let secs = now.saturating_duration_since(window_start).as_secs();
    secs.min(limit_secs)
}

pub struct ElapsedTimePublisher {
    period: Duration,
    limit_secs: u64,
    tx: watch::Sender<u64>,
    interval: Option<Interval>,
}

impl ElapsedTimePublisher {
    pub fn new(period: Duration, limit_secs: u64) -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            period,
            limit_secs,
            tx,
            interval: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Restart the tick for a window that began at `window_start`
    pub fn arm(&mut self, window_start: Instant) {
        let mut interval = interval_at(window_start + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        self.tx.send_replace(0);
    }

    pub fn disarm(&mut self) {
        self.interval = None;
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Resolves on the next tick; never resolves while disarmed
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }

    /// Publish the current value and return it
    pub fn publish(&self, window_start: Option<Instant>, now: Instant) -> u64 {
        let value = window_start
            .map(|start| elapsed_secs(start, now, self.limit_secs))
            .unwrap_or(0);
        self.tx.send_replace(value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elapsed_floors_and_clamps() {
        let t0 = Instant::now();
        assert_eq!(elapsed_secs(t0, t0, 60), 0);
        assert_eq!(elapsed_secs(t0, t0 + Duration::from_millis(1999), 60), 1);
        assert_eq!(elapsed_secs(t0, t0 + Duration::from_secs(61), 60), 60);
        // Clock readings before the window start read as zero
        assert_eq!(elapsed_secs(t0 + Duration::from_secs(5), t0, 60), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_once_per_period_after_arming() {
        let mut publisher = ElapsedTimePublisher::new(Duration::from_secs(1), 60);
        let rx = publisher.subscribe();
        let t0 = Instant::now();

        publisher.arm(t0);
        assert_eq!(*rx.borrow(), 0);

        let fired = publisher.tick().await;
        assert_eq!(fired, t0 + Duration::from_secs(1));
        assert_eq!(publisher.publish(Some(t0), fired), 1);
        assert_eq!(*rx.borrow(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearming_resets_counter() {
        let mut publisher = ElapsedTimePublisher::new(Duration::from_secs(1), 60);
        let rx = publisher.subscribe();
        let t0 = Instant::now();
        publisher.arm(t0);
        publisher.publish(Some(t0), t0 + Duration::from_secs(42));
        assert_eq!(*rx.borrow(), 42);

        publisher.arm(t0 + Duration::from_secs(42));
        assert_eq!(*rx.borrow(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_publisher_never_ticks() {
        let mut publisher = ElapsedTimePublisher::new(Duration::from_secs(1), 60);
        publisher.disarm();
        assert!(!publisher.is_armed());

        let result = tokio::time::timeout(Duration::from_secs(5), publisher.tick()).await;
        assert!(result.is_err());
    }
}
