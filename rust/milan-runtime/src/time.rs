//! Timer awaitables.

use std::future::Future;
use std::time::{Duration, SystemTime};

/// Never completes. Handy as a neutral select input.
pub fn never() -> impl Future<Output = ()> + Send + 'static {
    std::future::pending()
}

/// Completes immediately.
pub fn always() -> impl Future<Output = ()> + Send + 'static {
    std::future::ready(())
}

/// Completes once `duration` has elapsed.
pub fn after(duration: Duration) -> impl Future<Output = ()> + Send + 'static {
    tokio::time::sleep(duration)
}

/// Completes at an absolute wall-clock time; immediately if it passed.
pub fn at(when: SystemTime) -> impl Future<Output = ()> + Send + 'static {
    let left = when
        .duration_since(SystemTime::now())
        .unwrap_or(Duration::ZERO);
    tokio::time::sleep(left)
}

/// Periodic retry: [`Ticker::tick`] completes every `period` elapsed,
/// compounding across calls. This is the "polling" flavor of timeout:
/// a plain [`after`] is a one-shot delay relative to its creation.
pub struct Ticker {
    interval: tokio::time::Interval,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        let start = tokio::time::Instant::now() + period;
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Ticker { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }
}
