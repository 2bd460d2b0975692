//! Interval scheduling primitives.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info};

/// Countdown timer that rings every time the configured count is used up.
///
/// Each call to [`rings`](IntervalTimer::rings) subtracts the tick size;
/// when the countdown would fall below 1 it resets and reports true. Used to
/// run an expensive full pass every Nth tick while cheaper incremental
/// passes run on the others.
#[derive(Debug)]
pub struct IntervalTimer {
    initial: i64,
    tick: i64,
    remaining: i64,
    name: String,
}

impl IntervalTimer {
    pub fn new(initial: i64, tick: i64, name: &str) -> Self {
        Self {
            initial,
            tick,
            remaining: initial,
            name: name.to_string(),
        }
    }

    /// Advance one tick; true when the countdown wrapped.
    pub fn rings(&mut self) -> bool {
        self.remaining -= self.tick;
        if self.remaining < 1 {
            self.remaining = self.initial;
            info!(timer = %self.name, "timer rang");
            return true;
        }
        debug!(timer = %self.name, remaining = self.remaining, "timer waiting");
        false
    }
}

/// Run `task` once immediately, then again `interval` after each completion,
/// forever.
///
/// The wait is measured from the end of the previous run, so a slow pass
/// pushes the next one back; there is no catch-up burst and no overlap.
pub async fn run_on_interval<F, Fut>(name: &str, interval: Duration, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        task().await;
        debug!(task = %name, "pass complete, sleeping {:?}", interval);
        tokio::time::sleep(interval).await;
    }
}
