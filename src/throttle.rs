//! Minimum-gap time gate for sequential stages.
//!
//! Backfill search and article fetching promise external services a minimum
//! idle delay between consecutive calls: the gap runs from the end of one call
//! to the start of the next, so a slow response never eats into it. Each stage
//! owns one [`Throttle`]; it is never shared across stages.

use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::debug;

#[derive(Debug)]
pub struct Throttle {
    min_gap: Duration,
    /// When the previous call finished.
    last_end: Option<Instant>,
}

impl Throttle {
    pub fn new(min_gap: Duration) -> Self {
        Self {
            min_gap,
            last_end: None,
        }
    }

    /// Wait out the gap, run `call`, and restart the gap once it completes,
    /// whatever it returned.
    pub async fn pace<F: Future>(&mut self, call: F) -> F::Output {
        if let Some(last_end) = self.last_end {
            let ready_at = last_end + self.min_gap;
            if ready_at > Instant::now() {
                debug!(gap = ?self.min_gap, "Throttling");
                sleep_until(ready_at).await;
            }
        }
        let output = call.await;
        self.last_end = Some(Instant::now());
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_first_call_is_immediate() {
        let mut throttle = Throttle::new(Duration::from_secs(60));
        let t0 = std::time::Instant::now();
        throttle.pace(async {}).await;
        assert!(t0.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_consecutive_calls_respect_gap() {
        let gap = Duration::from_millis(40);
        let mut throttle = Throttle::new(gap);
        let t0 = std::time::Instant::now();
        for _ in 0..4 {
            throttle.pace(async {}).await;
        }
        assert!(t0.elapsed() >= gap * 3);
    }

    #[tokio::test]
    async fn test_gap_starts_when_a_slow_call_ends() {
        let gap = Duration::from_millis(50);
        let mut throttle = Throttle::new(gap);

        let first_end = throttle.pace(async {
            sleep(gap * 2).await;
            std::time::Instant::now()
        })
        .await;
        let second_start = throttle.pace(async { std::time::Instant::now() }).await;

        assert!(second_start.duration_since(first_end) >= gap);
    }
}
