// Wait-and-retry wrapper for remote calls.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Ordered waits between attempts. An operation is tried once, then once
/// more after each delay, so `delays.len() + 1` attempts in total.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    delays: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(delays: Vec<Duration>) -> Self {
        RetryPolicy { delays }
    }

    /// Single attempt, no retries.
    pub fn none() -> Self {
        RetryPolicy { delays: Vec::new() }
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    /// Run `op` until it succeeds or the schedule is exhausted, sleeping on
    /// the tokio timer between attempts. Returns the last error on failure.
    pub async fn run<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut waits = self.delays.iter();
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => match waits.next() {
                    Some(wait) => {
                        warn!(operation = what, attempt, wait_secs = wait.as_secs_f64(), error = %e, "retrying");
                        tokio::time::sleep(*wait).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    /// 10, 20, 30, 50, 100, 150, 300 and 600 seconds.
    fn default() -> Self {
        RetryPolicy::new(
            [10, 20, 30, 50, 100, 150, 300, 600]
                .into_iter()
                .map(Duration::from_secs)
                .collect(),
        )
    }
}
