use std::sync::Arc;

use log::debug;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, Instant};

/// Global cap on provider calls shared by every page of a run
///
/// Bounds concurrent calls with a semaphore and spaces call starts by
/// `60_000 / requests_per_minute` milliseconds.
#[derive(Debug)]
pub struct RequestLimiter {
    permits: Arc<Semaphore>,
    min_interval: Duration,
    next_start: Mutex<Option<Instant>>,
}

impl RequestLimiter {
    pub fn new(max_concurrent: usize, requests_per_minute: Option<u32>) -> Self {
        let min_interval = match requests_per_minute {
            Some(rpm) if rpm > 0 => Duration::from_millis(60_000 / rpm as u64),
            _ => Duration::ZERO,
        };
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_interval,
            next_start: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Refuse every pending and future acquire
    pub fn close(&self) {
        self.permits.close();
    }

    /// Wait for a free slot and the next start time; the call holds the permit
    pub async fn acquire(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        let permit = self.permits.clone().acquire_owned().await?;

        if !self.min_interval.is_zero() {
            let start = {
                let mut next = self.next_start.lock().await;
                let now = Instant::now();
                let start = next.map(|n| n.max(now)).unwrap_or(now);
                *next = Some(start + self.min_interval);
                start
            };
            if start > Instant::now() {
                debug!("Rate limiter delaying request by {:?}", start - Instant::now());
                tokio::time::sleep_until(start).await;
            }
        }

        Ok(permit)
    }
}
