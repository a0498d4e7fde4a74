//! Request admission for one vendor client.
//!
//! Two independent limits apply to every request:
//! - a reservoir of `capacity` grants per rolling window (the vendor quota),
//!   tracked as a log of grant instants so no window ever exceeds the quota;
//! - a semaphore bounding simultaneous in-flight requests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep};
use tracing::debug;

pub const QUOTA_WINDOW: Duration = Duration::from_secs(60);

pub struct RequestLimiter {
    vendor: &'static str,
    capacity: usize,
    window: Duration,
    grants: Mutex<VecDeque<Instant>>,
    in_flight: Arc<Semaphore>,
}

/// Held for the duration of one HTTP exchange.
pub struct RequestPermit {
    _in_flight: OwnedSemaphorePermit,
}

impl RequestLimiter {
    /// `requests_per_minute` grants per rolling minute, at most `max_in_flight` concurrently.
    pub fn per_minute(vendor: &'static str, requests_per_minute: u32, max_in_flight: usize) -> Self {
        Self::new(vendor, requests_per_minute as usize, QUOTA_WINDOW, max_in_flight)
    }

    pub fn new(vendor: &'static str, capacity: usize, window: Duration, max_in_flight: usize) -> Self {
        Self {
            vendor,
            capacity: capacity.max(1),
            window,
            grants: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
        }
    }

    /// Waits until both an in-flight slot and a quota grant are available.
    pub async fn acquire(&self) -> Result<RequestPermit, AcquireError> {
        let in_flight = self.in_flight.clone().acquire_owned().await?;

        loop {
            let wait = {
                let mut grants = self.grants.lock().await;
                let now = Instant::now();
                while let Some(&oldest) = grants.front() {
                    if now.duration_since(oldest) >= self.window {
                        grants.pop_front();
                    } else {
                        break;
                    }
                }

                if grants.len() < self.capacity {
                    grants.push_back(now);
                    None
                } else {
                    grants
                        .front()
                        .map(|&oldest| self.window.saturating_sub(now.duration_since(oldest)))
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    debug!(
                        vendor = self.vendor,
                        delay_ms = delay.as_millis() as u64,
                        "vendor quota exhausted, delaying request"
                    );
                    metrics::counter!("sis_vendor_throttled_total", "vendor" => self.vendor)
                        .increment(1);
                    sleep(delay).await;
                }
            }
        }

        Ok(RequestPermit {
            _in_flight: in_flight,
        })
    }

    /// Grants remaining in the current window.
    pub async fn available(&self) -> usize {
        let grants = self.grants.lock().await;
        let now = Instant::now();
        let live = grants
            .iter()
            .filter(|&&at| now.duration_since(at) < self.window)
            .count();
        self.capacity.saturating_sub(live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bursts_beyond_quota_are_delayed_not_exceeded() {
        let limiter = RequestLimiter::per_minute("infinite_campus", 3, 5);
        let start = Instant::now();

        for _ in 0..3 {
            drop(limiter.acquire().await.unwrap());
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(limiter.available().await, 0);

        drop(limiter.acquire().await.unwrap());
        assert!(start.elapsed() >= QUOTA_WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn rolling_window_never_exceeds_capacity() {
        let limiter = RequestLimiter::per_minute("powerschool", 5, 5);
        let start = Instant::now();
        let mut granted_at = Vec::new();

        for i in 0..12 {
            if i % 4 == 0 {
                tokio::time::advance(Duration::from_secs(7)).await;
            }
            drop(limiter.acquire().await.unwrap());
            granted_at.push(start.elapsed());
        }

        for (i, &t) in granted_at.iter().enumerate() {
            let in_window = granted_at[i..]
                .iter()
                .filter(|&&later| later - t < QUOTA_WINDOW)
                .count();
            assert!(in_window <= 5, "{in_window} grants inside one window");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_cap_is_independent_of_quota() {
        let limiter = Arc::new(RequestLimiter::per_minute("powerschool", 120, 2));
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
    }
}
