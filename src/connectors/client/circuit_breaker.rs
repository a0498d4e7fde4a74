//! Per-client circuit breaker.
//!
//! State machine:
//! - Closed -> Open: `failure_threshold` consecutive failed requests
//! - Open -> HalfOpen: cooldown elapsed; one probe request is let through
//! - HalfOpen -> Closed: probe succeeded
//! - HalfOpen -> Open: probe failed (cooldown restarts)

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Outcome of asking the breaker for permission to send a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// Rejected without network I/O; the breaker reopens for probing after `retry_in`.
    Rejected { retry_in: Duration },
}

#[derive(Debug)]
pub struct CircuitBreaker {
    vendor: &'static str,
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    failure_threshold: u32,
    cooldown: Duration,
}

impl CircuitBreaker {
    pub fn new(vendor: &'static str, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            vendor,
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            probe_in_flight: false,
            failure_threshold: failure_threshold.max(1),
            cooldown,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn admit(&mut self) -> Admission {
        match self.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::Open => {
                let elapsed = self
                    .opened_at
                    .map(|at| at.elapsed())
                    .unwrap_or(self.cooldown);
                if elapsed >= self.cooldown {
                    self.transition_to(BreakerState::HalfOpen);
                    self.probe_in_flight = true;
                    Admission::Allowed
                } else {
                    Admission::Rejected {
                        retry_in: self.cooldown - elapsed,
                    }
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    // Another caller owns the probe
                    Admission::Rejected {
                        retry_in: Duration::ZERO,
                    }
                } else {
                    self.probe_in_flight = true;
                    Admission::Allowed
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.probe_in_flight = false;
        if self.state != BreakerState::Closed {
            self.transition_to(BreakerState::Closed);
        }
    }

    pub fn record_failure(&mut self) {
        self.probe_in_flight = false;
        match self.state {
            BreakerState::Closed => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.failure_threshold {
                    self.transition_to(BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => self.transition_to(BreakerState::Open),
            BreakerState::Open => {}
        }
    }

    /// Releases a half-open probe slot without judging the vendor's health
    /// (e.g. the probe ended in a 404). The failure streak is left as is.
    pub fn record_neutral(&mut self) {
        if self.state == BreakerState::HalfOpen {
            self.probe_in_flight = false;
        }
    }

    fn transition_to(&mut self, next: BreakerState) {
        let previous = self.state;
        self.state = next;
        match next {
            BreakerState::Open => {
                self.opened_at = Some(Instant::now());
                warn!(
                    vendor = self.vendor,
                    from = %previous,
                    failures = self.consecutive_failures,
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    "circuit breaker opened"
                );
                metrics::counter!("sis_vendor_breaker_opened_total", "vendor" => self.vendor)
                    .increment(1);
            }
            BreakerState::HalfOpen => {
                debug!(vendor = self.vendor, "circuit breaker half-open, probing");
            }
            BreakerState::Closed => {
                self.opened_at = None;
                self.consecutive_failures = 0;
                info!(vendor = self.vendor, from = %previous, "circuit breaker closed");
            }
        }
    }
}
