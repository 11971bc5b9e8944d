//! Transaction statistics for a memory master
//!
//! Counts every disposition a [`Master`](super::Master) observes, split by
//! outcome, along with bytes moved and round-trip latency of the transactions
//! that succeeded.

use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Completed with code 0
    pub successful: u64,
    /// Completed by the slave with a non-zero code
    pub failed: u64,
    /// Expired by deadline
    pub timeouts: u64,
    /// Abandoned at shutdown
    pub expired: u64,
    /// Bytes moved by successful transactions
    pub total_bytes: u64,
    total_latency_us: u64,
    /// `None` until the first success
    min_latency_us: Option<u64>,
    max_latency_us: u64,
}

impl BusStats {
    pub(crate) fn record_success(&mut self, latency_us: u64, bytes: u64) {
        self.successful += 1;
        self.total_bytes += bytes;
        self.total_latency_us += latency_us;
        self.min_latency_us = Some(self.min_latency_us.map_or(latency_us, |m| m.min(latency_us)));
        self.max_latency_us = self.max_latency_us.max(latency_us);
    }

    pub(crate) fn record_failure(&mut self) {
        self.failed += 1;
    }

    pub(crate) fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub(crate) fn record_expired(&mut self) {
        self.expired += 1;
    }

    /// Every transaction that reached a terminal status
    pub fn disposed(&self) -> u64 {
        self.successful + self.failed + self.timeouts + self.expired
    }

    pub fn avg_latency(&self) -> Duration {
        match self.successful {
            0 => Duration::ZERO,
            n => Duration::from_micros(self.total_latency_us / n),
        }
    }

    pub fn min_latency(&self) -> Option<Duration> {
        self.min_latency_us.map(Duration::from_micros)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_micros(self.max_latency_us)
    }

    /// Percentage of disposed transactions that succeeded; 100 when idle
    pub fn success_rate(&self) -> f64 {
        match self.disposed() {
            0 => 100.0,
            total => self.successful as f64 * 100.0 / total as f64,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl fmt::Display for BusStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ok, {} failed, {} timed out, {} expired, {} bytes, avg {:?}",
            self.successful,
            self.failed,
            self.timeouts,
            self.expired,
            self.total_bytes,
            self.avg_latency()
        )
    }
}
