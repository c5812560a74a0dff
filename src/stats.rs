//! Process-wide connection and DNS counters
//!
//! One `ProxyStats` is created at startup and handed to every handler and to
//! the resolver through an `Arc`. All mutation goes through atomics.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct ProxyStats {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    dns_queries: AtomicU64,
    dns_failures: AtomicU64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// connection_opened counts a new client and returns a guard that
    /// decrements the active count when dropped. Returns the new total.
    pub fn connection_opened(self: &Arc<Self>) -> (ConnectionGuard, u64) {
        let total = self.total_connections.fetch_add(1, Ordering::Relaxed) + 1;
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        let guard = ConnectionGuard {
            stats: Arc::clone(self),
        };
        (guard, total)
    }

    #[inline]
    pub fn record_dns_query(&self) {
        self.dns_queries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dns_failure(&self) {
        self.dns_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            dns_queries: self.dns_queries.load(Ordering::Relaxed),
            dns_failures: self.dns_failures.load(Ordering::Relaxed),
        }
    }
}

/// Held by a handler for the lifetime of one client connection
#[derive(Debug)]
pub struct ConnectionGuard {
    stats: Arc<ProxyStats>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub total_connections: u64,
    pub active_connections: u64,
    pub dns_queries: u64,
    pub dns_failures: u64,
}

impl StatsSnapshot {
    /// dns_success_rate as a percentage, None before the first query
    pub fn dns_success_rate(&self) -> Option<f64> {
        if self.dns_queries == 0 {
            return None;
        }
        let succeeded = self.dns_queries.saturating_sub(self.dns_failures);
        Some(succeeded as f64 / self.dns_queries as f64 * 100.0)
    }
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Connection Statistics:")?;
        writeln!(f, "  Total Connections: {}", self.total_connections)?;
        writeln!(f, "  Active Connections: {}", self.active_connections)?;
        writeln!(f, "  DNS Queries: {}", self.dns_queries)?;
        write!(f, "  DNS Failures: {}", self.dns_failures)?;
        if let Some(rate) = self.dns_success_rate() {
            write!(f, "\n  DNS Success Rate: {rate:.1}%")?;
        }
        Ok(())
    }
}
