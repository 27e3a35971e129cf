//! # Link Monitor
//!
//! Tracks traffic counters for the UDP path and judges whether the remote
//! bridge is still alive. Liveness depends only on *when* the last
//! well-formed envelope arrived, never on its content.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value};

/// Silence after which the peer is considered gone
pub const LINK_TIMEOUT: Duration = Duration::from_secs(15);

/// Point-in-time copy of the link counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    /// Datagrams that failed envelope validation
    pub rx_malformed: u64,
    pub last_rx_time: Option<Instant>,
}

impl LinkStats {
    /// `true` iff an envelope arrived less than [`LINK_TIMEOUT`] before `now`
    pub fn connection_active_at(&self, now: Instant) -> bool {
        match self.last_rx_time {
            Some(last) => now.saturating_duration_since(last) < LINK_TIMEOUT,
            None => false,
        }
    }

    pub fn connection_active(&self) -> bool {
        self.connection_active_at(Instant::now())
    }
}

/// Serializable view of [`LinkStats`] for STATUS envelopes
#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_malformed: u64,
    pub connection_active: bool,
    /// Seconds since the last envelope, if any arrived yet
    pub last_rx_age_s: Option<f64>,
}

impl LinkReport {
    pub fn from_stats(stats: &LinkStats, now: Instant) -> Self {
        Self {
            tx_packets: stats.tx_packets,
            tx_bytes: stats.tx_bytes,
            rx_packets: stats.rx_packets,
            rx_bytes: stats.rx_bytes,
            rx_malformed: stats.rx_malformed,
            connection_active: stats.connection_active_at(now),
            last_rx_age_s: stats
                .last_rx_time
                .map(|t| now.saturating_duration_since(t).as_secs_f64()),
        }
    }
}

#[derive(Debug, Default)]
struct MonitorState {
    stats: LinkStats,
    peer_status: Option<Map<String, Value>>,
}

/// Shared, internally synchronized link state
///
/// Written by the UDP receive task and every sender; read by the timers.
#[derive(Debug, Default)]
pub struct LinkMonitor {
    state: Mutex<MonitorState>,
}

impl LinkMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut MonitorState) -> R) -> R {
        // Counters stay meaningful even if a holder panicked mid-update
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    pub fn record_tx(&self, bytes: usize) {
        self.with_state(|s| {
            s.stats.tx_packets += 1;
            s.stats.tx_bytes += bytes as u64;
        });
    }

    /// Record a well-formed envelope received at `now`
    pub fn record_rx_at(&self, bytes: usize, now: Instant) {
        self.with_state(|s| {
            s.stats.rx_packets += 1;
            s.stats.rx_bytes += bytes as u64;
            s.stats.last_rx_time = Some(now);
        });
    }

    pub fn record_rx(&self, bytes: usize) {
        self.record_rx_at(bytes, Instant::now());
    }

    pub fn record_malformed(&self) {
        self.with_state(|s| s.stats.rx_malformed += 1);
    }

    pub fn set_peer_status(&self, status: Map<String, Value>) {
        self.with_state(|s| s.peer_status = Some(status));
    }

    /// Last STATUS map the peer published
    pub fn peer_status(&self) -> Option<Map<String, Value>> {
        self.with_state(|s| s.peer_status.clone())
    }

    pub fn stats(&self) -> LinkStats {
        self.with_state(|s| s.stats)
    }

    pub fn is_active_at(&self, now: Instant) -> bool {
        self.stats().connection_active_at(now)
    }

    pub fn is_active(&self) -> bool {
        self.is_active_at(Instant::now())
    }
}
