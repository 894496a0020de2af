//! Prometheus-style counters exposed at `/metrics` in plain-text exposition
//! format.
//!
//! The GUI/CLI front-ends, embedded web UI, installer, and log-rotation
//! mechanics stay out of scope; this counter set does not.

use std::sync::atomic::{AtomicU64, Ordering};

use pierce_tunnel::TunnelMetricsSink;

#[derive(Default)]
pub struct Metrics {
    tunnels_active: AtomicU64,
    add_tunnel_races: AtomicU64,
    heartbeat_misses: AtomicU64,
    bytes_relayed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tunnels_active(&self, n: u64) {
        self.tunnels_active.store(n, Ordering::Relaxed);
    }

    pub fn record_add_tunnel_race(&self) {
        self.add_tunnel_races.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat_miss(&self) {
        self.heartbeat_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_relayed(&self, n: u64) {
        self.bytes_relayed.fetch_add(n, Ordering::Relaxed);
    }

    /// Render the current counters in Prometheus text exposition format.
    pub fn render(&self) -> String {
        format!(
            "# TYPE pierce_tunnels_active gauge\n\
             pierce_tunnels_active {}\n\
             # TYPE pierce_add_tunnel_races_total counter\n\
             pierce_add_tunnel_races_total {}\n\
             # TYPE pierce_heartbeat_misses_total counter\n\
             pierce_heartbeat_misses_total {}\n\
             # TYPE pierce_bytes_relayed_total counter\n\
             pierce_bytes_relayed_total {}\n",
            self.tunnels_active.load(Ordering::Relaxed),
            self.add_tunnel_races.load(Ordering::Relaxed),
            self.heartbeat_misses.load(Ordering::Relaxed),
            self.bytes_relayed.load(Ordering::Relaxed),
        )
    }
}

impl TunnelMetricsSink for Metrics {
    fn record_add_tunnel_race(&self) {
        self.add_tunnel_races.fetch_add(1, Ordering::Relaxed);
    }

    fn record_heartbeat_miss(&self) {
        self.heartbeat_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_bytes_relayed(&self, n: u64) {
        self.bytes_relayed.fetch_add(n, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_every_counter_name() {
        let m = Metrics::new();
        m.set_tunnels_active(3);
        m.record_add_tunnel_race();
        m.record_heartbeat_miss();
        m.record_bytes_relayed(128);
        let text = m.render();
        assert!(text.contains("pierce_tunnels_active 3"));
        assert!(text.contains("pierce_add_tunnel_races_total 1"));
        assert!(text.contains("pierce_heartbeat_misses_total 1"));
        assert!(text.contains("pierce_bytes_relayed_total 128"));
    }
}
