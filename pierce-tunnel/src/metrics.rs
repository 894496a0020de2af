//! Seam for reporting tunnel-manager activity to an external counter set,
//! mirroring the `AuthTransport` pattern in `pierce-portmap`: the manager
//! itself has no opinion on how counters are stored or exposed, it just
//! calls into whatever sink it was built with.

/// Counters a [`crate::TunnelManager`] reports into as it runs. All methods
/// default to a no-op so a caller that doesn't care about metrics can use
/// [`NoopMetricsSink`] without implementing anything.
pub trait TunnelMetricsSink: Send + Sync {
    /// An add-tunnel negotiation lost the judger race (either side already
    /// had one in flight for the same peer).
    fn record_add_tunnel_race(&self) {}

    /// A live tunnel was closed because its peer missed too many
    /// consecutive heartbeats.
    fn record_heartbeat_miss(&self) {}

    /// `n` bytes of payload were forwarded verbatim to another peer's
    /// tunnel (store-and-forward relay, not a locally dispatched frame).
    fn record_bytes_relayed(&self, n: u64) {
        let _ = n;
    }
}

#[derive(Default)]
pub struct NoopMetricsSink;

impl TunnelMetricsSink for NoopMetricsSink {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingSink {
        races: AtomicU64,
        misses: AtomicU64,
        bytes: AtomicU64,
    }

    impl TunnelMetricsSink for CountingSink {
        fn record_add_tunnel_race(&self) {
            self.races.fetch_add(1, Ordering::Relaxed);
        }
        fn record_heartbeat_miss(&self) {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fn record_bytes_relayed(&self, n: u64) {
            self.bytes.fetch_add(n, Ordering::Relaxed);
        }
    }

    #[test]
    fn noop_sink_accepts_every_call() {
        let sink = NoopMetricsSink;
        sink.record_add_tunnel_race();
        sink.record_heartbeat_miss();
        sink.record_bytes_relayed(128);
    }

    #[test]
    fn counting_sink_observes_calls() {
        let sink = CountingSink::default();
        sink.record_add_tunnel_race();
        sink.record_bytes_relayed(64);
        assert_eq!(sink.races.load(Ordering::Relaxed), 1);
        assert_eq!(sink.bytes.load(Ordering::Relaxed), 64);
        assert_eq!(sink.misses.load(Ordering::Relaxed), 0);
    }
}
