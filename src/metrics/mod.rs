pub mod logger;
pub mod analyzer;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use parking_lot::RwLock;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub turn: u64,
    pub elapsed_s: f64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub packets_delivered: u64,
    pub packets_lost: u64,
    pub hellos_sent: u64,
    pub connections: usize,
    pub delivery_rate: f64,
}

#[derive(Debug, Clone)]
pub struct MetricsCollector {
    inner: Arc<RwLock<MetricsInner>>,
    start_time: Instant,
}

#[derive(Debug, Default)]
struct MetricsInner {
    packets_sent: u64,
    packets_dropped: u64,
    packets_delivered: u64,
    packets_lost: u64,
    hellos_sent: u64,
    connections: usize,
    snapshots: Vec<MetricsSnapshot>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            start_time: Instant::now(),
        }
    }

    /// A packet made it into a target's incoming queue.
    pub fn packet_sent(&self) {
        self.inner.write().packets_sent += 1;
    }

    /// The send draw failed; the packet never left.
    pub fn packet_dropped(&self) {
        self.inner.write().packets_dropped += 1;
    }

    pub fn packet_delivered(&self) {
        self.inner.write().packets_delivered += 1;
    }

    /// The receive draw failed during reset().
    pub fn packet_lost(&self) {
        self.inner.write().packets_lost += 1;
    }

    pub fn hello_sent(&self) {
        self.inner.write().hellos_sent += 1;
    }

    pub fn record_connections(&self, connections: usize) {
        self.inner.write().connections = connections;
    }

    pub fn snapshot(&self, turn: u64) -> MetricsSnapshot {
        let inner = self.inner.read();

        let attempted = inner.packets_sent + inner.packets_dropped;
        let delivery_rate = if attempted > 0 {
            inner.packets_delivered as f64 / attempted as f64
        } else {
            0.0
        };

        if delivery_rate > 1.0 {
            // Only possible if delivered is counted without a matching send
            warn!("Delivery rate above 1.0 ({:.3}) at turn {}", delivery_rate, turn);
        }

        MetricsSnapshot {
            turn,
            elapsed_s: self.start_time.elapsed().as_secs_f64(),
            packets_sent: inner.packets_sent,
            packets_dropped: inner.packets_dropped,
            packets_delivered: inner.packets_delivered,
            packets_lost: inner.packets_lost,
            hellos_sent: inner.hellos_sent,
            connections: inner.connections,
            delivery_rate,
        }
    }

    pub fn save_snapshot(&self, turn: u64) {
        let snapshot = self.snapshot(turn);
        self.inner.write().snapshots.push(snapshot);
    }

    pub fn get_snapshots(&self) -> Vec<MetricsSnapshot> {
        self.inner.read().snapshots.clone()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let metrics = MetricsCollector::new();
        metrics.packet_sent();
        metrics.packet_sent();
        metrics.packet_dropped();
        metrics.packet_delivered();
        metrics.packet_lost();

        let snap = metrics.snapshot(3);
        assert_eq!(snap.turn, 3);
        assert_eq!(snap.packets_sent, 2);
        assert_eq!(snap.packets_dropped, 1);
        assert_eq!(snap.packets_delivered, 1);
        assert_eq!(snap.packets_lost, 1);
        assert!((snap.delivery_rate - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = MetricsCollector::new();
        let clone = metrics.clone();
        clone.hello_sent();
        metrics.save_snapshot(1);
        assert_eq!(metrics.get_snapshots()[0].hellos_sent, 1);
    }
}
