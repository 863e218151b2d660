use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated network counters, reported as deltas against the previous
/// sampling tick. The first point of a run is all zeros.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIo {
    #[serde(rename = "bytesRx")]
    pub bytes_recv: u64,
    #[serde(rename = "bytesTx")]
    pub bytes_sent: u64,
    #[serde(rename = "pktsRx")]
    pub packets_recv: u64,
    #[serde(rename = "pktsTx")]
    pub packets_sent: u64,
}

impl NetworkIo {
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.bytes_recv == 0
            && self.bytes_sent == 0
            && self.packets_recv == 0
            && self.packets_sent == 0
    }
}

/// One host-metrics sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    /// System-wide CPU utilisation, clamped to [0, 100].
    #[serde(rename = "cpuPct")]
    pub cpu_percent: f64,
    #[serde(rename = "memUsedBytes")]
    pub memory_used_bytes: u64,
    #[serde(rename = "memPct")]
    pub memory_percent: f64,
    #[serde(rename = "netIO")]
    pub network_io: NetworkIo,
    /// Whether the calculator process is alive on this host.
    pub calculator_healthy: bool,
}

/// Collector configuration captured at experiment start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorConfigSnapshot {
    pub collection_interval_secs: u64,
    pub calculator_process_name: String,
}

/// Payload persisted by the metrics collector service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsData {
    pub config: CollectorConfigSnapshot,
    pub metrics: Vec<MetricPoint>,
}

impl MetricsData {
    /// Mean CPU utilisation over all points, or `None` for an empty run.
    ///
    /// This is the per-experiment sample used by steady-state statistics.
    #[must_use]
    pub fn mean_cpu_percent(&self) -> Option<f64> {
        if self.metrics.is_empty() {
            return None;
        }
        let sum: f64 = self.metrics.iter().map(|p| p.cpu_percent).sum();
        Some(sum / self.metrics.len() as f64)
    }
}
