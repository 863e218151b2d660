use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Fixed histogram bin edges in milliseconds. Counts above the last edge
/// fall into the unbounded overflow bucket.
pub const LATENCY_BUCKET_EDGES_MS: [u64; 7] = [10, 50, 100, 200, 500, 1000, 2000];

/// Statistical law governing request arrival timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArrivalPattern {
    /// Deterministic spacing at the target rate.
    Uniform,
    /// Exponential inter-arrival times.
    Poisson,
}

impl Default for ArrivalPattern {
    fn default() -> Self {
        Self::Uniform
    }
}

/// Transport policy of the load generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Shared connection pool with idle reuse.
    Keepalive,
    /// Close the connection after every request.
    Short,
}

impl Default for ConnectionMode {
    fn default() -> Self {
        Self::Keepalive
    }
}

/// Requester configuration captured at experiment start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequesterConfigSnapshot {
    pub target_ip: String,
    pub target_port: u16,
    pub qps: u32,
    pub arrival_pattern: ArrivalPattern,
    pub connection_mode: ConnectionMode,
}

/// One latency histogram bin. `upper_ms = None` is the overflow bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyBucket {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper_ms: Option<u64>,
    pub count: u64,
}

/// Aggregate latency and rate statistics over one load-generation run.
///
/// Percentiles are computed over successful responses only; latencies
/// are milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestStats {
    #[serde(rename = "avg")]
    pub avg_latency_ms: f64,
    #[serde(rename = "min")]
    pub min_latency_ms: f64,
    #[serde(rename = "max")]
    pub max_latency_ms: f64,
    #[serde(rename = "p50")]
    pub p50_latency_ms: f64,
    #[serde(rename = "p90")]
    pub p90_latency_ms: f64,
    #[serde(rename = "p95")]
    pub p95_latency_ms: f64,
    #[serde(rename = "p99")]
    pub p99_latency_ms: f64,
    #[serde(rename = "errorRatePct")]
    pub error_rate_percent: f64,
    /// Sum of per-worker request rates.
    #[serde(rename = "actualQPS")]
    pub actual_qps: f64,
    /// Successful responses per second of wall-clock run time.
    pub throughput: f64,
    /// Little's-law style offered-load utilisation: `actual_qps * avg/1000`.
    #[serde(rename = "utilisation")]
    pub utilization: f64,
    #[serde(rename = "latencyBuckets", default)]
    pub latency_buckets: Vec<LatencyBucket>,
}

/// A capped per-request observation retained for inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub success: bool,
}

/// Payload persisted by the load generator service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestData {
    pub config: RequesterConfigSnapshot,
    #[serde(rename = "total")]
    pub total_requests: u64,
    #[serde(rename = "success")]
    pub success_count: u64,
    #[serde(rename = "fail")]
    pub failure_count: u64,
    pub stats: RequestStats,
    #[serde(default)]
    pub samples: Vec<RequestSample>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrival_pattern_wire_form() {
        assert_eq!(
            serde_json::to_string(&ArrivalPattern::Poisson).unwrap(),
            "\"poisson\""
        );
        let p: ArrivalPattern = serde_json::from_str("\"uniform\"").unwrap();
        assert_eq!(p, ArrivalPattern::Uniform);
    }

    #[test]
    fn request_data_round_trip() {
        let data = RequestData {
            config: RequesterConfigSnapshot {
                target_ip: "10.0.0.5".to_string(),
                target_port: 80,
                qps: 100,
                arrival_pattern: ArrivalPattern::Poisson,
                connection_mode: ConnectionMode::Short,
            },
            total_requests: 10,
            success_count: 9,
            failure_count: 1,
            stats: RequestStats::default(),
            samples: vec![RequestSample {
                timestamp: Utc::now(),
                latency_ms: 12.5,
                success: true,
            }],
        };

        let json = serde_json::to_string_pretty(&data).unwrap();
        let back: RequestData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.total_requests, back.success_count + back.failure_count);
        assert_eq!(back.samples.len(), 1);
        assert!(json.contains("errorRatePct"));
        assert!(json.contains("actualQPS"));
        assert!(json.contains("utilisation"));
        assert!(json.contains("latencyMs"));
    }
}
