//! Lock-free statistics aggregation.
//!
//! Each worker owns append-only buffers during the run; the merge below
//! happens once, after every sender has joined, so no lock or channel sits
//! on the request hot path.

use tokio::time::Instant;

use perflab_core::{
    LatencyBucket, RequestData, RequestSample, RequestStats, RequesterConfigSnapshot,
    LATENCY_BUCKET_EDGES_MS,
};

/// Enqueue-side timing of one worker: the first and last tick that
/// actually enqueued a request, and how many were enqueued.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerTiming {
    pub first: Option<Instant>,
    pub last: Option<Instant>,
    pub scheduled: u64,
}

impl WorkerTiming {
    pub fn record(&mut self, now: Instant) {
        if self.first.is_none() {
            self.first = Some(now);
        }
        self.last = Some(now);
        self.scheduled += 1;
    }

    fn duration_secs(&self) -> Option<f64> {
        match (self.first, self.last) {
            (Some(first), Some(last)) if last > first => {
                Some(last.duration_since(first).as_secs_f64())
            }
            _ => None,
        }
    }
}

/// Result buffers of one sender task.
#[derive(Debug, Clone, Default)]
pub struct WorkerBuffers {
    /// Latencies of successful responses, milliseconds.
    pub latencies: Vec<f64>,
    /// Capped per-request observations.
    pub samples: Vec<RequestSample>,
}

/// Percentile by linear interpolation over a sorted slice.
#[must_use]
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (sorted.len() - 1) as f64 * p;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
    }
}

/// Histogram over the fixed bucket edges; the final bucket is unbounded.
#[must_use]
pub fn latency_buckets(latencies: &[f64]) -> Vec<LatencyBucket> {
    let mut counts = vec![0u64; LATENCY_BUCKET_EDGES_MS.len() + 1];
    for &latency in latencies {
        let slot = LATENCY_BUCKET_EDGES_MS
            .iter()
            .position(|&edge| latency <= edge as f64)
            .unwrap_or(LATENCY_BUCKET_EDGES_MS.len());
        counts[slot] += 1;
    }
    LATENCY_BUCKET_EDGES_MS
        .iter()
        .map(Some)
        .chain(std::iter::once(None))
        .zip(counts)
        .map(|(edge, count)| LatencyBucket {
            upper_ms: edge.copied(),
            count,
        })
        .collect()
}

/// Sum of per-worker request rates.
///
/// Summing rates (rather than dividing the grand total by the widest
/// `[min(start), max(end)]` envelope) avoids precision loss when worker
/// windows are skewed.
#[must_use]
pub fn actual_qps(timings: &[WorkerTiming]) -> f64 {
    timings
        .iter()
        .filter_map(|t| {
            t.duration_secs()
                .map(|secs| (t.scheduled.saturating_sub(1)) as f64 / secs)
        })
        .sum()
}

/// Merges worker buffers and computes the final payload.
#[must_use]
pub fn build_request_data(
    config: RequesterConfigSnapshot,
    timings: &[WorkerTiming],
    buffers: Vec<WorkerBuffers>,
    total: u64,
    success: u64,
    fail: u64,
) -> RequestData {
    let mut latencies = Vec::new();
    let mut samples = Vec::new();
    for buffer in buffers {
        latencies.extend(buffer.latencies);
        samples.extend(buffer.samples);
    }
    latencies.sort_unstable_by(f64::total_cmp);

    let overall_secs = overall_duration_secs(timings);
    let qps = if total == 0 { 0.0 } else { actual_qps(timings) };

    let mut stats = RequestStats {
        error_rate_percent: if total == 0 {
            100.0
        } else {
            fail as f64 / total as f64 * 100.0
        },
        actual_qps: qps,
        throughput: if overall_secs > 0.0 {
            success as f64 / overall_secs
        } else {
            0.0
        },
        ..RequestStats::default()
    };

    if !latencies.is_empty() {
        let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
        stats.avg_latency_ms = avg;
        stats.min_latency_ms = latencies[0];
        stats.max_latency_ms = latencies[latencies.len() - 1];
        stats.p50_latency_ms = percentile(&latencies, 0.50);
        stats.p90_latency_ms = percentile(&latencies, 0.90);
        stats.p95_latency_ms = percentile(&latencies, 0.95);
        stats.p99_latency_ms = percentile(&latencies, 0.99);
        stats.utilization = stats.actual_qps * (avg / 1000.0);
        stats.latency_buckets = latency_buckets(&latencies);
    }

    RequestData {
        config,
        total_requests: total,
        success_count: success,
        failure_count: fail,
        stats,
        samples,
    }
}

fn overall_duration_secs(timings: &[WorkerTiming]) -> f64 {
    let start = timings.iter().filter_map(|t| t.first).min();
    let end = timings.iter().filter_map(|t| t.last).max();
    match (start, end) {
        (Some(start), Some(end)) if end > start => end.duration_since(start).as_secs_f64(),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use perflab_core::{ArrivalPattern, ConnectionMode};
    use std::time::Duration;

    fn snapshot() -> RequesterConfigSnapshot {
        RequesterConfigSnapshot {
            target_ip: "10.0.0.5".to_string(),
            target_port: 80,
            qps: 100,
            arrival_pattern: ArrivalPattern::Uniform,
            connection_mode: ConnectionMode::Keepalive,
        }
    }

    fn timing(start: Instant, secs: f64, scheduled: u64) -> WorkerTiming {
        WorkerTiming {
            first: Some(start),
            last: Some(start + Duration::from_secs_f64(secs)),
            scheduled,
        }
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let sorted: Vec<f64> = (1..=100).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 1.0), 100.0);
        assert!((percentile(&sorted, 0.5) - 50.5).abs() < 1e-9);
        assert!((percentile(&sorted, 0.95) - 95.05).abs() < 1e-9);
    }

    #[test]
    fn percentiles_are_monotone() {
        let mut latencies: Vec<f64> = (0..1000).map(|i| ((i * 37) % 500) as f64).collect();
        latencies.sort_unstable_by(f64::total_cmp);
        let ps: Vec<f64> = [0.5, 0.9, 0.95, 0.99]
            .iter()
            .map(|&p| percentile(&latencies, p))
            .collect();
        assert!(latencies[0] <= ps[0]);
        assert!(ps.windows(2).all(|w| w[0] <= w[1]));
        assert!(ps[3] <= latencies[latencies.len() - 1]);
    }

    #[test]
    fn bucket_counts_sum_to_input_len() {
        let latencies = vec![5.0, 12.0, 80.0, 80.0, 450.0, 1500.0, 9999.0];
        let buckets = latency_buckets(&latencies);
        assert_eq!(buckets.len(), LATENCY_BUCKET_EDGES_MS.len() + 1);
        assert_eq!(
            buckets.iter().map(|b| b.count).sum::<u64>(),
            latencies.len() as u64
        );
        // 5.0 lands in <=10, 9999.0 in the overflow bucket.
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets[buckets.len() - 1].count, 1);
        assert!(buckets[buckets.len() - 1].upper_ms.is_none());
    }

    #[test]
    fn actual_qps_sums_per_worker_rates() {
        let start = Instant::now();
        // Two workers, each 101 enqueues over 10s: 100 intervals => 10/s.
        let timings = vec![timing(start, 10.0, 101), timing(start, 10.0, 101)];
        let qps = actual_qps(&timings);
        assert!((qps - 20.0).abs() < 1e-6, "got {qps}");
    }

    #[test]
    fn zero_requests_reports_full_error_rate_and_no_latency() {
        let data = build_request_data(snapshot(), &[], Vec::new(), 0, 0, 0);
        assert_eq!(data.stats.error_rate_percent, 100.0);
        assert_eq!(data.stats.actual_qps, 0.0);
        assert_eq!(data.stats.avg_latency_ms, 0.0);
        assert!(data.stats.latency_buckets.is_empty());
        assert!(data.samples.is_empty());
    }

    #[test]
    fn merge_accounts_every_success_latency() {
        let start = Instant::now();
        let timings = vec![timing(start, 2.0, 5)];
        let buffers = vec![
            WorkerBuffers {
                latencies: vec![10.0, 30.0],
                samples: vec![RequestSample {
                    timestamp: Utc::now(),
                    latency_ms: 10.0,
                    success: true,
                }],
            },
            WorkerBuffers {
                latencies: vec![20.0],
                samples: Vec::new(),
            },
        ];

        let data = build_request_data(snapshot(), &timings, buffers, 4, 3, 1);
        assert_eq!(data.total_requests, 4);
        assert_eq!(data.success_count, 3);
        assert!((data.stats.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(data.stats.min_latency_ms, 10.0);
        assert_eq!(data.stats.max_latency_ms, 30.0);
        assert!((data.stats.error_rate_percent - 25.0).abs() < 1e-9);
        let bucket_sum: u64 = data.stats.latency_buckets.iter().map(|b| b.count).sum();
        assert_eq!(bucket_sum, data.success_count);
        // Little's-law utilisation: qps * avg seconds.
        let expected_util = data.stats.actual_qps * 0.020;
        assert!((data.stats.utilization - expected_util).abs() < 1e-9);
    }
}
