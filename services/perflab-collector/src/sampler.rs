use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::{Networks, ProcessStatus, System};
use tracing::{debug, warn};

use perflab_core::{
    CollectorConfigSnapshot, CoreResult, MetricPoint, MetricsData, NetworkIo,
};
use perflab_runtime::{Collect, RunContext, StartRequest};

use crate::config::CollectorConfig;

/// Ticker-driven system-metrics sampler.
///
/// One instance lives for the service lifetime; the sampling state
/// (sysinfo handles, previous network counters) is created fresh per run.
pub struct MetricsSampler {
    config: CollectorConfig,
}

/// Per-run parameters resolved from the start request.
pub struct SamplerParams {
    pub interval: Duration,
}

impl MetricsSampler {
    #[must_use]
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Collect for MetricsSampler {
    type Payload = MetricsData;
    type Params = SamplerParams;

    fn make_params(&self, request: &StartRequest) -> CoreResult<SamplerParams> {
        let secs = request
            .collection_interval
            .unwrap_or(self.config.collection_interval_secs);
        if secs == 0 {
            return Err(perflab_core::CoreError::validation(
                "collectionInterval must be > 0",
            ));
        }
        Ok(SamplerParams {
            interval: Duration::from_secs(secs),
        })
    }

    async fn collect(&self, ctx: RunContext, params: SamplerParams) -> CoreResult<MetricsData> {
        let mut probe = SystemProbe::new(self.config.calculator_process_name.clone());
        let mut data = MetricsData {
            config: CollectorConfigSnapshot {
                collection_interval_secs: params.interval.as_secs(),
                calculator_process_name: self.config.calculator_process_name.clone(),
            },
            metrics: Vec::new(),
        };

        let mut ticker = tokio::time::interval(params.interval);
        // A slow tick (e.g. process enumeration overrunning the interval)
        // must not trigger catch-up bursts.
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = ctx.cancelled() => {
                    debug!(points = data.metrics.len(), "sampling window closed, flushing buffer");
                    return Ok(data);
                }
                _ = ticker.tick() => {
                    let point = probe.sample();
                    // Timestamps must be strictly ordered; sub-second
                    // ticks on a coarse clock could otherwise collide.
                    if let Some(last) = data.metrics.last() {
                        if point.timestamp <= last.timestamp {
                            continue;
                        }
                    }
                    data.metrics.push(point);
                }
            }
        }
    }
}

struct NetTotals {
    bytes_recv: u64,
    bytes_sent: u64,
    packets_recv: u64,
    packets_sent: u64,
}

/// Wraps the sysinfo handles and the previous-tick state needed for
/// delta-based readings.
struct SystemProbe {
    system: System,
    networks: Networks,
    process_name: String,
    prev_net: Option<NetTotals>,
}

impl SystemProbe {
    fn new(process_name: String) -> Self {
        Self {
            system: System::new(),
            networks: Networks::new_with_refreshed_list(),
            process_name,
            prev_net: None,
        }
    }

    /// Takes one metric point. Individual sampler failures are best
    /// effort: they log a warning and leave the field at its zero value.
    fn sample(&mut self) -> MetricPoint {
        let (memory_used_bytes, memory_percent) = self.sample_memory();
        MetricPoint {
            timestamp: Utc::now(),
            cpu_percent: self.sample_cpu(),
            memory_used_bytes,
            memory_percent,
            network_io: self.sample_network(),
            calculator_healthy: self.sample_calculator_health(),
        }
    }

    /// CPU utilisation from the delta between consecutive refreshes.
    /// The first tick of a run seeds the state and reports 0.
    fn sample_cpu(&mut self) -> f64 {
        self.system.refresh_cpu();
        let usage = f64::from(self.system.global_cpu_info().cpu_usage());
        usage.clamp(0.0, 100.0)
    }

    fn sample_memory(&mut self) -> (u64, f64) {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        let used = self.system.used_memory();
        if total == 0 {
            warn!("total memory reported as zero, leaving memory fields empty");
            return (0, 0.0);
        }
        (used, used as f64 / total as f64 * 100.0)
    }

    /// Aggregated network counters as deltas against the previous tick;
    /// the first tick reports zeros and seeds the state.
    fn sample_network(&mut self) -> NetworkIo {
        self.networks.refresh();
        let mut totals = NetTotals {
            bytes_recv: 0,
            bytes_sent: 0,
            packets_recv: 0,
            packets_sent: 0,
        };
        for (_name, counters) in &self.networks {
            totals.bytes_recv += counters.total_received();
            totals.bytes_sent += counters.total_transmitted();
            totals.packets_recv += counters.total_packets_received();
            totals.packets_sent += counters.total_packets_transmitted();
        }

        let io = match &self.prev_net {
            Some(prev) => NetworkIo {
                bytes_recv: totals.bytes_recv.saturating_sub(prev.bytes_recv),
                bytes_sent: totals.bytes_sent.saturating_sub(prev.bytes_sent),
                packets_recv: totals.packets_recv.saturating_sub(prev.packets_recv),
                packets_sent: totals.packets_sent.saturating_sub(prev.packets_sent),
            },
            None => NetworkIo::default(),
        };
        self.prev_net = Some(totals);
        io
    }

    /// The calculator is healthy when some process whose name contains
    /// the configured fragment is running, sleeping or idle.
    fn sample_calculator_health(&mut self) -> bool {
        self.system.refresh_processes();
        self.system.processes().values().any(|process| {
            process.name().contains(&self.process_name)
                && matches!(
                    process.status(),
                    ProcessStatus::Run | ProcessStatus::Sleep | ProcessStatus::Idle
                )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn cancellable_context(deadline_ms: u64) -> (CancellationToken, RunContext) {
        let token = CancellationToken::new();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(deadline_ms);
        (token.clone(), RunContext::new(token, deadline))
    }

    fn sampler() -> MetricsSampler {
        MetricsSampler::new(CollectorConfig::default())
    }

    #[tokio::test]
    async fn collect_flushes_on_cancellation() {
        let (token, ctx) = cancellable_context(60_000);
        let s = sampler();
        let params = SamplerParams {
            interval: Duration::from_millis(100),
        };

        let handle = tokio::spawn(async move { s.collect(ctx, params).await });
        tokio::time::sleep(Duration::from_millis(350)).await;
        token.cancel();

        let data = handle.await.unwrap().unwrap();
        assert!(
            data.metrics.len() >= 2,
            "expected at least two points, got {}",
            data.metrics.len()
        );
    }

    #[tokio::test]
    async fn first_point_reports_zero_network_deltas() {
        let (token, ctx) = cancellable_context(60_000);
        let s = sampler();
        let params = SamplerParams {
            interval: Duration::from_millis(50),
        };

        let handle = tokio::spawn(async move { s.collect(ctx, params).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();

        let data = handle.await.unwrap().unwrap();
        assert!(data.metrics[0].network_io.is_zero());
    }

    #[tokio::test]
    async fn points_are_strictly_ordered_and_bounded() {
        let (token, ctx) = cancellable_context(60_000);
        let s = sampler();
        let params = SamplerParams {
            interval: Duration::from_millis(50),
        };

        let handle = tokio::spawn(async move { s.collect(ctx, params).await });
        tokio::time::sleep(Duration::from_millis(400)).await;
        token.cancel();

        let data = handle.await.unwrap().unwrap();
        for pair in data.metrics.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
        for point in &data.metrics {
            assert!((0.0..=100.0).contains(&point.cpu_percent));
            assert!((0.0..=100.0).contains(&point.memory_percent));
        }
    }
}
