use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use perflab_core::{
    ArrivalPattern, CoreError, CoreResult, RequestData, RequestSample, RequesterConfigSnapshot,
};
use perflab_runtime::{Collect, RunContext, StartRequest};

use crate::config::RequesterConfig;
use crate::stats::{build_request_data, WorkerBuffers, WorkerTiming};
use crate::transport;

/// Number of scheduler/sender worker pairs the load is sharded across.
pub const WORKER_COUNT: usize = 16;

/// Capacity of the bounded per-worker tick queue. The scheduler keeps
/// wall-clock cadence while the sender absorbs bursts behind this buffer.
pub const QUEUE_CAPACITY: usize = 10_000;

/// Total retained request samples, split evenly across workers.
pub const MAX_SAMPLES: usize = 8_000;

/// Per-run parameters resolved from the start request.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub target_ip: String,
    pub target_port: u16,
    pub qps: u32,
    pub pattern: ArrivalPattern,
}

/// Sharded, rate-limited HTTP load engine.
pub struct LoadGenerator {
    config: RequesterConfig,
    client: reqwest::Client,
}

impl LoadGenerator {
    #[must_use]
    pub fn new(config: RequesterConfig) -> Self {
        let client = transport::build_client(config.connection_mode);
        Self { config, client }
    }
}

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    success: AtomicU64,
    fail: AtomicU64,
}

#[async_trait]
impl Collect for LoadGenerator {
    type Payload = RequestData;
    type Params = RequestParams;

    fn make_params(&self, request: &StartRequest) -> CoreResult<RequestParams> {
        let qps = request.qps.unwrap_or(self.config.default_qps);
        if qps == 0 {
            return Err(CoreError::validation("qps must be > 0"));
        }
        Ok(RequestParams {
            target_ip: self.config.target_ip.clone(),
            target_port: self.config.target_port,
            qps,
            pattern: self.config.arrival_pattern,
        })
    }

    async fn collect(&self, ctx: RunContext, params: RequestParams) -> CoreResult<RequestData> {
        let url = format!(
            "http://{}:{}/calculate",
            params.target_ip, params.target_port
        );
        info!(qps = params.qps, pattern = ?params.pattern, %url, "load generation starting");

        let counters = Arc::new(Counters::default());
        let sample_cap = MAX_SAMPLES / WORKER_COUNT;

        let mut scheduler_handles = Vec::with_capacity(WORKER_COUNT);
        let mut sender_handles = Vec::with_capacity(WORKER_COUNT);
        for worker in 0..WORKER_COUNT {
            let (tx, rx) = mpsc::channel::<()>(QUEUE_CAPACITY);

            scheduler_handles.push(tokio::spawn(run_scheduler(
                ctx.clone(),
                worker,
                params.qps,
                params.pattern,
                tx,
            )));
            sender_handles.push(tokio::spawn(run_sender(
                ctx.clone(),
                self.client.clone(),
                url.clone(),
                rx,
                Arc::clone(&counters),
                sample_cap,
            )));
        }

        let timings: Vec<WorkerTiming> = join_all(scheduler_handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_default())
            .collect();
        let buffers: Vec<WorkerBuffers> = join_all(sender_handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap_or_default())
            .collect();

        let total = counters.total.load(Ordering::Relaxed);
        let success = counters.success.load(Ordering::Relaxed);
        let fail = counters.fail.load(Ordering::Relaxed);
        info!(total, success, fail, "load generation finished");

        let snapshot = RequesterConfigSnapshot {
            target_ip: params.target_ip,
            target_port: params.target_port,
            qps: params.qps,
            arrival_pattern: params.pattern,
            connection_mode: self.config.connection_mode,
        };
        Ok(build_request_data(
            snapshot, &timings, buffers, total, success, fail,
        ))
    }
}

/// Inter-arrival period of the uniform process for one worker.
///
/// The numerator is computed first so integer division cannot round the
/// whole-second term away; the result is clamped to 1µs.
#[must_use]
pub fn uniform_period(qps: u32) -> Duration {
    let micros = (1_000_000u64 * WORKER_COUNT as u64) / u64::from(qps);
    Duration::from_micros(micros.max(1))
}

/// One exponential inter-arrival sample via inverse-transform sampling,
/// guarding against `U = 0`.
pub fn sample_exp_delta<R: Rng>(rng: &mut R, lambda: f64) -> f64 {
    let mut u: f64 = rng.gen();
    while u <= 0.0 {
        u = rng.gen();
    }
    -u.ln() / lambda
}

fn worker_seed(worker: usize) -> u64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    nanos ^ worker as u64
}

async fn run_scheduler(
    ctx: RunContext,
    worker: usize,
    qps: u32,
    pattern: ArrivalPattern,
    tx: mpsc::Sender<()>,
) -> WorkerTiming {
    match pattern {
        ArrivalPattern::Uniform => run_uniform_scheduler(ctx, qps, tx).await,
        ArrivalPattern::Poisson => run_poisson_scheduler(ctx, worker, qps, tx).await,
    }
}

async fn run_uniform_scheduler(ctx: RunContext, qps: u32, tx: mpsc::Sender<()>) -> WorkerTiming {
    let mut ticker = tokio::time::interval(uniform_period(qps));
    let mut timing = WorkerTiming::default();
    loop {
        tokio::select! {
            () = ctx.cancelled() => break,
            _ = ticker.tick() => {
                if !enqueue(&tx, &mut timing) {
                    break;
                }
            }
        }
    }
    timing
}

/// Poisson arrivals with plan-relative scheduling: the next event time
/// advances from the planned time, not the actual wake-up, so a late
/// wake never causes a burst of catch-up arrivals.
async fn run_poisson_scheduler(
    ctx: RunContext,
    worker: usize,
    qps: u32,
    tx: mpsc::Sender<()>,
) -> WorkerTiming {
    let lambda = f64::from(qps) / WORKER_COUNT as f64;
    let mut rng = StdRng::seed_from_u64(worker_seed(worker));
    let mut planned = Instant::now();
    let mut timing = WorkerTiming::default();
    loop {
        planned += Duration::from_secs_f64(sample_exp_delta(&mut rng, lambda));
        tokio::select! {
            () = ctx.cancelled() => break,
            () = tokio::time::sleep_until(planned) => {
                if !enqueue(&tx, &mut timing) {
                    break;
                }
            }
        }
    }
    timing
}

/// Non-blocking enqueue; a full queue drops the tick so the scheduler
/// never stalls behind a saturated sender. Returns `false` once the
/// sender is gone.
fn enqueue(tx: &mpsc::Sender<()>, timing: &mut WorkerTiming) -> bool {
    match tx.try_send(()) {
        Ok(()) => {
            timing.record(Instant::now());
            true
        }
        Err(mpsc::error::TrySendError::Full(())) => {
            debug!("worker queue full, dropping tick");
            true
        }
        Err(mpsc::error::TrySendError::Closed(())) => false,
    }
}

async fn run_sender(
    ctx: RunContext,
    client: reqwest::Client,
    url: String,
    mut rx: mpsc::Receiver<()>,
    counters: Arc<Counters>,
    sample_cap: usize,
) -> WorkerBuffers {
    let mut buffers = WorkerBuffers {
        latencies: Vec::with_capacity(1024),
        samples: Vec::with_capacity(sample_cap),
    };
    loop {
        tokio::select! {
            () = ctx.cancelled() => break,
            received = rx.recv() => {
                if received.is_none() || ctx.is_cancelled() {
                    break;
                }
                let started = Instant::now();
                let outcome = send_calculate(&client, &url).await;
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

                counters.total.fetch_add(1, Ordering::Relaxed);
                let success = match outcome {
                    Ok(ok) => {
                        if ok {
                            counters.success.fetch_add(1, Ordering::Relaxed);
                            buffers.latencies.push(latency_ms);
                        } else {
                            counters.fail.fetch_add(1, Ordering::Relaxed);
                        }
                        ok
                    }
                    Err(err) => {
                        counters.fail.fetch_add(1, Ordering::Relaxed);
                        warn!(error = %err, "request failed");
                        false
                    }
                };
                if buffers.samples.len() < sample_cap {
                    buffers.samples.push(RequestSample {
                        timestamp: Utc::now(),
                        latency_ms,
                        success,
                    });
                }
            }
        }
    }
    buffers
}

/// Sends one calculate request and drains the response body chunk-wise
/// so the pooled connection can be reused instead of retired.
async fn send_calculate(client: &reqwest::Client, url: &str) -> Result<bool, reqwest::Error> {
    let mut response = client.post(url).json(&serde_json::json!({})).send().await?;
    let status = response.status();
    while let Some(_chunk) = response.chunk().await? {}
    Ok(status.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio_util::sync::CancellationToken;

    #[test]
    fn uniform_period_computes_numerator_first() {
        // 16 workers at 16 QPS total: one request per worker per second.
        assert_eq!(uniform_period(16), Duration::from_secs(1));
        assert_eq!(uniform_period(64), Duration::from_micros(250_000));
        // Dividing before multiplying (1s/qps * W) would lose 4µs here.
        assert_eq!(uniform_period(32_000), Duration::from_micros(500));
    }

    #[test]
    fn uniform_period_clamps_to_a_microsecond() {
        assert_eq!(uniform_period(u32::MAX), Duration::from_micros(1));
    }

    #[test]
    fn poisson_mean_matches_rate() {
        let lambda = 100.0;
        let mut rng = StdRng::seed_from_u64(7);
        let n = 20_000;
        let sum: f64 = (0..n).map(|_| sample_exp_delta(&mut rng, lambda)).sum();
        let mean = sum / f64::from(n);
        let expected = 1.0 / lambda;
        assert!(
            (mean - expected).abs() / expected < 0.05,
            "empirical mean {mean} deviates from {expected}"
        );
    }

    #[test]
    fn exp_delta_is_always_positive_and_finite() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..10_000 {
            let delta = sample_exp_delta(&mut rng, 4.0);
            assert!(delta.is_finite() && delta >= 0.0);
        }
    }

    async fn spawn_calculator_stub() -> u16 {
        let app = Router::new().route(
            "/calculate",
            post(|| async { Json(serde_json::json!({"gcd": 6, "process_time": 0.8})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        port
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn generates_load_against_stub_target() {
        let port = spawn_calculator_stub().await;
        let generator = LoadGenerator::new(RequesterConfig::default());
        let params = RequestParams {
            target_ip: "127.0.0.1".to_string(),
            target_port: port,
            qps: 200,
            pattern: ArrivalPattern::Uniform,
        };

        let token = CancellationToken::new();
        let deadline = Instant::now() + Duration::from_secs(60);
        let ctx = RunContext::new(token.clone(), deadline);

        let handle = tokio::spawn(async move { generator.collect(ctx, params).await });
        tokio::time::sleep(Duration::from_millis(1100)).await;
        token.cancel();
        let data = handle.await.unwrap().unwrap();

        assert!(data.total_requests > 0, "no requests issued");
        assert_eq!(
            data.total_requests,
            data.success_count + data.failure_count
        );
        assert_eq!(data.failure_count, 0);
        assert!(data.stats.actual_qps > 0.0);
        assert!(data.stats.max_latency_ms >= data.stats.min_latency_ms);
        assert!(!data.samples.is_empty());
        assert!(data.samples.len() <= MAX_SAMPLES);
        let bucket_sum: u64 = data.stats.latency_buckets.iter().map(|b| b.count).sum();
        assert_eq!(bucket_sum, data.success_count);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn poisson_run_issues_requests_at_roughly_the_target_rate() {
        let port = spawn_calculator_stub().await;
        let generator = LoadGenerator::new(RequesterConfig::default());
        let params = RequestParams {
            target_ip: "127.0.0.1".to_string(),
            target_port: port,
            qps: 160,
            pattern: ArrivalPattern::Poisson,
        };

        let token = CancellationToken::new();
        let ctx = RunContext::new(token.clone(), Instant::now() + Duration::from_secs(60));
        let handle = tokio::spawn(async move { generator.collect(ctx, params).await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        token.cancel();
        let data = handle.await.unwrap().unwrap();

        // Generous band: scheduling jitter dominates short windows.
        assert!(
            data.total_requests > 100 && data.total_requests < 640,
            "observed {} requests for a 2s window at 160 QPS",
            data.total_requests
        );
    }

    #[tokio::test]
    async fn unreachable_target_counts_failures() {
        let generator = LoadGenerator::new(RequesterConfig::default());
        let params = RequestParams {
            // Nothing listens on port 1, so connections are refused fast.
            target_ip: "127.0.0.1".to_string(),
            target_port: 1,
            qps: 64,
            pattern: ArrivalPattern::Uniform,
        };

        let token = CancellationToken::new();
        let ctx = RunContext::new(token.clone(), Instant::now() + Duration::from_secs(60));
        let handle = tokio::spawn(async move { generator.collect(ctx, params).await });
        tokio::time::sleep(Duration::from_millis(700)).await;
        token.cancel();
        let data = handle.await.unwrap().unwrap();

        assert!(data.failure_count > 0);
        assert_eq!(data.success_count, 0);
        assert!((data.stats.error_rate_percent - 100.0).abs() < f64::EPSILON);
        assert!(data.stats.latency_buckets.is_empty());
    }
}
