//! Admission and scheduling engine: ties `TenantRegistry`,
//! `ArrivalEntropyMeter`, `PriorityQueue`, and `HomeostaticScheduler`
//! into the single `Engine` facade external callers use.

pub mod batch;
pub mod entropy;
pub mod metrics;
pub mod queue;
pub mod scheduler;
pub mod tenant;

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use engine_backend::GpuBackend;
use engine_common::{AdmissionError, Clock, DispatchError, EngineConfig, RequestError, SystemClock};

use entropy::ArrivalEntropyMeter;
use metrics::{EngineMetrics, MetricsSnapshot};
use queue::{CompletionResult, PriorityQueue, Request};
use scheduler::{HomeostaticScheduler, SchedulerConfig};
use tenant::{AdmitOutcome, TenantRegistry, TenantSnapshot};

const MIN_PRIORITY: i32 = 1;
const MAX_PRIORITY: i32 = 10;

/// Wires together admission, queueing, and dispatch for one engine
/// instance (spec.md §2 "Data flow"). Share it behind an `Arc` across
/// callers; `submit`/`tenant_status`/`metrics_snapshot` only need `&self`.
pub struct Engine {
    tenants: Arc<TenantRegistry>,
    queue: Arc<PriorityQueue>,
    entropy: Arc<ArrivalEntropyMeter>,
    metrics: Arc<EngineMetrics>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    shutdown: Arc<Notify>,
    worker: JoinHandle<()>,
    start_instant: Instant,
}

impl Engine {
    /// Spawns the worker loop and returns a handle wired to the given
    /// backend and config, using the system clock.
    pub fn start(config: EngineConfig, backend: Arc<dyn GpuBackend>) -> Self {
        Self::start_with_clock(config, backend, SystemClock::new())
    }

    pub fn start_with_clock(
        config: EngineConfig,
        backend: Arc<dyn GpuBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tenants = Arc::new(TenantRegistry::new(clock.clone()));
        let queue = Arc::new(PriorityQueue::new(config.alpha, config.max_batch * 4));
        let entropy = Arc::new(ArrivalEntropyMeter::new(config.entropy_window));
        let metrics = Arc::new(EngineMetrics::new());
        let shutdown = Arc::new(Notify::new());
        let start_instant = clock.now();

        let scheduler_config = SchedulerConfig {
            w_base: std::time::Duration::from_millis(config.w_base_ms),
            tau: config.tau,
            max_batch: config.max_batch,
            kv_max: config.kv_max,
        };
        let worker = HomeostaticScheduler::spawn(
            queue.clone(),
            entropy.clone(),
            backend,
            metrics.clone(),
            clock.clone(),
            scheduler_config,
            shutdown.clone(),
            None,
        );

        Self {
            tenants,
            queue,
            entropy,
            metrics,
            clock,
            config,
            shutdown,
            worker,
            start_instant,
        }
    }

    pub fn register_tenant(&self, tenant_id: &str, rate: f64, burst_cap: f64) {
        self.tenants.register_tenant(tenant_id, rate, burst_cap);
    }

    /// Admits or rejects synchronously, then (on admission) pushes a
    /// `Request` and returns a future resolving to its outcome
    /// (spec.md §6 `submit`).
    pub fn submit(
        &self,
        tenant_id: &str,
        _prompt: &str,
        tokens_requested: i64,
        priority_bid: i32,
    ) -> Result<oneshot::Receiver<CompletionResult>, AdmissionError> {
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority_bid) {
            return Err(AdmissionError::InvalidPriority(priority_bid));
        }
        if tokens_requested <= 0 || tokens_requested as u64 > self.config.kv_max {
            return Err(AdmissionError::InvalidTokens(tokens_requested));
        }

        let now = self.clock.now();
        match self.tenants.admit(tenant_id, tokens_requested as f64, now) {
            AdmitOutcome::RejectedUnknownTenant => {
                return Err(AdmissionError::UnknownTenant(tenant_id.to_string()))
            }
            AdmitOutcome::RejectedRateLimit => return Err(AdmissionError::RateLimited),
            AdmitOutcome::Admitted => {}
        }

        self.entropy.record(now);
        let (tx, rx) = oneshot::channel();
        let request = Request {
            request_id: next_request_id(),
            tenant_id: tenant_id.to_string(),
            tokens_requested: tokens_requested as u64,
            priority_bid,
            arrival_time: now,
            completion: tx,
        };
        self.queue.push(request, now);
        Ok(rx)
    }

    pub fn tenant_status(&self, tenant_id: &str) -> Result<TenantSnapshot, AdmissionError> {
        self.tenants
            .snapshot(tenant_id)
            .ok_or_else(|| AdmissionError::UnknownTenant(tenant_id.to_string()))
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        let wall_time_s = self
            .clock
            .now()
            .saturating_duration_since(self.start_instant)
            .as_secs_f64()
            .max(1e-9);
        let throughput = metrics::throughput_tps(self.metrics.total_tokens_produced(), wall_time_s);
        MetricsSnapshot {
            throughput_tps: throughput,
            gpu_utilization: metrics::gpu_utilization(self.metrics.gpu_busy_time_s(), wall_time_s),
            cost_per_mtoken: metrics::cost_per_mtoken(throughput),
            jain_fairness: self.metrics.jain_fairness(),
            current_entropy: self.entropy.entropy(),
            current_window_ms: self.metrics.current_window_ms(),
            queue_depth: self.queue.len(),
        }
    }

    /// Signals shutdown and waits for the worker to drain the queue
    /// (spec.md §5 "Cancellation and timeouts").
    pub async fn shutdown(self) -> Result<(), RequestError> {
        self.shutdown.notify_one();
        self.worker
            .await
            .map_err(|_| RequestError::Dispatch(DispatchError::Shutdown))
    }
}

fn next_request_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_backend::sim::SimulatedBackend;
    use engine_common::FakeClock;
    use std::time::Duration;

    fn test_engine() -> Engine {
        let clock = FakeClock::new();
        let backend = Arc::new(SimulatedBackend::default());
        Engine::start_with_clock(EngineConfig::default(), backend, clock)
    }

    #[test]
    fn unregistered_tenant_is_rejected_synchronously() {
        let engine = test_engine();
        let err = engine.submit("ghost", "hi", 10, 5).unwrap_err();
        assert_eq!(err, AdmissionError::UnknownTenant("ghost".into()));
    }

    #[test]
    fn out_of_range_priority_is_rejected() {
        let engine = test_engine();
        engine.register_tenant("A", 1000.0, 1000.0);
        let err = engine.submit("A", "hi", 10, 11).unwrap_err();
        assert_eq!(err, AdmissionError::InvalidPriority(11));
    }

    #[test]
    fn non_positive_tokens_are_rejected() {
        let engine = test_engine();
        engine.register_tenant("A", 1000.0, 1000.0);
        let err = engine.submit("A", "hi", 0, 5).unwrap_err();
        assert_eq!(err, AdmissionError::InvalidTokens(0));
    }

    #[tokio::test]
    async fn s1_single_tenant_request_completes() {
        let engine = test_engine();
        engine.register_tenant("A", 1000.0, 1000.0);
        let rx = engine.submit("A", "hi", 100, 5).unwrap();
        let outcome = tokio::time::timeout(Duration::from_millis(500), rx)
            .await
            .expect("request did not complete in time")
            .unwrap()
            .unwrap();
        assert_eq!(outcome.tokens_produced, 100);
        assert_eq!(outcome.batch_size, 1);
    }
}
