//! Worker loop: window adaptation, drain, dispatch (spec.md §4.5).

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use engine_backend::{BatchItem, GpuBackend};
use engine_common::{Clock, DispatchError, RequestError};

use crate::batch::{Batch, BatchBuilder, GpuState};
use crate::entropy::ArrivalEntropyMeter;
use crate::metrics::EngineMetrics;
use crate::queue::{PriorityQueue, RequestOutcome};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub w_base: Duration,
    pub tau: f64,
    pub max_batch: usize,
    pub kv_max: u64,
}

/// `w_adaptive = W_BASE * exp(-H / tau)`, clamped to `[1ms, W_BASE]`
/// (spec.md §4.5 step 2). Monotonically non-increasing in `H`.
pub fn adaptive_window(w_base: Duration, tau: f64, entropy: f64) -> Duration {
    let w_base_s = w_base.as_secs_f64();
    let w = w_base_s * (-entropy / tau).exp();
    Duration::from_secs_f64(w.clamp(0.001, w_base_s))
}

enum DispatchOutcome {
    Completed,
    Fatal(RequestError),
}

pub struct HomeostaticScheduler;

impl HomeostaticScheduler {
    pub fn spawn(
        queue: Arc<PriorityQueue>,
        entropy: Arc<ArrivalEntropyMeter>,
        backend: Arc<dyn GpuBackend>,
        metrics: Arc<EngineMetrics>,
        clock: Arc<dyn Clock>,
        config: SchedulerConfig,
        shutdown: Arc<Notify>,
        grace: Option<Duration>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut gpu_state = GpuState::new();
            loop {
                let h = entropy.entropy();
                let window = adaptive_window(config.w_base, config.tau, h);
                metrics.set_window_ms(window.as_secs_f64() * 1000.0);

                tokio::select! {
                    _ = tokio::time::sleep(window) => {}
                    _ = shutdown.notified() => {
                        Self::drain(&queue, &backend, &metrics, &clock, &config, &mut gpu_state, grace).await;
                        return;
                    }
                }

                if queue.is_empty() {
                    continue;
                }

                let now = clock.now();
                let batch = BatchBuilder::build(&queue, &gpu_state, now, config.max_batch, config.kv_max);
                if batch.is_empty() {
                    continue;
                }

                if let DispatchOutcome::Fatal(err) =
                    Self::dispatch(batch, &backend, &metrics, now, &mut gpu_state, config.kv_max).await
                {
                    Self::drain_with_error(&queue, &clock, err);
                    return;
                }
            }
        })
    }

    /// Dispatches one batch, resolving every request's completion
    /// handle. A batch resolves atomically: on backend failure every
    /// request in it gets the same error (spec.md §7).
    async fn dispatch(
        batch: Batch,
        backend: &Arc<dyn GpuBackend>,
        metrics: &Arc<EngineMetrics>,
        now: Instant,
        gpu_state: &mut GpuState,
        kv_max: u64,
    ) -> DispatchOutcome {
        let items: Vec<BatchItem> = batch
            .requests
            .iter()
            .map(|r| BatchItem {
                request_id: r.request_id,
                tokens_requested: r.tokens_requested,
            })
            .collect();
        let total_tokens = batch.total_tokens();

        gpu_state.kv_used_tokens += total_tokens;
        let result = backend.run(&items, kv_max);
        gpu_state.kv_used_tokens = gpu_state.kv_used_tokens.saturating_sub(total_tokens);

        match result {
            Ok(batch_result) => {
                gpu_state.busy_until =
                    Some(now + Duration::from_secs_f64(batch_result.wall_time_s));
                let batch_size = batch_result.batch_size;
                let mut tenant_tokens = Vec::with_capacity(batch.requests.len());
                for (request, outcome) in
                    batch.requests.into_iter().zip(batch_result.outcomes.iter())
                {
                    let queue_wait_s = now
                        .saturating_duration_since(request.arrival_time)
                        .as_secs_f64();
                    let resolved = RequestOutcome {
                        tokens_produced: outcome.tokens_produced,
                        latency_s: batch_result.wall_time_s,
                        batch_size,
                        queue_wait_s,
                    };
                    tenant_tokens.push((request.tenant_id.clone(), outcome.tokens_produced));
                    let _ = request.completion.send(Ok(resolved));
                }
                metrics.record_batch(batch_result.wall_time_s, &tenant_tokens);
                DispatchOutcome::Completed
            }
            Err(RequestError::Internal(internal)) => {
                tracing::error!(error = %internal, "internal invariant violated, terminating worker");
                let err = RequestError::Internal(internal);
                for request in batch.requests {
                    let _ = request.completion.send(Err(err.clone()));
                }
                DispatchOutcome::Fatal(err)
            }
            Err(err @ RequestError::Dispatch(_)) => {
                tracing::warn!(error = %err, "batch dispatch failed");
                let tenant_ids: Vec<String> =
                    batch.requests.iter().map(|r| r.tenant_id.clone()).collect();
                metrics.record_dispatch_failure(&tenant_ids);
                for request in batch.requests {
                    let _ = request.completion.send(Err(err.clone()));
                }
                DispatchOutcome::Completed
            }
        }
    }

    /// Drains the queue on shutdown: keeps dispatching batches (no
    /// adaptive sleep) until the queue empties or an optional grace
    /// deadline passes, then resolves anything left with `SHUTDOWN`.
    async fn drain(
        queue: &Arc<PriorityQueue>,
        backend: &Arc<dyn GpuBackend>,
        metrics: &Arc<EngineMetrics>,
        clock: &Arc<dyn Clock>,
        config: &SchedulerConfig,
        gpu_state: &mut GpuState,
        grace: Option<Duration>,
    ) {
        let deadline = grace.map(|g| clock.now() + g);
        loop {
            if queue.is_empty() {
                break;
            }
            if let Some(dl) = deadline {
                if clock.now() >= dl {
                    break;
                }
            }
            let now = clock.now();
            let batch = BatchBuilder::build(queue, gpu_state, now, config.max_batch, config.kv_max);
            if batch.is_empty() {
                break;
            }
            if let DispatchOutcome::Fatal(_) =
                Self::dispatch(batch, backend, metrics, now, gpu_state, config.kv_max).await
            {
                break;
            }
        }
        Self::drain_with_error(queue, clock, RequestError::Dispatch(DispatchError::Shutdown));
    }

    fn drain_with_error(queue: &Arc<PriorityQueue>, clock: &Arc<dyn Clock>, err: RequestError) {
        while let Some(request) = queue.pop(clock.now()) {
            let _ = request.completion.send(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_entropy_shrinks_window() {
        let w_base = Duration::from_millis(10);
        let h = 50f64.log2(); // ~5.64, matches S5's near-uniform-entropy case
        let w = adaptive_window(w_base, 5.0, h);
        assert!((w.as_secs_f64() * 1000.0 - 3.25).abs() < 0.1);
    }

    #[test]
    fn window_shaping_is_monotonic_and_bounded() {
        let w_base = Duration::from_millis(10);
        let w_zero = adaptive_window(w_base, 5.0, 0.0);
        assert_eq!(w_zero, w_base);

        let mut last = w_base.as_secs_f64();
        for h in [0.0, 1.0, 2.0, 4.0, 8.0, 16.0] {
            let w = adaptive_window(w_base, 5.0, h).as_secs_f64();
            assert!(w <= last + 1e-12);
            assert!(w >= 0.001 - 1e-12);
            last = w;
        }
    }

    #[test]
    fn window_never_exceeds_w_base() {
        let w_base = Duration::from_millis(10);
        let w = adaptive_window(w_base, 5.0, 0.0);
        assert!(w <= w_base);
    }
}
