//! Derived metric formulas (spec.md §6) and the shared counters the
//! scheduler updates on every batch completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub throughput_tps: f64,
    pub gpu_utilization: f64,
    pub cost_per_mtoken: f64,
    pub jain_fairness: f64,
    pub current_entropy: f64,
    pub current_window_ms: f64,
    pub queue_depth: usize,
}

pub fn throughput_tps(total_tokens_produced: u64, wall_time_s: f64) -> f64 {
    if wall_time_s <= 0.0 {
        0.0
    } else {
        total_tokens_produced as f64 / wall_time_s
    }
}

pub fn gpu_utilization(gpu_busy_time_s: f64, wall_time_s: f64) -> f64 {
    if wall_time_s <= 0.0 {
        0.0
    } else {
        gpu_busy_time_s / wall_time_s
    }
}

pub fn cost_per_mtoken(throughput_tps: f64) -> f64 {
    if throughput_tps <= 0.0 {
        0.0
    } else {
        (3.00 / 3600.0) / throughput_tps * 1_000_000.0
    }
}

/// `(sum xi)^2 / (N * sum xi^2)`, range (0, 1]. Defined as 1.0 when
/// there is no recorded usage yet (vacuously fair).
pub fn jain_fairness(per_tenant_tokens: &[u64]) -> f64 {
    let n = per_tenant_tokens.len();
    if n == 0 {
        return 1.0;
    }
    let sum: f64 = per_tenant_tokens.iter().map(|&x| x as f64).sum();
    let sum_sq: f64 = per_tenant_tokens.iter().map(|&x| (x as f64).powi(2)).sum();
    if sum_sq == 0.0 {
        return 1.0;
    }
    (sum * sum) / (n as f64 * sum_sq)
}

/// Running counters the worker updates after every batch dispatch.
/// `gpu_utilization`'s denominator is "since process start" (spec.md
/// §9 Open Question, resolved in favor of that reading).
#[derive(Default)]
pub struct EngineMetrics {
    total_tokens_produced: AtomicU64,
    gpu_busy_time_micros: AtomicU64,
    per_tenant_tokens: Mutex<HashMap<String, u64>>,
    per_tenant_dispatch_failures: Mutex<HashMap<String, u64>>,
    current_window_micros: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_window_ms(&self, ms: f64) {
        let micros = (ms * 1000.0).round().max(0.0) as u64;
        self.current_window_micros.store(micros, Ordering::Relaxed);
    }

    pub fn current_window_ms(&self) -> f64 {
        self.current_window_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn record_batch(&self, wall_time_s: f64, tenant_tokens: &[(String, u64)]) {
        let micros = (wall_time_s * 1_000_000.0).round().max(0.0) as u64;
        self.gpu_busy_time_micros.fetch_add(micros, Ordering::Relaxed);
        let mut total = 0u64;
        let mut per_tenant = self.per_tenant_tokens.lock().unwrap();
        for (tenant, tokens) in tenant_tokens {
            total += tokens;
            *per_tenant.entry(tenant.clone()).or_insert(0) += tokens;
        }
        self.total_tokens_produced.fetch_add(total, Ordering::Relaxed);
    }

    pub fn total_tokens_produced(&self) -> u64 {
        self.total_tokens_produced.load(Ordering::Relaxed)
    }

    pub fn gpu_busy_time_s(&self) -> f64 {
        self.gpu_busy_time_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0
    }

    pub fn jain_fairness(&self) -> f64 {
        let per_tenant = self.per_tenant_tokens.lock().unwrap();
        let values: Vec<u64> = per_tenant.values().copied().collect();
        jain_fairness(&values)
    }

    /// Records a dispatch failure against every tenant in the failed
    /// batch (spec.md §7: "recorded in metrics, failure count per tenant").
    pub fn record_dispatch_failure(&self, tenant_ids: &[String]) {
        let mut failures = self.per_tenant_dispatch_failures.lock().unwrap();
        for tenant in tenant_ids {
            *failures.entry(tenant.clone()).or_insert(0) += 1;
        }
    }

    pub fn dispatch_failures(&self, tenant_id: &str) -> u64 {
        self.per_tenant_dispatch_failures
            .lock()
            .unwrap()
            .get(tenant_id)
            .copied()
            .unwrap_or(0)
    }
}
