//! Per-tenant token-bucket admission control (spec.md §4.1).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::Serialize;

use engine_common::Clock;

/// One tenant's rate-limit state. Invariant: after any `admit` call,
/// `0 <= tokens <= burst_cap`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TenantBucket {
    pub rate: f64,
    pub burst_cap: f64,
    pub tokens: f64,
    pub last_update: Instant,
}

impl TenantBucket {
    pub fn new(rate: f64, burst_cap: f64, now: Instant) -> Self {
        Self {
            rate,
            burst_cap,
            tokens: burst_cap,
            last_update: now,
        }
    }

    /// Refills, then admits or rejects wholesale — partial consumption
    /// is forbidden (spec.md §4.1 rationale).
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate).min(self.burst_cap);
        self.last_update = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitOutcome {
    Admitted,
    RejectedUnknownTenant,
    RejectedRateLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TenantSnapshot {
    pub tokens: f64,
    pub rate: f64,
    pub burst_cap: f64,
}

pub struct TenantRegistry {
    buckets: RwLock<HashMap<String, std::sync::Mutex<TenantBucket>>>,
    clock: Arc<dyn Clock>,
}

impl TenantRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            clock,
        }
    }

    pub fn register_tenant(&self, tenant_id: &str, rate: f64, burst_cap: f64) {
        let bucket = TenantBucket::new(rate, burst_cap, self.clock.now());
        self.buckets
            .write()
            .unwrap()
            .insert(tenant_id.to_string(), std::sync::Mutex::new(bucket));
    }

    /// Runs the refill algorithm of spec.md §4.1 steps 1-5.
    pub fn admit(&self, tenant_id: &str, tokens_requested: f64, now: Instant) -> AdmitOutcome {
        let buckets = self.buckets.read().unwrap();
        let Some(slot) = buckets.get(tenant_id) else {
            return AdmitOutcome::RejectedUnknownTenant;
        };
        let mut bucket = slot.lock().unwrap();
        bucket.refill(now);
        if bucket.tokens >= tokens_requested {
            bucket.tokens -= tokens_requested;
            AdmitOutcome::Admitted
        } else {
            AdmitOutcome::RejectedRateLimit
        }
    }

    pub fn snapshot(&self, tenant_id: &str) -> Option<TenantSnapshot> {
        let buckets = self.buckets.read().unwrap();
        let bucket = buckets.get(tenant_id)?.lock().unwrap();
        Some(TenantSnapshot {
            tokens: bucket.tokens,
            rate: bucket.rate,
            burst_cap: bucket.burst_cap,
        })
    }

    pub fn is_registered(&self, tenant_id: &str) -> bool {
        self.buckets.read().unwrap().contains_key(tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_common::FakeClock;
    use std::time::Duration;

    fn registry() -> (TenantRegistry, Arc<FakeClock>) {
        let clock = FakeClock::new();
        (TenantRegistry::new(clock.clone()), clock)
    }

    #[test]
    fn unknown_tenant_is_rejected() {
        let (reg, clock) = registry();
        assert_eq!(
            reg.admit("ghost", 1.0, clock.now()),
            AdmitOutcome::RejectedUnknownTenant
        );
    }

    #[test]
    fn s1_single_tenant_no_contention() {
        let (reg, clock) = registry();
        reg.register_tenant("A", 1000.0, 1000.0);
        let outcome = reg.admit("A", 100.0, clock.now());
        assert_eq!(outcome, AdmitOutcome::Admitted);
        let snap = reg.snapshot("A").unwrap();
        assert!((snap.tokens - 900.0).abs() < 1e-9);
    }

    #[test]
    fn s2_rate_limit_sequence() {
        let (reg, clock) = registry();
        reg.register_tenant("B", 10.0, 10.0);
        let outcomes: Vec<_> = (0..3)
            .map(|_| reg.admit("B", 5.0, clock.now()))
            .collect();
        assert_eq!(
            outcomes,
            vec![
                AdmitOutcome::Admitted,
                AdmitOutcome::Admitted,
                AdmitOutcome::RejectedRateLimit,
            ]
        );
    }

    #[test]
    fn refill_restores_capacity_over_time() {
        let (reg, clock) = registry();
        reg.register_tenant("C", 10.0, 10.0);
        assert_eq!(reg.admit("C", 10.0, clock.now()), AdmitOutcome::Admitted);
        assert_eq!(
            reg.admit("C", 1.0, clock.now()),
            AdmitOutcome::RejectedRateLimit
        );
        clock.advance(Duration::from_secs(1));
        assert_eq!(reg.admit("C", 10.0, clock.now()), AdmitOutcome::Admitted);
    }

    #[test]
    fn bucket_never_exceeds_burst_cap_or_goes_negative() {
        let (reg, clock) = registry();
        reg.register_tenant("D", 5.0, 20.0);
        for _ in 0..50 {
            clock.advance(Duration::from_millis(500));
            reg.admit("D", 3.0, clock.now());
            let snap = reg.snapshot("D").unwrap();
            assert!(snap.tokens >= 0.0 && snap.tokens <= snap.burst_cap);
        }
    }
}
