//! Property tests for the invariants listed in spec.md §8.

use std::time::{Duration, Instant};

use proptest::prelude::*;
use tokio::sync::oneshot;

use engine_core::batch::{BatchBuilder, GpuState};
use engine_core::entropy::ArrivalEntropyMeter;
use engine_core::queue::{CompletionResult, PriorityQueue, Request};
use engine_core::tenant::{AdmitOutcome, TenantRegistry};

use engine_common::FakeClock;

fn make_request(id: u64, tokens: u64, priority_bid: i32, arrival_time: Instant) -> Request {
    let (tx, _rx) = oneshot::channel::<CompletionResult>();
    Request {
        request_id: id,
        tenant_id: "t".into(),
        tokens_requested: tokens,
        priority_bid,
        arrival_time,
        completion: tx,
    }
}

proptest! {
    /// Property 1: bucket safety — after any sequence of admits,
    /// 0 <= tokens <= burst_cap.
    #[test]
    fn bucket_safety(
        rate in 1.0f64..1000.0,
        burst_cap in 1.0f64..1000.0,
        requests in prop::collection::vec(0.0f64..200.0, 1..50),
        advance_ms in prop::collection::vec(0u64..2000, 1..50),
    ) {
        let clock = FakeClock::new();
        let registry = TenantRegistry::new(clock.clone());
        registry.register_tenant("T", rate, burst_cap);

        for (tokens, ms) in requests.iter().zip(advance_ms.iter()) {
            clock.advance(Duration::from_millis(*ms));
            registry.admit("T", *tokens, clock.now());
            let snap = registry.snapshot("T").unwrap();
            prop_assert!(snap.tokens >= 0.0);
            prop_assert!(snap.tokens <= snap.burst_cap + 1e-9);
        }
    }

    /// Property 2: admission conservation — over a run, tokens admitted to
    /// a tenant never exceed burst_cap + rate * wall_time.
    #[test]
    fn admission_conservation(
        rate in 1.0f64..200.0,
        burst_cap in 1.0f64..200.0,
        requests in prop::collection::vec(0.0f64..50.0, 1..80),
        advance_ms in prop::collection::vec(0u64..500, 1..80),
    ) {
        let clock = FakeClock::new();
        let registry = TenantRegistry::new(clock.clone());
        registry.register_tenant("T", rate, burst_cap);
        let mut admitted_total = 0.0f64;
        let mut wall_time = 0.0f64;

        for (tokens, ms) in requests.iter().zip(advance_ms.iter()) {
            clock.advance(Duration::from_millis(*ms));
            wall_time += Duration::from_millis(*ms).as_secs_f64();
            if registry.admit("T", *tokens, clock.now()) == AdmitOutcome::Admitted {
                admitted_total += tokens;
            }
            prop_assert!(admitted_total <= burst_cap + rate * wall_time + 1e-6);
        }
    }

    /// Property 6: no starvation — a request waiting at least Δ/α behind a
    /// freshly-arriving, higher-bid competitor is selected ahead of it.
    #[test]
    fn no_starvation(
        bid_r in 1i32..10,
        gap in 1i32..10,
    ) {
        let alpha = 1.0;
        let bid_h = (bid_r + gap).min(10);
        let delta = (bid_h - bid_r) as f64;
        let queue = PriorityQueue::new(alpha, 16);
        let t0 = Instant::now();
        let deadline = t0 + Duration::from_secs_f64(delta / alpha);

        queue.push(make_request(1, 10, bid_r, t0), t0);
        queue.push(make_request(2, 10, bid_h, deadline), deadline);

        let now = deadline + Duration::from_millis(1);
        let popped = queue.pop(now).unwrap();
        prop_assert_eq!(popped.request_id, 1);
    }

    /// Property 3: entropy bounds — for k >= 2 deltas, 0 <= H <= log2(k).
    #[test]
    fn entropy_bounds(deltas_ms in prop::collection::vec(0u64..500, 2..60)) {
        let meter = ArrivalEntropyMeter::new(64);
        let mut t = Instant::now();
        for d in &deltas_ms {
            meter.record(t);
            t += Duration::from_millis(*d);
        }
        let h = meter.entropy();
        let k = meter.len() as f64;
        prop_assert!(h >= 0.0);
        prop_assert!(h <= k.log2() + 1e-9);
    }

    /// Property 5: batch budget — every dispatched batch respects both
    /// the KV-cache budget and the max batch size.
    #[test]
    fn batch_budget(
        counts in 1usize..40,
        tokens_each in 1u64..5000,
        kv_max in 1000u64..40_000,
        max_batch in 1usize..20,
    ) {
        let queue = PriorityQueue::new(1.0, max_batch.max(1) * 4);
        let t0 = Instant::now();
        for i in 0..counts {
            queue.push(make_request(i as u64, tokens_each, 5, t0), t0);
        }
        let gpu = GpuState::new();
        let batch = BatchBuilder::build(&queue, &gpu, t0, max_batch, kv_max);
        prop_assert!(batch.total_tokens() <= kv_max);
        prop_assert!(batch.len() <= max_batch);
    }

    /// Property 4: lazy monotonicity — pop always returns the entry with
    /// the smallest P_eff(now); ties broken by insertion order (seq).
    #[test]
    fn lazy_monotonicity(
        bids in prop::collection::vec(1i32..=10, 2..20),
        wait_ms in prop::collection::vec(0u64..30_000, 2..20),
    ) {
        let n = bids.len().min(wait_ms.len());
        let queue = PriorityQueue::new(1.0, n.max(1) * 4);
        let t0 = Instant::now();
        let mut arrivals = Vec::with_capacity(n);
        for i in 0..n {
            let arrival = t0 + Duration::from_millis(wait_ms[i]);
            arrivals.push((i as u64, bids[i], arrival));
        }
        for &(id, bid, arrival) in &arrivals {
            queue.push(make_request(id, 10, bid, arrival), arrival);
        }

        let now = t0 + Duration::from_secs(60);
        let expected_min = arrivals
            .iter()
            .map(|&(id, bid, arrival)| {
                let waited = now.saturating_duration_since(arrival).as_secs_f64();
                let p_eff = -(bid as f64 + 1.0 * waited);
                (p_eff, id)
            })
            .fold(None, |acc: Option<(f64, u64)>, (p_eff, id)| match acc {
                None => Some((p_eff, id)),
                Some((best_p, best_id)) => {
                    if p_eff < best_p || (p_eff == best_p && id < best_id) {
                        Some((p_eff, id))
                    } else {
                        Some((best_p, best_id))
                    }
                }
            })
            .unwrap();

        let popped = queue.pop(now).unwrap();
        prop_assert_eq!(popped.request_id, expected_min.1);
    }
}
