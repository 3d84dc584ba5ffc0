//! Rolling Shannon entropy of inter-arrival intervals (spec.md §4.2).

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;

/// Bounded ring of the last `capacity` inter-arrival intervals, in
/// whole milliseconds (spec.md §9: "1ms granularity is a contract;
/// implementations must not use floating-point bins").
struct EntropyWindow {
    deltas_ms: VecDeque<u64>,
    capacity: usize,
    last_arrival_time: Option<Instant>,
}

impl EntropyWindow {
    fn new(capacity: usize) -> Self {
        Self {
            deltas_ms: VecDeque::with_capacity(capacity),
            capacity,
            last_arrival_time: None,
        }
    }

    fn record(&mut self, now: Instant) {
        if let Some(last) = self.last_arrival_time {
            let delta_seconds = now.saturating_duration_since(last).as_secs_f64();
            let bin = (delta_seconds * 1000.0).floor() as u64;
            if self.deltas_ms.len() == self.capacity {
                self.deltas_ms.pop_front();
            }
            self.deltas_ms.push_back(bin);
        }
        self.last_arrival_time = Some(now);
    }

    fn entropy(&self) -> f64 {
        let n = self.deltas_ms.len();
        if n < 2 {
            return 0.0;
        }
        let mut counts: HashMap<u64, usize> = HashMap::new();
        for &bin in &self.deltas_ms {
            *counts.entry(bin).or_insert(0) += 1;
        }
        let n_f = n as f64;
        -counts
            .values()
            .map(|&c| {
                let p = c as f64 / n_f;
                p * p.log2()
            })
            .sum::<f64>()
    }

    fn len(&self) -> usize {
        self.deltas_ms.len()
    }
}

/// Thread-safe wrapper: written from ingress, read from the worker
/// (spec.md §5: "EntropyMeter: single mutex").
pub struct ArrivalEntropyMeter {
    window: Mutex<EntropyWindow>,
}

impl ArrivalEntropyMeter {
    pub fn new(window_size: usize) -> Self {
        Self {
            window: Mutex::new(EntropyWindow::new(window_size)),
        }
    }

    pub fn record(&self, now: Instant) {
        self.window.lock().unwrap().record(now);
    }

    pub fn entropy(&self) -> f64 {
        self.window.lock().unwrap().entropy()
    }

    pub fn len(&self) -> usize {
        self.window.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fewer_than_two_deltas_is_zero_entropy() {
        let meter = ArrivalEntropyMeter::new(50);
        let t0 = Instant::now();
        meter.record(t0);
        assert_eq!(meter.entropy(), 0.0);
    }

    #[test]
    fn perfectly_periodic_arrivals_give_zero_entropy() {
        let meter = ArrivalEntropyMeter::new(50);
        let mut t = Instant::now();
        for _ in 0..20 {
            meter.record(t);
            t += Duration::from_millis(10);
        }
        assert_eq!(meter.entropy(), 0.0);
    }

    #[test]
    fn entropy_is_bounded_by_log2_of_sample_count() {
        let meter = ArrivalEntropyMeter::new(50);
        let mut t = Instant::now();
        // distinct, monotonically growing deltas -> each bin unique
        for i in 0..50u64 {
            meter.record(t);
            t += Duration::from_millis(1 + i);
        }
        let h = meter.entropy();
        let k = meter.len() as f64;
        assert!(h >= 0.0);
        assert!(h <= k.log2() + 1e-9);
    }

    #[test]
    fn window_evicts_oldest_beyond_capacity() {
        let meter = ArrivalEntropyMeter::new(5);
        let mut t = Instant::now();
        for _ in 0..10 {
            meter.record(t);
            t += Duration::from_millis(1);
        }
        assert_eq!(meter.len(), 5);
    }
}
