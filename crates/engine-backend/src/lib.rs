//! The modeled GPU dispatch contract (spec.md §4.6).
//!
//! `GpuBackend` is deliberately narrow: given a batch of
//! `(request_id, tokens_requested)` pairs it returns per-item timing
//! and token counts. KV-cache accounting and `busy_until` bookkeeping
//! belong to the scheduler (spec.md §5: "GPUState: owned by the
//! worker; no external mutation") — the backend itself is stateless
//! across calls, which is what lets a real backend satisfy the same
//! contract as the simulator.

use engine_common::{InternalError, RequestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchItem {
    pub request_id: u64,
    pub tokens_requested: u64,
}

/// Per-request outcome of a dispatched batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemOutcome {
    pub request_id: u64,
    pub tokens_produced: u64,
    pub decode_time_s: f64,
}

/// Result of one batch dispatch. Every item shares the same
/// `wall_time_s` — the batch completes as a unit (spec.md §5: "only
/// one batch is in flight logically at a time").
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub outcomes: Vec<ItemOutcome>,
    pub batch_size: usize,
    pub total_tokens: u64,
    pub prefill_time_s: f64,
    pub wall_time_s: f64,
}

pub trait GpuBackend: Send + Sync {
    /// Runs a batch to completion and reports timing/cost. `kv_max` is
    /// passed so the backend can assert the budget invariant the
    /// `BatchBuilder` is responsible for upholding (spec.md §4.6:
    /// "oversize batch must be rejected by the builder, not the
    /// backend; the backend asserts the invariant").
    fn run(&self, batch: &[BatchItem], kv_max: u64) -> Result<BatchResult, RequestError>;
}

/// Reference implementation of the deterministic timing model in
/// spec.md §4.6. Any real backend honoring `GpuBackend`'s contract is
/// an acceptable substitute (spec.md §1).
#[cfg(feature = "sim")]
pub mod sim {
    use super::*;

    #[derive(Debug, Clone, Copy)]
    pub struct SimulatedBackend {
        pub prefill_rate: f64,
        pub decode_base: f64,
    }

    impl SimulatedBackend {
        pub fn new(prefill_rate: f64, decode_base: f64) -> Self {
            Self {
                prefill_rate,
                decode_base,
            }
        }
    }

    impl Default for SimulatedBackend {
        fn default() -> Self {
            Self::new(1024.0, 128.0)
        }
    }

    impl GpuBackend for SimulatedBackend {
        fn run(&self, batch: &[BatchItem], kv_max: u64) -> Result<BatchResult, RequestError> {
            if batch.is_empty() {
                return Ok(BatchResult {
                    outcomes: Vec::new(),
                    batch_size: 0,
                    total_tokens: 0,
                    prefill_time_s: 0.0,
                    wall_time_s: 0.0,
                });
            }

            let total_tokens: u64 = batch.iter().map(|b| b.tokens_requested).sum();
            if total_tokens > kv_max {
                return Err(InternalError::KvOverflow {
                    used: 0,
                    requested: total_tokens,
                    kv_max,
                }
                .into());
            }

            let max_input_tokens = batch.iter().map(|b| b.tokens_requested).max().unwrap_or(0);
            let prefill_time_s = max_input_tokens as f64 / self.prefill_rate;

            let per_item_decode_rate =
                self.decode_base * (0.4 + 0.6 * (batch.len() as f64).sqrt());

            let outcomes: Vec<ItemOutcome> = batch
                .iter()
                .map(|item| {
                    let decode_time_s = item.tokens_requested as f64 / per_item_decode_rate;
                    ItemOutcome {
                        request_id: item.request_id,
                        tokens_produced: item.tokens_requested,
                        decode_time_s,
                    }
                })
                .collect();

            let max_decode_time_s = outcomes
                .iter()
                .map(|o| o.decode_time_s)
                .fold(0.0_f64, f64::max);
            let wall_time_s = prefill_time_s + max_decode_time_s;

            Ok(BatchResult {
                outcomes,
                batch_size: batch.len(),
                total_tokens,
                prefill_time_s,
                wall_time_s,
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn single_request_decode_time_matches_s1() {
            let backend = SimulatedBackend::default();
            let batch = [BatchItem {
                request_id: 1,
                tokens_requested: 100,
            }];
            let result = backend.run(&batch, 32_768).unwrap();
            assert_eq!(result.batch_size, 1);
            let decode = result.outcomes[0].decode_time_s;
            assert!((decode - (100.0 / 128.0)).abs() < 1e-9);
        }

        #[test]
        fn larger_batches_raise_the_decode_rate() {
            let backend = SimulatedBackend::default();
            let small = [BatchItem {
                request_id: 1,
                tokens_requested: 100,
            }];
            let big: Vec<BatchItem> = (0..16)
                .map(|i| BatchItem {
                    request_id: i,
                    tokens_requested: 100,
                })
                .collect();
            let r_small = backend.run(&small, 32_768).unwrap();
            let r_big = backend.run(&big, 32_768).unwrap();
            assert!(r_big.outcomes[0].decode_time_s < r_small.outcomes[0].decode_time_s);
        }

        #[test]
        fn oversize_batch_is_rejected_as_internal_error() {
            let backend = SimulatedBackend::default();
            let batch = [BatchItem {
                request_id: 1,
                tokens_requested: 40_000,
            }];
            let err = backend.run(&batch, 32_768).unwrap_err();
            match err {
                RequestError::Internal(InternalError::KvOverflow { .. }) => {}
                other => panic!("expected KvOverflow, got {other:?}"),
            }
        }

        #[test]
        fn empty_batch_is_a_noop() {
            let backend = SimulatedBackend::default();
            let result = backend.run(&[], 32_768).unwrap();
            assert_eq!(result.batch_size, 0);
            assert_eq!(result.wall_time_s, 0.0);
        }
    }
}
