//! Batch assembly under KV-cache and size limits (spec.md §4.4), and
//! the GPU's logical state (spec.md §3 "GPUState"), which the worker
//! owns exclusively (spec.md §5).

use std::time::Instant;

use crate::queue::{PriorityQueue, Request};

/// KV-cache budget and busy-until bookkeeping. Owned by the scheduler;
/// no external mutation (spec.md §5).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuState {
    pub kv_used_tokens: u64,
    pub busy_until: Option<Instant>,
}

impl GpuState {
    pub fn new() -> Self {
        Self {
            kv_used_tokens: 0,
            busy_until: None,
        }
    }
}

impl Default for GpuState {
    fn default() -> Self {
        Self::new()
    }
}

/// An ordered group of requests dispatched together. Invariant:
/// `total_tokens() <= kv_max` and `len() <= max_batch`.
pub struct Batch {
    pub requests: Vec<Request>,
}

impl Batch {
    pub fn total_tokens(&self) -> u64 {
        self.requests.iter().map(|r| r.tokens_requested).sum()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

pub struct BatchBuilder;

impl BatchBuilder {
    /// Applies spec.md §4.4's assembly rules in order. Oversized
    /// requests block the head of their priority class rather than
    /// being reordered to the back — aging bounds the resulting
    /// worst-case starvation.
    pub fn build(
        queue: &PriorityQueue,
        gpu_state: &GpuState,
        now: Instant,
        max_batch: usize,
        kv_max: u64,
    ) -> Batch {
        let mut requests = Vec::new();
        let mut budget = kv_max.saturating_sub(gpu_state.kv_used_tokens);

        while requests.len() < max_batch {
            let Some(candidate) = queue.peek(now) else {
                break;
            };
            if candidate.tokens_requested > budget {
                break;
            }
            let Some(popped) = queue.pop(now) else {
                break;
            };
            budget -= popped.tokens_requested;
            requests.push(popped);
        }

        Batch { requests }
    }
}
