//! Lazy-aged priority queue (spec.md §4.3).
//!
//! The heap's structural order never changes once an entry is
//! inserted — it is kept ordered by the static `(-priority_bid, seq)`
//! key the way a plain `BinaryHeap` would be. Aging is only applied at
//! pop/peek time, over a bounded top-K rescan (option (b) of spec.md
//! §4.3), so the heap is never rebuilt on a timer.
//!
//! `Ord` is implemented by reversing the comparison the way
//! `std::collections::BinaryHeap`'s own docs (and this crate's
//! neighbor `HomeostaticScheduler`) invert a max-heap into a min-heap:
//! the entry with the smallest `(neg_base_priority, seq)` pair must be
//! the one a max-heap reports as greatest.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::oneshot;

use engine_common::RequestError;

/// Result delivered through a request's completion handle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RequestOutcome {
    pub tokens_produced: u64,
    pub latency_s: f64,
    pub batch_size: usize,
    pub queue_wait_s: f64,
}

pub type CompletionResult = Result<RequestOutcome, RequestError>;

/// A single admitted unit of work (spec.md §3 "Request").
pub struct Request {
    pub request_id: u64,
    pub tenant_id: String,
    pub tokens_requested: u64,
    pub priority_bid: i32,
    pub arrival_time: Instant,
    pub completion: oneshot::Sender<CompletionResult>,
}

/// Cheap, `Copy` view of a request's scheduling-relevant fields,
/// returned by `peek` so callers can make an admission decision
/// without taking ownership of the completion handle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestPeek {
    pub request_id: u64,
    pub tokens_requested: u64,
    pub priority_bid: i32,
    pub arrival_time: Instant,
}

struct HeapEntry {
    neg_base_priority: i32,
    arrival_time: Instant,
    seq: u64,
    request: Request,
}

impl HeapEntry {
    fn effective_key(&self, now: Instant, alpha: f64) -> f64 {
        let priority_bid = -self.neg_base_priority as f64;
        let waited = now.saturating_duration_since(self.arrival_time).as_secs_f64();
        -(priority_bid + alpha * waited)
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.neg_base_priority == other.neg_base_priority && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so BinaryHeap (a max-heap) pops the entry with the
        // smallest (neg_base_priority, seq) first.
        other
            .neg_base_priority
            .cmp(&self.neg_base_priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<HeapEntry>>,
    len: AtomicUsize,
    next_seq: AtomicU64,
    alpha: f64,
    top_k: usize,
}

impl PriorityQueue {
    pub fn new(alpha: f64, top_k: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::new()),
            len: AtomicUsize::new(0),
            next_seq: AtomicU64::new(0),
            alpha,
            top_k: top_k.max(1),
        }
    }

    pub fn push(&self, request: Request, _now: Instant) {
        let seq = self.next_seq.fetch_add(1, AtomicOrdering::SeqCst);
        let entry = HeapEntry {
            neg_base_priority: -request.priority_bid,
            arrival_time: request.arrival_time,
            seq,
            request,
        };
        self.heap.lock().unwrap().push(entry);
        self.len.fetch_add(1, AtomicOrdering::SeqCst);
    }

    /// Removes and returns the entry with the smallest `P_eff(now)`
    /// over a bounded top-K rescan, ties broken by smaller `seq`.
    pub fn pop(&self, now: Instant) -> Option<Request> {
        let mut heap = self.heap.lock().unwrap();
        let k = self.top_k.min(heap.len());
        if k == 0 {
            return None;
        }
        let mut candidates: Vec<HeapEntry> = Vec::with_capacity(k);
        for _ in 0..k {
            if let Some(e) = heap.pop() {
                candidates.push(e);
            }
        }
        let best_idx = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.effective_key(now, self.alpha)
                    .partial_cmp(&b.effective_key(now, self.alpha))
                    .unwrap()
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(i, _)| i)
            .expect("k > 0 implies at least one candidate");
        let best = candidates.swap_remove(best_idx);
        for c in candidates {
            heap.push(c);
        }
        drop(heap);
        self.len.fetch_sub(1, AtomicOrdering::SeqCst);
        Some(best.request)
    }

    /// Non-destructive variant of `pop`. Drains and reinserts the same
    /// top-K candidates it inspects, so the heap is left unchanged.
    pub fn peek(&self, now: Instant) -> Option<RequestPeek> {
        let mut heap = self.heap.lock().unwrap();
        let k = self.top_k.min(heap.len());
        if k == 0 {
            return None;
        }
        let mut candidates: Vec<HeapEntry> = Vec::with_capacity(k);
        for _ in 0..k {
            if let Some(e) = heap.pop() {
                candidates.push(e);
            }
        }
        let best_idx = candidates
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.effective_key(now, self.alpha)
                    .partial_cmp(&b.effective_key(now, self.alpha))
                    .unwrap()
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(i, _)| i)
            .expect("k > 0 implies at least one candidate");
        let peek = RequestPeek {
            request_id: candidates[best_idx].request.request_id,
            tokens_requested: candidates[best_idx].request.tokens_requested,
            priority_bid: candidates[best_idx].request.priority_bid,
            arrival_time: candidates[best_idx].arrival_time,
        };
        for c in candidates {
            heap.push(c);
        }
        Some(peek)
    }

    pub fn len(&self) -> usize {
        self.len.load(AtomicOrdering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
