//! Error taxonomy for the admission engine (spec §7).
//!
//! Admission errors are returned synchronously from `submit` and never
//! touch the queue. Dispatch errors are surfaced on a request's
//! completion handle. Internal errors are fatal: the worker loop
//! terminates and every pending handle resolves with `INTERNAL_ERROR`.

/// Catch-all used by configuration/IO paths that don't need the full
/// admission/dispatch/internal taxonomy.
#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("not implemented")]
    NotImplemented,
    #[error("{0}")]
    Message(String),
}

/// Returned synchronously by `submit`; never enters the queue or
/// affects metrics.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AdmissionError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("rate limited")]
    RateLimited,
    #[error("invalid priority bid {0}: must be in [1, 10]")]
    InvalidPriority(i32),
    #[error("invalid token count {0}")]
    InvalidTokens(i64),
}

/// Surfaced on a request's completion handle. A batch resolves
/// atomically: either every request in it succeeds, or every request
/// in it is resolved with the same dispatch error.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("gpu backend failure: {0}")]
    BackendFailure(String),
    #[error("shutdown before dispatch completed")]
    Shutdown,
}

/// Indicates an implementation bug (KV overflow, a negative bucket
/// balance, etc). Fatal: the worker terminates and drains all pending
/// handles with this error.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InternalError {
    #[error("kv-cache overflow: {used} used + {requested} requested > {kv_max} max")]
    KvOverflow {
        used: u64,
        requested: u64,
        kv_max: u64,
    },
    #[error("tenant bucket invariant violated: tokens={tokens} burst_cap={burst_cap}")]
    NegativeBucket { tokens: f64, burst_cap: f64 },
    #[error("batch exceeds size limit: {size} > {max_batch}")]
    BatchTooLarge { size: usize, max_batch: usize },
}

/// The error a request's completion handle resolves with when it does
/// not complete successfully.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum RequestError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("internal error: {0}")]
    Internal(#[from] InternalError),
}
