//! Shared error types, configuration loading, and the clock abstraction
//! used across the admission engine crates.

pub mod clock;
pub mod config;
pub mod error;

pub use clock::{Clock, FakeClock, SystemClock};
pub use config::EngineConfig;
pub use error::{AdmissionError, DispatchError, InternalError, RequestError, RunnerError};

pub type Result<T> = core::result::Result<T, RunnerError>;
