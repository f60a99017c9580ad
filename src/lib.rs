// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod cli;
pub mod config;
pub mod error;
pub mod fetch;
pub mod limiter;
pub mod pipeline;
pub mod runner;
pub mod sheet;
pub mod sink;
pub mod stream;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::error::PipelineError;
pub use crate::fetch::{FetchResult, Fetcher, Source, TransportPolicy};
pub use crate::limiter::RateLimiter;
pub use crate::pipeline::{Item, Pipeline, PipelineState, RunOutcome, RunReport};
pub use crate::sink::{SheetSink, WriteSink};
pub use crate::stream::ResultStream;
