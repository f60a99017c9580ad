//! Error types for the fetch/write pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Errors that can occur during one polling run.
///
/// An extraction miss (pattern not found, non-numeric capture) is not an
/// error: it is carried as an absent value in [`crate::fetch::FetchResult`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The request for one school could not complete.
    #[error("transport failure for {school}: {reason}")]
    Transport { school: String, reason: String },

    /// The fetch task for one school panicked or was cancelled.
    #[error("fetch task for {school} aborted: {reason}")]
    FetchAborted { school: String, reason: String },

    /// A fetch would cost more tokens than the bucket can ever hold.
    #[error("limiter misconfigured: cost {cost} exceeds capacity {capacity}")]
    LimiterMisconfigured { cost: f64, capacity: f64 },

    /// Rate, capacity or cost is not a positive finite number.
    #[error("invalid limiter setting: {0}")]
    InvalidLimiter(String),

    /// A background row write failed.
    #[error("write failed for {school} (row {row}): {reason}")]
    Write {
        school: String,
        row: u32,
        reason: String,
    },

    /// No destination row is known for this school.
    #[error("no row for school {0}")]
    UnknownSchool(String),

    /// The total formula could not be written.
    #[error("aggregate failed: {0}")]
    Aggregate(String),

    /// The queue closed before the end-of-results marker arrived.
    #[error("result queue closed before the end-of-results marker")]
    QueueClosed,

    /// Producer, consumer and source counts disagree.
    #[error("result count mismatch: {sources} sources, {enqueued} enqueued, {received} received")]
    CountMismatch {
        sources: usize,
        enqueued: usize,
        received: usize,
    },

    /// A pipeline task itself panicked.
    #[error("pipeline task failed: {0}")]
    Task(String),
}

impl PipelineError {
    /// School affected by this error, when it concerns a single one.
    pub fn school(&self) -> Option<&str> {
        match self {
            Self::Transport { school, .. }
            | Self::FetchAborted { school, .. }
            | Self::Write { school, .. } => Some(school),
            Self::UnknownSchool(school) => Some(school),
            _ => None,
        }
    }
}
