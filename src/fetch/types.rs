// src/fetch/types.rs
use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// One monitored school page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Source {
    pub name: String,     // e.g. "Lincoln Elementary"
    pub endpoint: String, // page URL
}

impl Source {
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Outcome of one successful request. `value` is `None` when the page did not
/// contain a usable count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FetchResult {
    pub source: Source,
    pub value: Option<u64>,
}

/// What each fetch slot produces: a result, or the failure that used the slot.
pub type FetchOutcome = std::result::Result<FetchResult, PipelineError>;

/// Network side of a fetch. Implemented over reqwest in production and by
/// canned responders in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn get_text(&self, url: &str) -> Result<String>;
}
