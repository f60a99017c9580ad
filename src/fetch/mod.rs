// src/fetch/mod.rs
pub mod extract;
pub mod transport;
pub mod types;

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::limiter::RateLimiter;

pub use extract::{compile_pattern, default_pattern, extract_count, DEFAULT_CASES_PATTERN};
pub use transport::HttpTransport;
pub use types::{FetchOutcome, FetchResult, Source, Transport};

/// What to do when a request for a school cannot complete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPolicy {
    /// Report the failure for that school; its row is left untouched and the
    /// run fails once everything else has been written.
    #[default]
    Fail,
    /// Log the failure and record the school as having no count.
    Absent,
}

/// Rate-limited fetch-and-extract for one school at a time. One instance is
/// shared by every task of a run, so the policy applies uniformly.
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    limiter: Arc<RateLimiter>,
    cost: f64,
    pattern: Regex,
    policy: TransportPolicy,
}

impl Fetcher {
    /// Fails when `cost` can never be admitted by `limiter`.
    pub fn new(
        transport: Arc<dyn Transport>,
        limiter: Arc<RateLimiter>,
        cost: f64,
        pattern: Regex,
        policy: TransportPolicy,
    ) -> Result<Self> {
        limiter.check_cost(cost)?;
        crate::pipeline::ensure_metrics_described();
        Ok(Self {
            transport,
            limiter,
            cost,
            pattern,
            policy,
        })
    }

    pub async fn fetch(&self, source: Source) -> Result<FetchResult> {
        self.limiter.admit(self.cost).await?;

        tracing::info!(school = %source.name, url = %source.endpoint, "downloading");
        counter!("fetch_requests_total").increment(1);

        let t0 = Instant::now();
        let body = self.transport.get_text(&source.endpoint).await;
        histogram!("fetch_duration_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let content = match body {
            Ok(content) => content,
            Err(e) => {
                counter!("fetch_transport_errors_total").increment(1);
                let reason = format!("{e:#}");
                return match self.policy {
                    TransportPolicy::Fail => Err(PipelineError::Transport {
                        school: source.name,
                        reason,
                    }),
                    TransportPolicy::Absent => {
                        tracing::warn!(school = %source.name, error = %reason, "download failed; recording no count");
                        Ok(FetchResult {
                            source,
                            value: None,
                        })
                    }
                };
            }
        };

        let value = extract_count(&content, &self.pattern);
        if value.is_none() {
            counter!("fetch_extraction_miss_total").increment(1);
            tracing::debug!(school = %source.name, "case count not found on page");
        }
        Ok(FetchResult { source, value })
    }
}
