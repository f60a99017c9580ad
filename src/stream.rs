// src/stream.rs
//! Fan-out of one fetch task per school, observed in completion order.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::{Id, JoinSet};

use crate::error::PipelineError;
use crate::fetch::{FetchOutcome, Fetcher, Source};

/// Finite, non-restartable sequence of fetch outcomes. A task that finishes
/// sooner is yielded sooner regardless of submission order; every task is
/// yielded exactly once, including tasks that panicked.
pub struct ResultStream {
    tasks: JoinSet<FetchOutcome>,
    pending: HashMap<Id, Source>,
}

impl ResultStream {
    /// Spawns every fetch immediately on the current runtime.
    pub fn spawn(fetcher: Arc<Fetcher>, sources: impl IntoIterator<Item = Source>) -> Self {
        let mut tasks = JoinSet::new();
        let mut pending = HashMap::new();

        for source in sources {
            let fetcher = Arc::clone(&fetcher);
            let slot = source.clone();
            let handle = tasks.spawn(async move { fetcher.fetch(source).await });
            pending.insert(handle.id(), slot);
        }

        Self { tasks, pending }
    }

    /// Tasks not yet yielded.
    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Next finished outcome, or `None` once every task has been yielded.
    pub async fn next(&mut self) -> Option<FetchOutcome> {
        let joined = self.tasks.join_next_with_id().await?;

        let outcome = match joined {
            Ok((id, outcome)) => {
                self.pending.remove(&id);
                outcome
            }
            Err(e) => {
                let school = self
                    .pending
                    .remove(&e.id())
                    .map(|s| s.name)
                    .unwrap_or_else(|| "<unknown>".to_string());
                let reason = if e.is_panic() {
                    "task panicked".to_string()
                } else {
                    "task cancelled".to_string()
                };
                tracing::error!(school = %school, reason = %reason, "fetch task aborted");
                Err(PipelineError::FetchAborted { school, reason })
            }
        };
        Some(outcome)
    }

    /// Abort every task still running; they are still yielded (as aborted).
    pub fn abort_all(&mut self) {
        self.tasks.abort_all();
    }
}
