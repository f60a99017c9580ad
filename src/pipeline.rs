// src/pipeline.rs
//! Producer/consumer handoff between the fetch fan-out and the sheet writes.
//!
//! The producer drains a [`ResultStream`] into an unbounded queue and closes
//! it with a single [`Item::Done`]. The consumer spawns one background write
//! per result as soon as it arrives, then drains those writes once `Done` is
//! seen. The total is written once, after the drain.

use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::error::{PipelineError, Result};
use crate::fetch::{FetchOutcome, FetchResult, Fetcher, Source};
use crate::sheet::Row;
use crate::sink::WriteSink;
use crate::stream::ResultStream;

/// One-time metrics registration.
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_requests_total", "School pages requested.");
        describe_counter!(
            "fetch_extraction_miss_total",
            "Pages fetched without a usable case count."
        );
        describe_counter!(
            "fetch_transport_errors_total",
            "Requests that failed to complete."
        );
        describe_counter!("sheet_writes_total", "Rows written to the sheet.");
        describe_counter!("sheet_write_errors_total", "Row writes that failed.");
        describe_histogram!("fetch_duration_ms", "Page download time in milliseconds.");
        describe_gauge!("pipeline_last_run_ts", "Unix ts when the pipeline last finished.");
        describe_counter!("pipeline_runs_total", "Completed pipeline runs.");
    });
}

/// Queue element. `Done` is enqueued once, after every fetch outcome.
#[derive(Debug)]
pub enum Item {
    Result(FetchOutcome),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Running,
    /// `Done` seen; waiting for outstanding writes.
    Draining,
    Done,
    /// The handoff broke; no total was written.
    Aborted,
}

/// Forward every outcome, then the end marker. Returns how many outcomes
/// were enqueued.
pub async fn produce(mut stream: ResultStream, queue: UnboundedSender<Item>) -> Result<usize> {
    let mut enqueued = 0usize;
    while let Some(outcome) = stream.next().await {
        queue
            .send(Item::Result(outcome))
            .map_err(|_| PipelineError::QueueClosed)?;
        enqueued += 1;
    }
    queue
        .send(Item::Done)
        .map_err(|_| PipelineError::QueueClosed)?;
    tracing::debug!(enqueued, "producer finished");
    Ok(enqueued)
}

#[derive(Debug, Default)]
pub struct ConsumerReport {
    /// Outcomes dequeued (results and fetch failures).
    pub received: usize,
    pub saw_done: bool,
    pub written: Vec<(FetchResult, Row)>,
    pub fetch_failures: Vec<PipelineError>,
    pub write_failures: Vec<PipelineError>,
}

/// Dequeue until `Done`, spawning a write per result without waiting on it;
/// then await every write. Writes are drained even if the queue closes early.
pub async fn consume(
    mut queue: UnboundedReceiver<Item>,
    sink: Arc<dyn WriteSink>,
    state: &watch::Sender<PipelineState>,
) -> ConsumerReport {
    let mut report = ConsumerReport::default();
    let mut writes: Vec<(String, JoinHandle<Result<(FetchResult, Row)>>)> = Vec::new();

    while let Some(item) = queue.recv().await {
        match item {
            Item::Result(Ok(result)) => {
                report.received += 1;
                let sink = Arc::clone(&sink);
                let school = result.source.name.clone();
                writes.push((
                    school,
                    tokio::spawn(async move {
                        let row = sink.apply_result(&result).await?;
                        Ok((result, row))
                    }),
                ));
            }
            Item::Result(Err(e)) => {
                report.received += 1;
                tracing::error!(error = %e, "fetch failed");
                report.fetch_failures.push(e);
            }
            Item::Done => {
                report.saw_done = true;
                break;
            }
        }
    }

    state.send_replace(PipelineState::Draining);
    tracing::debug!(pending = writes.len(), "draining writes");

    for (school, handle) in writes {
        match handle.await {
            Ok(Ok(written)) => report.written.push(written),
            Ok(Err(e)) => {
                tracing::error!(error = %e, "write failed");
                report.write_failures.push(e);
            }
            Err(e) => {
                tracing::error!(school = %school, error = %e, "write task aborted");
                report
                    .write_failures
                    .push(PipelineError::Task(format!("write for {school}: {e}")));
            }
        }
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Complete,
    /// Some rows written, some failures.
    Partial,
    /// Failures and nothing written.
    Failed,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub sources: usize,
    pub written: Vec<(FetchResult, Row)>,
    pub fetch_failures: Vec<PipelineError>,
    pub write_failures: Vec<PipelineError>,
    pub aggregate_failure: Option<PipelineError>,
}

impl RunReport {
    pub fn failures(&self) -> impl Iterator<Item = &PipelineError> {
        self.fetch_failures
            .iter()
            .chain(&self.write_failures)
            .chain(&self.aggregate_failure)
    }

    /// Results that reached the sheet.
    pub fn results(&self) -> impl Iterator<Item = &FetchResult> {
        self.written.iter().map(|(r, _)| r)
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.failures().next().is_none() {
            RunOutcome::Complete
        } else if self.written.is_empty() {
            RunOutcome::Failed
        } else {
            RunOutcome::Partial
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome() == RunOutcome::Complete
    }

    /// One line per affected school or row, then a summary line.
    pub fn log_summary(&self) {
        for failure in self.failures() {
            tracing::error!(school = failure.school().unwrap_or("-"), error = %failure, "run failure");
        }
        let failed = self.failures().count();
        match self.outcome() {
            RunOutcome::Complete => {
                tracing::info!(written = self.written.len(), sources = self.sources, "run complete")
            }
            RunOutcome::Partial => tracing::warn!(
                written = self.written.len(),
                failed,
                sources = self.sources,
                "run partially succeeded"
            ),
            RunOutcome::Failed => {
                tracing::error!(failed, sources = self.sources, "run failed; nothing written")
            }
        }
    }
}

/// One polling run over a fixed set of schools.
pub struct Pipeline {
    fetcher: Arc<Fetcher>,
    sources: Vec<Source>,
    sink: Arc<dyn WriteSink>,
    state: Arc<watch::Sender<PipelineState>>,
}

impl Pipeline {
    pub fn new(fetcher: Arc<Fetcher>, sources: Vec<Source>, sink: Arc<dyn WriteSink>) -> Self {
        let (state, _) = watch::channel(PipelineState::Init);
        Self {
            fetcher,
            sources,
            sink,
            state: Arc::new(state),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    /// Fails only when the handoff itself breaks (a pipeline task dies or
    /// counts disagree); per-school failures are returned in the report.
    pub async fn run(mut self) -> Result<RunReport> {
        ensure_metrics_described();
        let sources = std::mem::take(&mut self.sources);
        let expected = sources.len();
        self.state.send_replace(PipelineState::Running);

        let (tx, rx) = mpsc::unbounded_channel();

        // Consumer first, so writes start with the first finished fetch.
        let consumer = tokio::spawn({
            let sink = Arc::clone(&self.sink);
            let state = Arc::clone(&self.state);
            async move { consume(rx, sink, &state).await }
        });
        let stream = ResultStream::spawn(Arc::clone(&self.fetcher), sources);
        let producer = tokio::spawn(produce(stream, tx));

        let (produced, consumed) = tokio::join!(producer, consumer);
        let consumed = consumed.map_err(|e| PipelineError::Task(format!("consumer: {e}")));
        let produced = produced
            .map_err(|e| PipelineError::Task(format!("producer: {e}")))
            .and_then(|enqueued| enqueued);
        let consumed = self.settle(expected, produced, consumed)?;

        let aggregate_failure = self.sink.compute_aggregate().await.err();
        if let Some(e) = &aggregate_failure {
            tracing::error!(error = %e, "total not written");
        }

        gauge!("pipeline_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
        counter!("pipeline_runs_total").increment(1);
        self.state.send_replace(PipelineState::Done);

        Ok(RunReport {
            sources: expected,
            written: consumed.written,
            fetch_failures: consumed.fetch_failures,
            write_failures: consumed.write_failures,
            aggregate_failure,
        })
    }

    /// Check the handoff accounting. On failure, log whatever already reached
    /// the sheet and publish `Aborted`.
    fn settle(
        &self,
        expected: usize,
        produced: Result<usize>,
        consumed: Result<ConsumerReport>,
    ) -> Result<ConsumerReport> {
        let report = match consumed {
            Ok(report) => report,
            Err(e) => return Err(self.abort(e, None)),
        };
        let enqueued = match produced {
            Ok(n) => n,
            Err(e) => return Err(self.abort(e, Some(&report))),
        };
        if !report.saw_done {
            return Err(self.abort(PipelineError::QueueClosed, Some(&report)));
        }
        if enqueued != expected || report.received != enqueued {
            let e = PipelineError::CountMismatch {
                sources: expected,
                enqueued,
                received: report.received,
            };
            return Err(self.abort(e, Some(&report)));
        }
        Ok(report)
    }

    fn abort(&self, error: PipelineError, report: Option<&ConsumerReport>) -> PipelineError {
        if let Some(report) = report {
            for (result, row) in &report.written {
                tracing::warn!(school = %result.source.name, row, "row written before abort");
            }
            for failure in &report.write_failures {
                tracing::error!(error = %failure, "write failed before abort");
            }
        }
        tracing::error!(error = %error, "pipeline aborted");
        self.state.send_replace(PipelineState::Aborted);
        error
    }
}
