// tests/pipeline_e2e.rs
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use school_cases::fetch::{default_pattern, FetchResult, Fetcher, Source, Transport, TransportPolicy};
use school_cases::sheet::layout::{DATE_ROW, LAST_UPDATED, TOTAL_ROW};
use school_cases::sheet::{resolve_layout, CellValue, Col, DryRun, MemoryWorksheet, Row, Worksheet};
use school_cases::sink::{WriteSink, DEFAULT_ABSENT_MARKER};
use school_cases::{runner, Pipeline, PipelineError, PipelineState, RateLimiter, RunOutcome};
use tokio::sync::Notify;
use tokio::time::Instant;

const DAY: &str = "9/8/2021";

#[derive(Clone)]
enum Page {
    Body(&'static str, u64),
    Down,
}

/// Answers each URL with a canned page after an optional delay.
struct Canned {
    pages: HashMap<String, Page>,
}

#[async_trait]
impl Transport for Canned {
    async fn get_text(&self, url: &str) -> Result<String> {
        match self.pages.get(url).cloned() {
            Some(Page::Body(body, delay_ms)) => {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok(body.to_string())
            }
            Some(Page::Down) => Err(anyhow!("connection refused")),
            None => Err(anyhow!("404 for {url}")),
        }
    }
}

fn url(name: &str) -> String {
    format!("https://district.test/{name}")
}

fn fetcher(pages: &[(&str, Page)], policy: TransportPolicy) -> Arc<Fetcher> {
    let pages = pages
        .iter()
        .map(|(name, page)| (url(name), page.clone()))
        .collect();
    let limiter = Arc::new(RateLimiter::new(100.0, 100.0).unwrap());
    Arc::new(
        Fetcher::new(
            Arc::new(Canned { pages }),
            limiter,
            1.0,
            default_pattern().clone(),
            policy,
        )
        .unwrap(),
    )
}

fn sources(names: &[&str]) -> Vec<Source> {
    names.iter().map(|n| Source::new(*n, url(n))).collect()
}

fn scenario_pages(c: Page) -> Vec<(&'static str, Page)> {
    vec![
        (
            "A",
            Page::Body(
                "<p>Positive COVID-19 Cases Reported Since Previous School Day: 5</p>",
                30,
            ),
        ),
        (
            "B",
            Page::Body(
                "<p>Positive COVID-19 Cases Reported Since Previous School Day: 0</p>",
                10,
            ),
        ),
        ("C", c),
    ]
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Apply(String, Option<u64>, Duration),
    Aggregate,
}

/// Records calls; optionally holds every write until released.
struct RecordingSink {
    start: Instant,
    events: Mutex<Vec<Event>>,
    gate: Option<Arc<Notify>>,
}

impl RecordingSink {
    fn new(gate: Option<Arc<Notify>>) -> Self {
        Self {
            start: Instant::now(),
            events: Mutex::new(Vec::new()),
            gate,
        }
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl WriteSink for RecordingSink {
    async fn apply_result(&self, result: &FetchResult) -> school_cases::error::Result<Row> {
        self.events.lock().unwrap().push(Event::Apply(
            result.source.name.clone(),
            result.value,
            self.start.elapsed(),
        ));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        Ok(1)
    }

    async fn compute_aggregate(&self) -> school_cases::error::Result<()> {
        self.events.lock().unwrap().push(Event::Aggregate);
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn three_schools_are_written_then_totalled() {
    let f = fetcher(&scenario_pages(Page::Body("<html>Bus schedule</html>", 20)), TransportPolicy::Fail);
    let sheet = Arc::new(MemoryWorksheet::school_template(&["A", "B", "C"], &[DAY]));

    let report = runner::run_with(f, sources(&["A", "B", "C"]), sheet.clone(), DAY, DEFAULT_ABSENT_MARKER)
        .await
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::Complete);
    let got: HashMap<String, Option<u64>> = report
        .results()
        .map(|r| (r.source.name.clone(), r.value))
        .collect();
    assert_eq!(
        got,
        HashMap::from([
            ("A".to_string(), Some(5)),
            ("B".to_string(), Some(0)),
            ("C".to_string(), None),
        ])
    );

    assert_eq!(sheet.get(4, 3), Some(CellValue::Number(5)));
    assert_eq!(sheet.get(5, 3), Some(CellValue::Number(0)));
    assert_eq!(sheet.get(6, 3), Some(CellValue::Text(DEFAULT_ABSENT_MARKER.into())));

    // Three row writes, then the total, and nothing else.
    let writes = sheet.writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(
        writes.last().unwrap(),
        &(TOTAL_ROW, 3, CellValue::Formula("=SUM(C4:C19)".into()))
    );
    assert!(sheet.inserted_columns().is_empty());
}

#[tokio::test(start_paused = true)]
async fn aggregate_runs_once_after_every_write() {
    let f = fetcher(&scenario_pages(Page::Body("nothing here", 20)), TransportPolicy::Fail);
    let sink = Arc::new(RecordingSink::new(None));

    let report = Pipeline::new(f, sources(&["A", "B", "C"]), sink.clone())
        .run()
        .await
        .unwrap();
    assert!(report.is_success());

    let events = sink.events();
    assert_eq!(events.len(), 4);
    assert_eq!(events.last(), Some(&Event::Aggregate));
    assert_eq!(events.iter().filter(|e| **e == Event::Aggregate).count(), 1);

    // Completion order reaches the writer: B (10ms), C (20ms), A (30ms).
    let order: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            Event::Apply(name, ..) => Some(name.as_str()),
            Event::Aggregate => None,
        })
        .collect();
    assert_eq!(order, vec!["B", "C", "A"]);
}

#[tokio::test(start_paused = true)]
async fn writes_start_while_fetches_are_in_flight() {
    let pages = vec![
        ("fast", Page::Body("Positive COVID-19 Cases Reported Since Previous School Day: 1", 10)),
        ("slow", Page::Body("Positive COVID-19 Cases Reported Since Previous School Day: 2", 1_000)),
    ];
    let f = fetcher(&pages, TransportPolicy::Fail);
    let sink = Arc::new(RecordingSink::new(None));

    Pipeline::new(f, sources(&["fast", "slow"]), sink.clone())
        .run()
        .await
        .unwrap();

    let fast_at = sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::Apply(name, _, at) if name == "fast" => Some(at),
            _ => None,
        })
        .unwrap();
    assert!(fast_at < Duration::from_millis(1_000), "fast write waited for slow fetch: {fast_at:?}");
}

#[tokio::test(start_paused = true)]
async fn transport_failure_fails_the_run_but_not_other_rows() {
    let f = fetcher(&scenario_pages(Page::Down), TransportPolicy::Fail);
    let sheet = Arc::new(MemoryWorksheet::school_template(&["A", "B", "C"], &[DAY]));

    let report = runner::run_with(f, sources(&["A", "B", "C"]), sheet.clone(), DAY, DEFAULT_ABSENT_MARKER)
        .await
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert!(!report.is_success());
    assert_eq!(report.fetch_failures.len(), 1);
    assert!(matches!(
        &report.fetch_failures[0],
        PipelineError::Transport { school, .. } if school == "C"
    ));

    assert_eq!(sheet.get(4, 3), Some(CellValue::Number(5)));
    assert_eq!(sheet.get(5, 3), Some(CellValue::Number(0)));
    assert_eq!(sheet.get(6, 3), None);
    assert!(sheet.get(TOTAL_ROW, 3).is_some());
}

#[tokio::test(start_paused = true)]
async fn transport_failure_as_absent_value_completes() {
    let f = fetcher(&scenario_pages(Page::Down), TransportPolicy::Absent);
    let sheet = Arc::new(MemoryWorksheet::school_template(&["A", "B", "C"], &[DAY]));

    let report = runner::run_with(f, sources(&["A", "B", "C"]), sheet.clone(), DAY, DEFAULT_ABSENT_MARKER)
        .await
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::Complete);
    assert_eq!(sheet.get(6, 3), Some(CellValue::Text(DEFAULT_ABSENT_MARKER.into())));
}

/// Delegates to a memory sheet but refuses writes to one row.
struct FlakySheet {
    inner: Arc<MemoryWorksheet>,
    bad_row: Row,
}

#[async_trait]
impl Worksheet for FlakySheet {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        self.inner.get_values(range).await
    }

    async fn update_cell(&self, row: Row, col: Col, value: CellValue) -> Result<()> {
        if row == self.bad_row {
            return Err(anyhow!("quota exceeded"));
        }
        self.inner.update_cell(row, col, value).await
    }

    async fn insert_column(&self, col: Col) -> Result<()> {
        self.inner.insert_column(col).await
    }
}

#[tokio::test(start_paused = true)]
async fn write_failures_surface_after_drain() {
    let f = fetcher(&scenario_pages(Page::Body("nothing", 5)), TransportPolicy::Fail);
    let memory = Arc::new(MemoryWorksheet::school_template(&["A", "B", "C"], &[DAY]));
    let sheet = Arc::new(FlakySheet {
        inner: memory.clone(),
        bad_row: 5,
    });

    let report = runner::run_with(f, sources(&["A", "B", "C"]), sheet, DAY, DEFAULT_ABSENT_MARKER)
        .await
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::Partial);
    assert_eq!(
        report.write_failures,
        vec![PipelineError::Write {
            school: "B".into(),
            row: 5,
            reason: "quota exceeded".into(),
        }]
    );
    let written: HashSet<&str> = report.results().map(|r| r.source.name.as_str()).collect();
    assert_eq!(written, HashSet::from(["A", "C"]));
    assert_eq!(memory.get(4, 3), Some(CellValue::Number(5)));
}

#[tokio::test(start_paused = true)]
async fn school_missing_from_sheet_is_a_write_failure() {
    let f = fetcher(&scenario_pages(Page::Body("nothing", 5)), TransportPolicy::Fail);
    let sheet = Arc::new(MemoryWorksheet::school_template(&["A", "B"], &[DAY]));

    let report = runner::run_with(f, sources(&["A", "B", "C"]), sheet, DAY, DEFAULT_ABSENT_MARKER)
        .await
        .unwrap();

    assert_eq!(report.write_failures, vec![PipelineError::UnknownSchool("C".into())]);
    assert_eq!(report.written.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn new_day_gets_a_fresh_column() {
    let f = fetcher(&scenario_pages(Page::Body("nothing", 5)), TransportPolicy::Fail);
    let sheet = Arc::new(MemoryWorksheet::school_template(&["A", "B", "C"], &["9/7/2021"]));
    sheet.set(4, 3, CellValue::Number(9));

    runner::run_with(f, sources(&["A", "B", "C"]), sheet.clone(), DAY, DEFAULT_ABSENT_MARKER)
        .await
        .unwrap();

    assert_eq!(sheet.inserted_columns(), vec![3]);
    assert_eq!(sheet.get(4, 3), Some(CellValue::Number(5)));
    // Yesterday's value moved one column right.
    assert_eq!(sheet.get(4, 4), Some(CellValue::Number(9)));
    assert_eq!(
        sheet.get(LAST_UPDATED.0, LAST_UPDATED.1),
        Some(CellValue::Text(DAY.into()))
    );
}

#[tokio::test(start_paused = true)]
async fn dry_run_on_a_new_day_reads_but_never_writes() {
    let f = fetcher(&scenario_pages(Page::Body("nothing", 5)), TransportPolicy::Fail);
    let memory = Arc::new(MemoryWorksheet::school_template(&["A", "B", "C"], &["9/7/2021"]));
    let sheet: Arc<dyn Worksheet> = Arc::new(DryRun::new(memory.clone()));

    // Layout comes from real reads even though the column is never inserted.
    let layout = resolve_layout(sheet.as_ref(), DAY).await.unwrap();
    assert_eq!(layout.date_col, 3);
    assert_eq!(layout.row_for("C"), Some(6));

    let report = runner::run_with(f, sources(&["A", "B", "C"]), sheet, DAY, DEFAULT_ABSENT_MARKER)
        .await
        .unwrap();

    assert_eq!(report.outcome(), RunOutcome::Complete);
    let written: HashSet<&str> = report.results().map(|r| r.source.name.as_str()).collect();
    assert_eq!(written, HashSet::from(["A", "B", "C"]));

    // No rows, no total, no new column, no stamp.
    assert!(memory.writes().is_empty());
    assert!(memory.inserted_columns().is_empty());
    assert_eq!(memory.get(DATE_ROW, 3), Some(CellValue::Text("9/7/2021".into())));
    assert_eq!(memory.get(LAST_UPDATED.0, LAST_UPDATED.1), None);
}

#[tokio::test(start_paused = true)]
async fn every_school_is_written_exactly_once() {
    let names: Vec<String> = (0..12).map(|i| format!("school-{i}")).collect();
    let pages: Vec<(&str, Page)> = names
        .iter()
        .enumerate()
        .map(|(i, n)| {
            let page = if i % 4 == 0 {
                Page::Down
            } else {
                Page::Body(
                    "Positive COVID-19 Cases Reported Since Previous School Day: 3",
                    (37 * i as u64) % 100,
                )
            };
            (n.as_str(), page)
        })
        .collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let f = fetcher(&pages, TransportPolicy::Fail);
    let sink = Arc::new(RecordingSink::new(None));

    let report = Pipeline::new(f, sources(&name_refs), sink.clone())
        .run()
        .await
        .unwrap();

    let applied: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            Event::Apply(name, ..) => Some(name),
            Event::Aggregate => None,
        })
        .collect();
    let unique: HashSet<&String> = applied.iter().collect();
    assert_eq!(applied.len(), unique.len(), "duplicate writes: {applied:?}");

    let failed: HashSet<String> = report
        .fetch_failures
        .iter()
        .filter_map(|e| e.school().map(str::to_string))
        .collect();
    assert_eq!(failed.len(), 3);
    assert_eq!(applied.len() + failed.len(), names.len());
    assert!(applied.iter().all(|n| !failed.contains(n)));
}

#[tokio::test(start_paused = true)]
async fn rerun_yields_the_same_pairs() {
    let pages = scenario_pages(Page::Body("nothing", 15));
    let mut runs = Vec::new();
    for _ in 0..2 {
        let sink = Arc::new(RecordingSink::new(None));
        let report = Pipeline::new(
            fetcher(&pages, TransportPolicy::Fail),
            sources(&["A", "B", "C"]),
            sink,
        )
        .run()
        .await
        .unwrap();
        let pairs: HashSet<(String, Option<u64>)> = report
            .results()
            .map(|r| (r.source.name.clone(), r.value))
            .collect();
        runs.push(pairs);
    }
    assert_eq!(runs[0], runs[1]);
    assert_eq!(runs[0].len(), 3);
}

#[tokio::test(start_paused = true)]
async fn drains_outstanding_writes_before_done() {
    let f = fetcher(&scenario_pages(Page::Body("nothing", 5)), TransportPolicy::Fail);
    let gate = Arc::new(Notify::new());
    let sink = Arc::new(RecordingSink::new(Some(gate.clone())));

    let pipeline = Pipeline::new(f, sources(&["A", "B", "C"]), sink.clone());
    let mut state = pipeline.subscribe();
    assert_eq!(pipeline.state(), PipelineState::Init);
    let run = tokio::spawn(pipeline.run());

    // All results dequeued, writes still held at the gate.
    state
        .wait_for(|s| *s == PipelineState::Draining)
        .await
        .unwrap();
    assert!(!run.is_finished());
    assert!(!sink.events().contains(&Event::Aggregate));

    // Release the writes as they park on the gate.
    let releaser = tokio::spawn({
        let gate = gate.clone();
        async move {
            loop {
                gate.notify_waiters();
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
    });
    let report = run.await.unwrap().unwrap();
    releaser.abort();

    assert!(report.is_success());
    assert_eq!(*state.borrow(), PipelineState::Done);
}

#[tokio::test(start_paused = true)]
async fn all_fetches_failing_still_drains_and_finishes() {
    let pages = vec![("A", Page::Down), ("B", Page::Down)];
    let f = fetcher(&pages, TransportPolicy::Fail);
    let sink = Arc::new(RecordingSink::new(None));

    let pipeline = Pipeline::new(f, sources(&["A", "B"]), sink.clone());
    let state = pipeline.subscribe();
    let report = pipeline.run().await.unwrap();

    assert_eq!(report.outcome(), RunOutcome::Failed);
    assert_eq!(report.fetch_failures.len(), 2);
    assert_eq!(sink.events(), vec![Event::Aggregate]);
    assert_eq!(*state.borrow(), PipelineState::Done);
}
