// src/sink.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;

use crate::error::{PipelineError, Result};
use crate::fetch::FetchResult;
use crate::sheet::layout::TOTAL_ROW;
use crate::sheet::{CellValue, Row, SheetLayout, Worksheet};

/// Written instead of a number when a page had no usable count.
pub const DEFAULT_ABSENT_MARKER: &str = "Not on website";

/// Destination of one run. `apply_result` is called concurrently for
/// different schools; `compute_aggregate` at most once, after the writes.
#[async_trait]
pub trait WriteSink: Send + Sync {
    /// Record one school's count; returns the row written.
    async fn apply_result(&self, result: &FetchResult) -> Result<Row>;

    async fn compute_aggregate(&self) -> Result<()>;
}

/// Writes into today's column of the case-data worksheet.
pub struct SheetSink {
    sheet: Arc<dyn Worksheet>,
    layout: SheetLayout,
    absent_marker: String,
    aggregated: AtomicBool,
}

impl SheetSink {
    /// `layout` must already be resolved against `sheet`.
    pub fn new(sheet: Arc<dyn Worksheet>, layout: SheetLayout, absent_marker: impl Into<String>) -> Self {
        Self {
            sheet,
            layout,
            absent_marker: absent_marker.into(),
            aggregated: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl WriteSink for SheetSink {
    async fn apply_result(&self, result: &FetchResult) -> Result<Row> {
        let school = &result.source.name;
        let Some(row) = self.layout.row_for(school) else {
            counter!("sheet_write_errors_total").increment(1);
            return Err(PipelineError::UnknownSchool(school.clone()));
        };

        let value = match result.value {
            Some(n) => CellValue::Number(n),
            None => CellValue::Text(self.absent_marker.clone()),
        };
        tracing::info!(school = %school, row, cases = %value, "adding result");

        match self.sheet.update_cell(row, self.layout.date_col, value).await {
            Ok(()) => {
                counter!("sheet_writes_total").increment(1);
                Ok(row)
            }
            Err(e) => {
                counter!("sheet_write_errors_total").increment(1);
                Err(PipelineError::Write {
                    school: school.clone(),
                    row,
                    reason: format!("{e:#}"),
                })
            }
        }
    }

    async fn compute_aggregate(&self) -> Result<()> {
        if self.aggregated.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Aggregate(
                "total already written this run".to_string(),
            ));
        }

        let formula = self.layout.total_formula();
        tracing::info!(row = TOTAL_ROW, formula = %formula, "adding total");
        self.sheet
            .update_cell(TOTAL_ROW, self.layout.date_col, CellValue::Formula(formula))
            .await
            .map_err(|e| PipelineError::Aggregate(format!("{e:#}")))
    }
}
