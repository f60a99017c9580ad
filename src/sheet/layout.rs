// src/sheet/layout.rs
//! Where today's counts go: one column per day (newest first, at `C`), one
//! row per school, a total row underneath.

use std::collections::HashMap;

use anyhow::{Context, Result};

use super::{column_letters, CellValue, Col, Row, Worksheet};

// Named ranges defined on the worksheet.
pub const DATES_RANGE: &str = "dates";
pub const RECENT_RANGE: &str = "recent";
pub const SCHOOLS_RANGE: &str = "schools";

pub const DATE_ROW: Row = 3;
pub const NEW_COL: Col = 3;
pub const SCHOOL_COL: Col = 2;
pub const FIRST_SCHOOL_ROW: Row = 4;
pub const LAST_SCHOOL_ROW: Row = 19;
pub const TOTAL_ROW: Row = 20;
pub const LAST_UPDATED: (Row, Col) = (2, 2);

/// `M/D/YYYY` without zero padding, as the sheet's date row uses.
pub const DATE_FMT: &str = "%-m/%-d/%Y";

pub fn today() -> String {
    chrono::Local::now().format(DATE_FMT).to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub date_col: Col,
    pub school_rows: HashMap<String, Row>,
}

impl SheetLayout {
    pub fn row_for(&self, school: &str) -> Option<Row> {
        self.school_rows.get(school).copied()
    }

    /// `=SUM(C4:C19)` for the date column.
    pub fn total_formula(&self) -> String {
        let col = column_letters(self.date_col);
        format!("=SUM({col}{FIRST_SCHOOL_ROW}:{col}{LAST_SCHOOL_ROW})")
    }
}

/// Find (or create) the column for `date` and map school names to rows.
pub async fn resolve_layout(sheet: &dyn Worksheet, date: &str) -> Result<SheetLayout> {
    let (date_col, school_rows) = tokio::try_join!(date_column(sheet, date), school_rows(sheet))?;
    tracing::info!(date_col, schools = school_rows.len(), "sheet layout resolved");
    Ok(SheetLayout {
        date_col,
        school_rows,
    })
}

async fn date_column(sheet: &dyn Worksheet, date: &str) -> Result<Col> {
    let dates = sheet
        .get_values(DATES_RANGE)
        .await
        .context("reading dates row")?;
    if dates.iter().flatten().any(|d| d == date) {
        return Ok(NEW_COL);
    }

    let recent = sheet
        .get_values(RECENT_RANGE)
        .await
        .context("reading most recent date")?;
    let first = recent.first().and_then(|r| r.first()).filter(|s| !s.is_empty());

    if let Some(first) = first {
        if first != date {
            tracing::info!(previous = %first, today = %date, "adding column for today");
            add_new_col(sheet, date, NEW_COL).await?;
        }
    }

    Ok(NEW_COL)
}

async fn add_new_col(sheet: &dyn Worksheet, date: &str, col: Col) -> Result<()> {
    let (row, stamp_col) = LAST_UPDATED;
    let stamp = sheet.update_cell(row, stamp_col, CellValue::Text(date.to_string()));
    let insert = async {
        sheet
            .insert_column(col)
            .await
            .context("inserting date column")?;
        sheet
            .update_cell(DATE_ROW, col, CellValue::Text(date.to_string()))
            .await
            .context("writing date header")
    };

    let (stamped, inserted) = tokio::join!(stamp, insert);
    stamped.context("writing last-updated stamp")?;
    inserted
}

async fn school_rows(sheet: &dyn Worksheet) -> Result<HashMap<String, Row>> {
    let names = sheet
        .get_values(SCHOOLS_RANGE)
        .await
        .context("reading school names")?;

    let mut rows = HashMap::with_capacity(names.len());
    for (row, cells) in (FIRST_SCHOOL_ROW..).zip(names) {
        let Some(name) = cells.into_iter().next().filter(|n| !n.trim().is_empty()) else {
            continue;
        };
        rows.insert(name.trim().to_string(), row);
    }
    Ok(rows)
}
