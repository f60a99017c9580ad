// src/sheet/memory.rs
//! In-process worksheet: a sparse grid plus named ranges. Backs the tests and
//! lets the whole run be exercised without network access to a spreadsheet.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::layout::{
    DATES_RANGE, DATE_ROW, FIRST_SCHOOL_ROW, LAST_SCHOOL_ROW, NEW_COL, RECENT_RANGE, SCHOOLS_RANGE,
    SCHOOL_COL,
};
use super::{CellValue, Col, Row, Worksheet};

/// Rectangle of cells; an open end extends to the last populated cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedRange {
    pub first_row: Row,
    pub first_col: Col,
    pub last_row: Option<Row>,
    pub last_col: Option<Col>,
}

impl NamedRange {
    pub fn cell(row: Row, col: Col) -> Self {
        Self {
            first_row: row,
            first_col: col,
            last_row: Some(row),
            last_col: Some(col),
        }
    }
}

#[derive(Debug, Default)]
struct Grid {
    cells: BTreeMap<(Row, Col), CellValue>,
    ranges: HashMap<String, NamedRange>,
    writes: Vec<(Row, Col, CellValue)>,
    inserts: Vec<Col>,
}

#[derive(Debug, Default)]
pub struct MemoryWorksheet {
    inner: Mutex<Grid>,
}

impl MemoryWorksheet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-data layout: `dates` along row 3 from column C, `recent` at C3,
    /// `schools` down column B from row 4. `dates` is newest first.
    pub fn school_template(schools: &[&str], dates: &[&str]) -> Self {
        let sheet = Self::new();
        sheet.define_range(
            DATES_RANGE,
            NamedRange {
                first_row: DATE_ROW,
                first_col: NEW_COL,
                last_row: Some(DATE_ROW),
                last_col: None,
            },
        );
        sheet.define_range(RECENT_RANGE, NamedRange::cell(DATE_ROW, NEW_COL));
        sheet.define_range(
            SCHOOLS_RANGE,
            NamedRange {
                first_row: FIRST_SCHOOL_ROW,
                first_col: SCHOOL_COL,
                last_row: Some(LAST_SCHOOL_ROW),
                last_col: Some(SCHOOL_COL),
            },
        );
        for (col, date) in (NEW_COL..).zip(dates) {
            sheet.set(DATE_ROW, col, CellValue::Text((*date).to_string()));
        }
        for (row, school) in (FIRST_SCHOOL_ROW..).zip(schools) {
            sheet.set(row, SCHOOL_COL, CellValue::Text((*school).to_string()));
        }
        sheet
    }

    pub fn define_range(&self, name: &str, range: NamedRange) {
        self.lock().ranges.insert(name.to_string(), range);
    }

    /// Seed a cell without recording it as a write.
    pub fn set(&self, row: Row, col: Col, value: CellValue) {
        self.lock().cells.insert((row, col), value);
    }

    pub fn get(&self, row: Row, col: Col) -> Option<CellValue> {
        self.lock().cells.get(&(row, col)).cloned()
    }

    /// Every `update_cell` call, in arrival order.
    pub fn writes(&self) -> Vec<(Row, Col, CellValue)> {
        self.lock().writes.clone()
    }

    pub fn inserted_columns(&self) -> Vec<Col> {
        self.lock().inserts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Grid> {
        // A panicked writer leaves the grid consistent; every mutation is one step.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Grid {
    fn read(&self, range: &NamedRange) -> Vec<Vec<String>> {
        let in_rows = |r: Row| r >= range.first_row && range.last_row.map_or(true, |last| r <= last);
        let in_cols = |c: Col| c >= range.first_col && range.last_col.map_or(true, |last| c <= last);

        let populated = self
            .cells
            .keys()
            .filter(|(r, c)| in_rows(*r) && in_cols(*c));
        let (Some(last_row), Some(last_col)) = (
            populated.clone().map(|(r, _)| *r).max(),
            populated.map(|(_, c)| *c).max(),
        ) else {
            return Vec::new();
        };

        let mut rows: Vec<Vec<String>> = (range.first_row..=last_row)
            .map(|r| {
                let mut row: Vec<String> = (range.first_col..=last_col)
                    .map(|c| {
                        self.cells
                            .get(&(r, c))
                            .map(ToString::to_string)
                            .unwrap_or_default()
                    })
                    .collect();
                while row.last().is_some_and(String::is_empty) {
                    row.pop();
                }
                row
            })
            .collect();
        while rows.last().is_some_and(Vec::is_empty) {
            rows.pop();
        }
        rows
    }
}

#[async_trait]
impl Worksheet for MemoryWorksheet {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let grid = self.lock();
        let named = grid
            .ranges
            .get(range)
            .copied()
            .ok_or_else(|| anyhow!("unknown range {range:?}"))?;
        Ok(grid.read(&named))
    }

    async fn update_cell(&self, row: Row, col: Col, value: CellValue) -> Result<()> {
        let mut grid = self.lock();
        grid.cells.insert((row, col), value.clone());
        grid.writes.push((row, col, value));
        Ok(())
    }

    async fn insert_column(&self, col: Col) -> Result<()> {
        let mut grid = self.lock();
        let cells = std::mem::take(&mut grid.cells);
        grid.cells = cells
            .into_iter()
            .map(|((r, c), v)| if c >= col { ((r, c + 1), v) } else { ((r, c), v) })
            .collect();
        grid.inserts.push(col);
        Ok(())
    }
}
