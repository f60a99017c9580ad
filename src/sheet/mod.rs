// src/sheet/mod.rs
pub mod dry_run;
pub mod layout;
pub mod memory;
pub mod sheets_api;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;

pub use dry_run::DryRun;
pub use layout::{resolve_layout, today, SheetLayout};
pub use memory::{MemoryWorksheet, NamedRange};
pub use sheets_api::SheetsClient;

/// 1-based row index.
pub type Row = u32;
/// 1-based column index.
pub type Col = u32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Number(u64),
    Text(String),
    /// Entered as-is, e.g. `=SUM(C4:C19)`.
    Formula(String),
}

impl CellValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            CellValue::Number(n) => serde_json::Value::from(*n),
            CellValue::Text(s) | CellValue::Formula(s) => serde_json::Value::from(s.as_str()),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Text(s) | CellValue::Formula(s) => f.write_str(s),
        }
    }
}

/// The worksheet operations the runner needs. Reads use named ranges or A1
/// notation; writes address single cells.
#[async_trait]
pub trait Worksheet: Send + Sync {
    /// Rows of displayed values, trailing empty cells and rows trimmed.
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>>;

    async fn update_cell(&self, row: Row, col: Col, value: CellValue) -> Result<()>;

    /// Insert one blank column so that it becomes column `col`.
    async fn insert_column(&self, col: Col) -> Result<()>;
}

/// Column letters for a 1-based index: 1 → `A`, 27 → `AA`.
pub fn column_letters(col: Col) -> String {
    let mut n = col;
    let mut out = Vec::new();
    while n > 0 {
        let rem = ((n - 1) % 26) as u8;
        out.push(b'A' + rem);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

pub fn cell_a1(row: Row, col: Col) -> String {
    format!("{}{}", column_letters(col), row)
}
