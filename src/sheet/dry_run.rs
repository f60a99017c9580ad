// src/sheet/dry_run.rs
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::{cell_a1, CellValue, Col, Row, Worksheet};

/// Reads go to the real worksheet; every mutation is logged and skipped.
pub struct DryRun {
    inner: Arc<dyn Worksheet>,
}

impl DryRun {
    pub fn new(inner: Arc<dyn Worksheet>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Worksheet for DryRun {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        self.inner.get_values(range).await
    }

    async fn update_cell(&self, row: Row, col: Col, value: CellValue) -> Result<()> {
        tracing::info!(cell = %cell_a1(row, col), value = %value, "dry run: skipping cell update");
        Ok(())
    }

    async fn insert_column(&self, col: Col) -> Result<()> {
        tracing::info!(col, "dry run: skipping column insert");
        Ok(())
    }
}
