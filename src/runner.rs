// src/runner.rs
//! Wires configuration into one run: limiter, transport, worksheet, layout,
//! sink, pipeline.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::config::AppConfig;
use crate::fetch::{compile_pattern, Fetcher, HttpTransport, Source};
use crate::limiter::RateLimiter;
use crate::pipeline::{Pipeline, RunReport};
use crate::sheet::sheets_api::load_access_token;
use crate::sheet::{resolve_layout, today, DryRun, SheetsClient, Worksheet};
use crate::sink::{SheetSink, WriteSink};

const ENV_ACCESS_TOKEN: &str = "SHEETS_ACCESS_TOKEN";

/// Shared fetcher for every school of a run. Fails on limiter misconfiguration
/// before any request is made.
pub fn build_fetcher(cfg: &AppConfig) -> Result<Arc<Fetcher>> {
    let limiter = Arc::new(RateLimiter::new(cfg.limiter.rate, cfg.limiter.capacity)?);
    let transport = Arc::new(HttpTransport::new(
        &cfg.fetch.user_agent,
        &cfg.fetch.headers,
        cfg.fetch.timeout(),
    )?);
    let pattern = compile_pattern(&cfg.fetch.pattern).context("fetch.pattern")?;
    let fetcher = Fetcher::new(
        transport,
        limiter,
        cfg.limiter.cost,
        pattern,
        cfg.fetch.on_transport_error,
    )?;
    Ok(Arc::new(fetcher))
}

/// Open the configured worksheet; in a dry run, behind a write-skipping wrapper.
pub async fn open_sheet(cfg: &AppConfig, dry_run: bool) -> Result<Arc<dyn Worksheet>> {
    let url = cfg
        .sheet
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("no spreadsheet URL: set SHEET_URL or sheet.url"))?;

    let token = match std::env::var(ENV_ACCESS_TOKEN) {
        Ok(t) if !t.trim().is_empty() => t,
        _ => load_access_token(&cfg.sheet.token_file)?,
    };

    let client = reqwest::Client::builder()
        .timeout(cfg.fetch.timeout())
        .build()
        .context("building sheets client")?;
    let sheet: Arc<dyn Worksheet> = Arc::new(
        SheetsClient::open(client, &cfg.sheet.api_base, url, &cfg.sheet.worksheet, token).await?,
    );

    if dry_run {
        tracing::info!("dry run: sheet writes are disabled");
        return Ok(Arc::new(DryRun::new(sheet)));
    }
    Ok(sheet)
}

/// Resolve today's column and the school rows, then run the pipeline into
/// that column.
pub async fn run_with(
    fetcher: Arc<Fetcher>,
    sources: Vec<Source>,
    sheet: Arc<dyn Worksheet>,
    date: &str,
    absent_marker: &str,
) -> Result<RunReport> {
    let layout = resolve_layout(sheet.as_ref(), date)
        .await
        .context("resolving sheet layout")?;
    let sink: Arc<dyn WriteSink> = Arc::new(SheetSink::new(sheet, layout, absent_marker));

    let report = Pipeline::new(fetcher, sources, sink).run().await?;
    Ok(report)
}

/// Full run from configuration.
pub async fn run(cfg: &AppConfig, dry_run: bool) -> Result<RunReport> {
    let fetcher = build_fetcher(cfg)?;
    let sheet = open_sheet(cfg, dry_run).await?;
    run_with(
        fetcher,
        cfg.sources(),
        sheet,
        &today(),
        &cfg.sheet.absent_marker,
    )
    .await
}
