// src/sheet/sheets_api.rs
//! Google Sheets v4 REST client for one worksheet. Authentication is a
//! pre-issued bearer token; obtaining or refreshing it happens elsewhere.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;

use super::{cell_a1, CellValue, Col, Row, Worksheet};

pub const SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    #[serde(rename = "sheetId")]
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct TokenFile {
    token: Option<String>,
    access_token: Option<String>,
}

/// Spreadsheet id from a `.../spreadsheets/d/<id>/...` URL.
pub fn spreadsheet_id_from_url(url: &str) -> Result<String> {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"/spreadsheets/d/([a-zA-Z0-9_-]+)").expect("spreadsheet id pattern compiles")
    });
    re.captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| anyhow!("no spreadsheet id in {url}"))
}

/// Access token from an authorized-user JSON file (`token` or `access_token`).
pub fn load_access_token(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading token file {}", path.display()))?;
    let file: TokenFile = serde_json::from_str(&content)
        .with_context(|| format!("parsing token file {}", path.display()))?;
    file.token
        .or(file.access_token)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| anyhow!("token file {} has no access token", path.display()))
}

pub struct SheetsClient {
    client: Client,
    base: Url,
    spreadsheet_id: String,
    title: String,
    sheet_id: i64,
    token: String,
}

impl SheetsClient {
    /// Open the worksheet titled `title` in the spreadsheet at `sheet_url`.
    pub async fn open(
        client: Client,
        base: &str,
        sheet_url: &str,
        title: &str,
        token: String,
    ) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("invalid api base {base}"))?;
        let spreadsheet_id = spreadsheet_id_from_url(sheet_url)?;

        let mut url = endpoint(&base, &["v4", "spreadsheets", &spreadsheet_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties(sheetId,title)");
        let meta: SpreadsheetMeta = client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .context("sheets metadata get()")?
            .error_for_status()
            .context("sheets metadata non-2xx")?
            .json()
            .await
            .context("parsing sheets metadata")?;

        let sheet_id = meta
            .sheets
            .into_iter()
            .find(|s| s.properties.title == title)
            .map(|s| s.properties.sheet_id)
            .ok_or_else(|| anyhow!("worksheet {title:?} not found"))?;

        tracing::info!(spreadsheet = %spreadsheet_id, worksheet = %title, sheet_id, "opened worksheet");
        Ok(Self {
            client,
            base,
            spreadsheet_id,
            title: title.to_string(),
            sheet_id,
            token,
        })
    }

    fn values_url(&self, range: &str) -> Result<Url> {
        endpoint(
            &self.base,
            &["v4", "spreadsheets", &self.spreadsheet_id, "values", range],
        )
    }

    /// `'Case Data'!C4`
    fn qualified(&self, a1: &str) -> String {
        format!("'{}'!{a1}", self.title.replace('\'', "''"))
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("api base {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn cell_text(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Worksheet for SheetsClient {
    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(range)?;
        let body: ValueRange = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("sheets values get({range})"))?
            .error_for_status()
            .with_context(|| format!("sheets values get({range}) non-2xx"))?
            .json()
            .await
            .context("parsing value range")?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn update_cell(&self, row: Row, col: Col, value: CellValue) -> Result<()> {
        let range = self.qualified(&cell_a1(row, col));
        let mut url = self.values_url(&range)?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");

        self.client
            .put(url)
            .bearer_auth(&self.token)
            .json(&json!({ "range": range, "majorDimension": "ROWS", "values": [[value.to_json()]] }))
            .send()
            .await
            .with_context(|| format!("sheets update({range})"))?
            .error_for_status()
            .with_context(|| format!("sheets update({range}) non-2xx"))?;
        Ok(())
    }

    async fn insert_column(&self, col: Col) -> Result<()> {
        let target = format!("{}:batchUpdate", self.spreadsheet_id);
        let url = endpoint(&self.base, &["v4", "spreadsheets", &target])?;
        let start = col.saturating_sub(1);
        let body = json!({
            "requests": [{
                "insertDimension": {
                    "range": {
                        "sheetId": self.sheet_id,
                        "dimension": "COLUMNS",
                        "startIndex": start,
                        "endIndex": start + 1,
                    },
                    "inheritFromBefore": false,
                }
            }]
        });

        self.client
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("sheets insert column")?
            .error_for_status()
            .context("sheets insert column non-2xx")?;
        Ok(())
    }
}
