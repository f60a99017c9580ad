// src/config.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::fetch::transport::DEFAULT_USER_AGENT;
use crate::fetch::{compile_pattern, Source, TransportPolicy, DEFAULT_CASES_PATTERN};
use crate::limiter::RateLimiter;
use crate::sheet::sheets_api::SHEETS_BASE_URL;
use crate::sink::DEFAULT_ABSENT_MARKER;

const ENV_PATH: &str = "SCHOOL_CASES_CONFIG";
const ENV_SHEET_URL: &str = "SHEET_URL";
const ENV_TOKEN_FILE: &str = "TOKEN_FILE";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Bucket size; also the largest burst.
    pub capacity: f64,
    /// Tokens taken per page download.
    pub cost: f64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            rate: 2.0,
            capacity: 4.0,
            cost: 1.75,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub pattern: String,
    pub timeout_secs: u64,
    pub on_transport_error: TransportPolicy,
    pub user_agent: String,
    /// Extra default request headers; may override the user agent.
    pub headers: BTreeMap<String, String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            pattern: DEFAULT_CASES_PATTERN.to_string(),
            timeout_secs: 30,
            on_transport_error: TransportPolicy::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            headers: BTreeMap::new(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Spreadsheet URL; `$SHEET_URL` wins when set.
    pub url: Option<String>,
    pub worksheet: String,
    /// Authorized-user JSON with an access token; `$TOKEN_FILE` wins when set.
    pub token_file: PathBuf,
    pub api_base: String,
    pub absent_marker: String,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            url: None,
            worksheet: "Case Data".to_string(),
            token_file: PathBuf::from("token.json"),
            api_base: SHEETS_BASE_URL.to_string(),
            absent_marker: DEFAULT_ABSENT_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub limiter: LimiterConfig,
    pub fetch: FetchConfig,
    pub sheet: SheetConfig,
    /// School name → page URL.
    pub schools: BTreeMap<String, String>,
}

impl AppConfig {
    pub fn sources(&self) -> Vec<Source> {
        self.schools
            .iter()
            .map(|(name, url)| Source::new(name.clone(), url.clone()))
            .collect()
    }

    /// Rejects settings that would fail later: an empty school list, a fetch
    /// cost the bucket can never admit, a pattern without one capture group.
    pub fn validate(&self) -> Result<()> {
        if self.schools.is_empty() {
            return Err(anyhow!("no schools configured"));
        }
        if let Some((name, _)) = self.schools.iter().find(|(_, url)| url.trim().is_empty()) {
            return Err(anyhow!("school {name:?} has an empty URL"));
        }

        let limiter = RateLimiter::new(self.limiter.rate, self.limiter.capacity)?;
        limiter.check_cost(self.limiter.cost)?;

        compile_pattern(&self.fetch.pattern).context("fetch.pattern")?;
        if self.fetch.timeout_secs == 0 {
            return Err(anyhow!("fetch.timeout_secs must be positive"));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(ENV_SHEET_URL) {
            if !url.trim().is_empty() {
                self.sheet.url = Some(url);
            }
        }
        if let Ok(p) = std::env::var(ENV_TOKEN_FILE) {
            if !p.trim().is_empty() {
                self.sheet.token_file = PathBuf::from(p);
            }
        }
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let mut cfg = parse_config(&content, ext.as_str())
        .with_context(|| format!("parsing config {}", path.display()))?;
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $SCHOOL_CASES_CONFIG
/// 2) config/schools.toml
/// 3) config/schools.json
pub fn load_config_default() -> Result<AppConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/schools.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/schools.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    Err(anyhow!(
        "no config found: set {ENV_PATH} or add config/schools.toml"
    ))
}

fn parse_config(s: &str, hint_ext: &str) -> Result<AppConfig> {
    match hint_ext {
        "json" => Ok(serde_json::from_str(s)?),
        "toml" => Ok(toml::from_str(s)?),
        _ => toml::from_str(s)
            .map_err(anyhow::Error::from)
            .or_else(|_| serde_json::from_str(s).map_err(anyhow::Error::from))
            .map_err(|_| anyhow!("unsupported config format")),
    }
}
