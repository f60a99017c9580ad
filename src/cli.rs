// src/cli.rs
//! `school-cases [DRY_RUN] [LOG_LEVEL]`
//!
//! `DRY_RUN` is an integer; any non-zero value skips every sheet mutation.
//! `LOG_LEVEL` is a level name or a numeric level where 10 is debug, 20 info,
//! 30 warn and 40 or more error.

use anyhow::{anyhow, bail, Result};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunArgs {
    pub dry_run: bool,
    pub log_level: Option<LevelFilter>,
}

/// Parse positional arguments, program name excluded.
pub fn parse_args<I, S>(args: I) -> Result<RunArgs>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = RunArgs::default();
    let mut args = args.into_iter();

    if let Some(flag) = args.next() {
        let flag = flag.as_ref().trim();
        let n: i64 = flag
            .parse()
            .map_err(|_| anyhow!("dry run flag must be an integer (0 or 1), got {flag:?}"))?;
        out.dry_run = n != 0;
    }
    if let Some(level) = args.next() {
        out.log_level = Some(parse_level(level.as_ref())?);
    }
    if let Some(extra) = args.next() {
        bail!("unexpected argument {:?}", extra.as_ref());
    }
    Ok(out)
}

pub fn parse_level(s: &str) -> Result<LevelFilter> {
    let s = s.trim();
    if let Ok(n) = s.parse::<u32>() {
        return Ok(match n {
            0..=9 => LevelFilter::TRACE,
            10..=19 => LevelFilter::DEBUG,
            20..=29 => LevelFilter::INFO,
            30..=39 => LevelFilter::WARN,
            _ => LevelFilter::ERROR,
        });
    }
    s.parse::<LevelFilter>()
        .map_err(|_| anyhow!("unknown log level {s:?}"))
}
