//! CD1.1 time stamps: 20 byte text fields of the form `yyyyddd hh:mm:ss.mmm`, with `ddd` the day
//!  of the year, always UTC.

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};

pub const TIMESTAMP_LEN: usize = 20;

const TIMESTAMP_FORMAT: &str = "%Y%j %H:%M:%S%.3f";

pub fn parse_cd11_time(s: &str) -> anyhow::Result<DateTime<Utc>> {
    let trimmed = s.trim_matches(|c| c == '\0' || c == ' ');
    let parsed = NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT)
        .with_context(|| format!("invalid CD1.1 time stamp '{}'", s))?;
    Ok(parsed.and_utc())
}

pub fn format_cd11_time(time: DateTime<Utc>) -> String {
    time.format(TIMESTAMP_FORMAT).to_string()
}
