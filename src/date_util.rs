use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;

use crate::error::{Error, Result};

static RE_NON_ALNUM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}]").unwrap());

const PERIOD_KEY_FORMAT: &str = "%Y-%m-%d";

/// Period key ("YYYY-MM-DD", UTC calendar date) that a call at `ts` belongs to.
pub fn period_key_for(ts: DateTime<Utc>) -> String {
    ts.format(PERIOD_KEY_FORMAT).to_string()
}

/// Period key for the current UTC date.
pub fn today_key() -> String {
    period_key_for(Utc::now())
}

/// Validate a user-supplied period key and return it in canonical form.
pub fn parse_period_key(s: &str) -> Result<String> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("today") {
        return Ok(today_key());
    }
    NaiveDate::parse_from_str(s, PERIOD_KEY_FORMAT)
        .map(|d| d.format(PERIOD_KEY_FORMAT).to_string())
        .map_err(|_| Error::PeriodParse(format!("expected YYYY-MM-DD, got: {s}")))
}

/// Replace every character that is not a letter or digit with `_`.
pub fn sanitize_key(s: &str) -> String {
    RE_NON_ALNUM.replace_all(s, "_").into_owned()
}

/// Truncate to at most `max` characters, ending in "..." when shortened.
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let keep = max.saturating_sub(3);
    let mut out: String = s.chars().take(keep).collect();
    out.push_str("...");
    out
}

/// Strip markdown code fences from LLM responses.
pub fn strip_code_fences(s: &str) -> &str {
    let s = s.trim();
    if let Some(rest) = s.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = s.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        s
    }
}
