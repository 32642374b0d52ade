use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::storage::repository;
use crate::storage::Database;

pub const DEFAULT_PROVIDER: &str = "bedrock";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_AGGREGATION_THRESHOLD: usize = 10;
pub const DEFAULT_AGGREGATION_INTERVAL_SECS: u64 = 24 * 60 * 60;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Keys accepted by `config set`.
pub const KNOWN_KEYS: &[&str] = &[
    "llm_provider",
    "llm_model",
    "aggregation_threshold",
    "aggregation_interval_secs",
    "poll_interval_secs",
    "fallback_dir",
];

/// Runtime settings, stored in the `app_config` table.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub llm_provider: String,
    pub llm_model: String,
    /// Processed calls between threshold-triggered aggregations.
    pub aggregation_threshold: usize,
    pub aggregation_interval_secs: u64,
    pub poll_interval_secs: u64,
    /// Directory for the file store used when the database is unavailable.
    pub fallback_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_provider: DEFAULT_PROVIDER.to_string(),
            llm_model: DEFAULT_MODEL.to_string(),
            aggregation_threshold: DEFAULT_AGGREGATION_THRESHOLD,
            aggregation_interval_secs: DEFAULT_AGGREGATION_INTERVAL_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            fallback_dir: None,
        }
    }
}

fn parse_positive<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr + PartialEq + Default,
{
    match value.trim().parse::<T>() {
        Ok(v) if v != T::default() => Ok(v),
        _ => Err(Error::Config(format!(
            "{key} must be a positive integer, got '{value}'"
        ))),
    }
}

/// Check a key/value pair before it is written.
pub fn validate(key: &str, value: &str) -> Result<()> {
    match key {
        "llm_provider" => match value {
            "bedrock" | "anthropic" => Ok(()),
            other => Err(Error::Config(format!(
                "unknown llm_provider: {other} (expected bedrock or anthropic)"
            ))),
        },
        "aggregation_threshold" => parse_positive::<usize>(key, value).map(|_| ()),
        "aggregation_interval_secs" | "poll_interval_secs" => {
            parse_positive::<u64>(key, value).map(|_| ())
        }
        "llm_model" | "fallback_dir" if value.trim().is_empty() => {
            Err(Error::Config(format!("{key} cannot be empty")))
        }
        "llm_model" | "fallback_dir" => Ok(()),
        other => Err(Error::Config(format!(
            "unknown config key: {other} (known: {})",
            KNOWN_KEYS.join(", ")
        ))),
    }
}

impl Settings {
    /// Build settings from stored key/value pairs, defaulting what is absent.
    pub fn from_pairs(pairs: &BTreeMap<String, String>) -> Result<Self> {
        let mut settings = Settings::default();
        for (key, value) in pairs {
            match key.as_str() {
                "llm_provider" => settings.llm_provider = value.clone(),
                "llm_model" => settings.llm_model = value.clone(),
                "aggregation_threshold" => {
                    settings.aggregation_threshold = parse_positive(key, value)?
                }
                "aggregation_interval_secs" => {
                    settings.aggregation_interval_secs = parse_positive(key, value)?
                }
                "poll_interval_secs" => settings.poll_interval_secs = parse_positive(key, value)?,
                "fallback_dir" => settings.fallback_dir = Some(PathBuf::from(value)),
                other => log::debug!("Ignoring unknown config key {other}"),
            }
        }
        Ok(settings)
    }

    pub async fn load(db: &Database) -> Result<Self> {
        let pairs = list(db).await?;
        Self::from_pairs(&pairs)
    }
}

pub async fn get(db: &Database, key: &str) -> Result<Option<String>> {
    let key = key.to_string();
    let value = db
        .reader()
        .call(move |conn| repository::get_config(conn, &key))
        .await?;
    Ok(value)
}

pub async fn set(db: &Database, key: &str, value: &str) -> Result<()> {
    validate(key, value)?;
    let (key, value) = (key.to_string(), value.trim().to_string());
    db.writer()
        .call(move |conn| repository::set_config(conn, &key, &value))
        .await?;
    Ok(())
}

pub async fn list(db: &Database) -> Result<BTreeMap<String, String>> {
    let pairs = db.reader().call(|conn| repository::list_config(conn)).await?;
    Ok(pairs.into_iter().collect())
}
