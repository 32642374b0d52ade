use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::assessment::CallMetadata;
use crate::error::{Error, Result};

/// One call transcript ready for assessment.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub call_id: String,
    pub account_id: String,
    /// When the call happened; `None` if the source did not say.
    pub timestamp: Option<DateTime<Utc>>,
    pub language: Option<String>,
    pub text: String,
    pub metadata: CallMetadata,
}

impl Transcript {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Parse either the native layout or the call-center export layout.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawTranscript = serde_json::from_str(json)?;
        raw.try_into()
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| Error::InvalidInput(format!("{}: {e}", path.display())))
    }
}

#[derive(Debug, Deserialize)]
struct RawCategory {
    #[serde(default, alias = "mcat_name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawTranscript {
    #[serde(alias = "click_to_call_id", deserialize_with = "id_string")]
    call_id: String,
    #[serde(alias = "seller_id", alias = "gluser_id", deserialize_with = "id_string")]
    account_id: String,
    #[serde(default, alias = "call_entered_on")]
    timestamp: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default, alias = "transcript_text")]
    transcript: String,
    #[serde(default)]
    duration_ms: Option<u64>,
    #[serde(default, alias = "call_duration")]
    duration_seconds: Option<u32>,
    #[serde(default, alias = "flag_in_out")]
    direction: Option<String>,
    #[serde(default)]
    customer_type: Option<String>,
    #[serde(default, alias = "city_name")]
    city: Option<String>,
    #[serde(default, alias = "iil_vertical_name")]
    vertical: Option<String>,
    #[serde(default, alias = "vintage")]
    vintage_months: Option<u32>,
    #[serde(default)]
    seller_categories: Vec<RawCategory>,
    #[serde(default)]
    product_categories: Vec<String>,
}

/// Ids arrive as strings in some exports and as numbers in others.
fn id_string<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<String, D::Error> {
    match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%d-%m-%Y %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

impl TryFrom<RawTranscript> for Transcript {
    type Error = Error;

    fn try_from(raw: RawTranscript) -> Result<Self> {
        let call_id = raw.call_id.trim().to_string();
        let account_id = raw.account_id.trim().to_string();
        if call_id.is_empty() {
            return Err(Error::InvalidInput("transcript has no call id".into()));
        }
        if account_id.is_empty() {
            return Err(Error::InvalidInput(format!("call {call_id} has no account id")));
        }

        let timestamp = match raw.timestamp.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => {
                let parsed = parse_timestamp(s);
                if parsed.is_none() {
                    log::debug!("Unrecognized timestamp '{s}' on call {call_id}");
                }
                parsed
            }
        };

        let mut product_categories = raw.product_categories;
        product_categories.extend(
            raw.seller_categories
                .into_iter()
                .map(|c| c.name)
                .filter(|n| !n.trim().is_empty()),
        );

        let duration_seconds = raw
            .duration_seconds
            .or_else(|| raw.duration_ms.map(|ms| u32::try_from(ms / 1000).unwrap_or(u32::MAX)));

        Ok(Transcript {
            call_id,
            account_id,
            timestamp,
            language: non_empty(raw.language),
            // Exports carry escaped newlines.
            text: raw.transcript.replace("\\n", "\n"),
            metadata: CallMetadata {
                customer_type: non_empty(raw.customer_type),
                city: non_empty(raw.city),
                vertical: non_empty(raw.vertical),
                vintage_months: raw.vintage_months,
                product_categories,
                duration_seconds,
                direction: non_empty(raw.direction),
            },
        })
    }
}

/// `*.json` files directly under `dir`, sorted by name.
pub fn transcript_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_native_layout() {
        let t = Transcript::from_json(
            r#"{
                "call_id": "c-1",
                "account_id": "acct-9",
                "timestamp": "2025-03-01T10:15:00Z",
                "language": "en",
                "transcript_text": "Hello, my leads stopped.",
                "duration_ms": 95000,
                "customer_type": "Premium",
                "vintage": 12
            }"#,
        )
        .unwrap();
        assert_eq!(t.call_id, "c-1");
        assert_eq!(t.account_id, "acct-9");
        assert_eq!(t.timestamp, Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 15, 0).unwrap()));
        assert_eq!(t.metadata.duration_seconds, Some(95));
        assert_eq!(t.metadata.vintage_months, Some(12));
        assert_eq!(t.metadata.customer_type.as_deref(), Some("Premium"));
        assert!(!t.is_empty());
    }

    #[test]
    fn test_export_layout() {
        let t = Transcript::from_json(
            r#"{
                "click_to_call_id": 778812,
                "gluser_id": "100195284",
                "transcript": "Agent: Namaste\\nSeller: payment not received",
                "call_duration": 240,
                "flag_in_out": "Incoming",
                "customer_type": "",
                "city_name": "Surat",
                "iil_vertical_name": "Textiles",
                "vintage_months": 30,
                "call_entered_on": "2025-03-02 09:00:00",
                "seller_categories": [{"mcat_id": "1", "mcat_name": "Sarees"}, {"mcat_name": ""}]
            }"#,
        )
        .unwrap();
        assert_eq!(t.call_id, "778812");
        assert_eq!(t.account_id, "100195284");
        assert_eq!(t.text, "Agent: Namaste\nSeller: payment not received");
        assert_eq!(t.metadata.duration_seconds, Some(240));
        assert_eq!(t.metadata.direction.as_deref(), Some("Incoming"));
        assert_eq!(t.metadata.customer_type, None);
        assert_eq!(t.metadata.city.as_deref(), Some("Surat"));
        assert_eq!(t.metadata.product_categories, vec!["Sarees"]);
        assert_eq!(t.timestamp, Some(Utc.with_ymd_and_hms(2025, 3, 2, 9, 0, 0).unwrap()));
    }

    #[test]
    fn test_missing_ids_rejected() {
        assert!(Transcript::from_json(r#"{"call_id": "c", "transcript": "x"}"#).is_err());
        let err = Transcript::from_json(r#"{"call_id": " ", "account_id": "a"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_empty_transcript_detected() {
        let t = Transcript::from_json(r#"{"call_id": "c", "account_id": "a", "transcript": "  "}"#)
            .unwrap();
        assert!(t.is_empty());
        assert_eq!(t.timestamp, None);
    }

    #[test]
    fn test_transcript_files_sorted_json_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.json"), "{}").unwrap();
        std::fs::write(dir.path().join("a.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();
        let files = transcript_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }
}
