use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issue severity, ordered low < medium < high < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

impl Sentiment {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "Positive",
            Sentiment::Neutral => "Neutral",
            Sentiment::Negative => "Negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Three-level tier used for churn risk, willingness to invest and upsell potential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    Medium,
    High,
}

impl Tier {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "low" => Some(Tier::Low),
            "medium" => Some(Tier::Medium),
            "high" => Some(Tier::High),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One problem reported during a single call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedIssue {
    pub problem: String,
    pub category: String,
    pub severity: Severity,
    pub action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub sentiment: Option<Sentiment>,
    /// 1-10; 0 means the score was not reported.
    pub satisfaction_score: i32,
    pub prompt_resolution: bool,
    pub overall_experience: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChurnOutlook {
    pub risk: Option<Tier>,
    pub renewal_at_risk: bool,
    pub dissatisfaction: Option<Tier>,
    /// 0.0 - 1.0
    pub probability: f64,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpsellOutlook {
    pub has_opportunity: bool,
    /// 1-10
    pub score: i32,
    pub willingness: Option<Tier>,
    pub growth_oriented: bool,
    pub interested_features: Vec<String>,
    pub reason: Option<String>,
}

/// Structured assessment of one call, as produced by the assessment collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallAssessment {
    pub call_id: String,
    pub account_id: String,
    pub timestamp: DateTime<Utc>,
    pub transcript_en: String,
    pub original_language: Option<String>,
    pub issues: Vec<ReportedIssue>,
    pub intent: Intent,
    pub churn: ChurnOutlook,
    pub upsell: UpsellOutlook,
    pub call_summary: String,
    pub agent_performance: Option<String>,
    #[serde(default)]
    pub key_insights: Vec<String>,
    #[serde(default)]
    pub follow_up_needed: bool,
    #[serde(default)]
    pub escalation_required: bool,
    /// Raw collaborator output, kept when it could not be parsed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl CallAssessment {
    /// Minimal assessment used when the transcript or the collaborator's
    /// response could not be turned into a structured result.
    pub fn degraded(
        call_id: &str,
        account_id: &str,
        timestamp: DateTime<Utc>,
        transcript: &str,
        raw_response: Option<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.to_string(),
            account_id: account_id.to_string(),
            timestamp,
            transcript_en: transcript.to_string(),
            original_language: None,
            issues: Vec::new(),
            intent: Intent::default(),
            churn: ChurnOutlook::default(),
            upsell: UpsellOutlook::default(),
            call_summary: String::new(),
            agent_performance: None,
            key_insights: Vec::new(),
            follow_up_needed: false,
            escalation_required: false,
            raw_response,
            parse_error: Some(reason.into()),
            analyzed_at: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.parse_error.is_some()
    }
}

/// Descriptive data about the call and account, supplied alongside the transcript.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallMetadata {
    pub customer_type: Option<String>,
    pub city: Option<String>,
    pub vertical: Option<String>,
    pub vintage_months: Option<u32>,
    #[serde(default)]
    pub product_categories: Vec<String>,
    pub duration_seconds: Option<u32>,
    /// "Incoming" / "Outgoing"
    pub direction: Option<String>,
}
