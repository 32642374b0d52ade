use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::{Sentiment, Severity, Tier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Open,
    Resolved,
}

/// An issue tracked across calls for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedIssue {
    pub issue_id: String,
    pub problem: String,
    pub category: String,
    pub severity: Severity,
    pub action_required: String,
    pub status: IssueStatus,
    pub first_reported_at: DateTime<Utc>,
    pub last_mentioned_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub mention_count: u32,
    pub call_ids: Vec<String>,
    pub is_recurring: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Stable,
    Declining,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Improving => "improving",
            TrendDirection::Stable => "stable",
            TrendDirection::Declining => "declining",
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthLabel {
    #[serde(rename = "healthy")]
    Healthy,
    #[serde(rename = "at risk")]
    AtRisk,
    #[serde(rename = "critical")]
    Critical,
}

impl HealthLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthLabel::Healthy => "healthy",
            HealthLabel::AtRisk => "at risk",
            HealthLabel::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current standing of an account, recomputed after every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub sentiment: Option<Sentiment>,
    pub satisfaction_score: i32,
    pub churn_risk: Option<Tier>,
    pub churn_probability: f64,
    pub open_issue_count: usize,
    pub upsell_potential: Tier,
    pub health_score: u8,
    pub health_label: HealthLabel,
    pub needs_attention: bool,
    pub attention_reason: Option<String>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            sentiment: None,
            satisfaction_score: 0,
            churn_risk: None,
            churn_probability: 0.0,
            open_issue_count: 0,
            upsell_potential: Tier::Low,
            health_score: 50,
            health_label: HealthLabel::AtRisk,
            needs_attention: false,
            attention_reason: None,
        }
    }
}

/// Compact record of one call, for timeline display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSummary {
    pub call_id: String,
    pub timestamp: DateTime<Utc>,
    pub duration_seconds: Option<u32>,
    pub direction: Option<String>,
    pub summary: String,
    pub sentiment: Option<Sentiment>,
    pub issues_raised: usize,
    pub issues_resolved: usize,
    pub agent_performance: Option<String>,
    pub was_escalated: bool,
    pub follow_up_needed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSeries {
    pub sentiment_history: Vec<TrendPoint>,
    pub satisfaction_history: Vec<TrendPoint>,
    pub issue_history: Vec<TrendPoint>,
    pub churn_risk_history: Vec<TrendPoint>,
    pub sentiment_trend: TrendDirection,
    pub satisfaction_trend: TrendDirection,
    pub overall_trend: TrendDirection,
}

impl Default for TrendSeries {
    fn default() -> Self {
        Self {
            sentiment_history: Vec::new(),
            satisfaction_history: Vec::new(),
            issue_history: Vec::new(),
            churn_risk_history: Vec::new(),
            sentiment_trend: TrendDirection::Stable,
            satisfaction_trend: TrendDirection::Stable,
            overall_trend: TrendDirection::Stable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueStatistics {
    pub total_issues_ever: usize,
    pub current_open_count: usize,
    pub resolved_count: usize,
    /// Recurring issues among the active set.
    pub recurring_count: usize,
    pub avg_resolution_days: f64,
    pub top_categories: Vec<CategoryCount>,
    /// Active issues only.
    pub severity_breakdown: BTreeMap<Severity, usize>,
}

/// Long-lived health record for one account. One per account, upserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountProfile {
    pub account_id: String,
    pub customer_type: Option<String>,
    pub city: Option<String>,
    pub vertical: Option<String>,
    pub vintage_months: Option<u32>,
    #[serde(default)]
    pub product_categories: Vec<String>,

    pub current_status: StatusSnapshot,

    pub total_calls: usize,
    /// Most recent first.
    pub call_history: Vec<CallSummary>,

    pub active_issues: Vec<TrackedIssue>,
    pub resolved_issues: Vec<TrackedIssue>,
    pub issue_stats: IssueStatistics,

    pub trends: TrendSeries,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `None` until the first call has been reconciled.
    pub last_call_at: Option<DateTime<Utc>>,
}

impl AccountProfile {
    /// Empty profile for an account with no history.
    pub fn new(account_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            customer_type: None,
            city: None,
            vertical: None,
            vintage_months: None,
            product_categories: Vec::new(),
            current_status: StatusSnapshot::default(),
            total_calls: 0,
            call_history: Vec::new(),
            active_issues: Vec::new(),
            resolved_issues: Vec::new(),
            issue_stats: IssueStatistics::default(),
            trends: TrendSeries::default(),
            created_at: now,
            updated_at: now,
            last_call_at: None,
        }
    }

    pub fn has_history(&self) -> bool {
        self.total_calls > 0
    }

    /// The `n` most recent calls.
    pub fn recent_calls(&self, n: usize) -> &[CallSummary] {
        &self.call_history[..n.min(self.call_history.len())]
    }

    pub fn recurring_active_count(&self) -> usize {
        self.active_issues.iter().filter(|i| i.is_recurring).count()
    }
}
