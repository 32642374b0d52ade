use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assessment::Severity;

/// How often one problem text was reported within a category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProblemCount {
    pub problem: String,
    pub count: usize,
    /// Highest severity the problem was reported with.
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySummary {
    pub category: String,
    /// Sum of the retained top problems' counts.
    pub total_count: usize,
    pub affected_accounts: usize,
    /// Sorted.
    pub affected_account_ids: Vec<String>,
    pub top_problems: Vec<ProblemCount>,
    pub severity_breakdown: BTreeMap<Severity, usize>,
    /// Up to three action texts, in the order they were seen.
    pub examples: Vec<String>,
}

/// Rollup of every call assessment in one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSummary {
    pub period_key: String,
    pub total_calls: usize,
    pub total_issues: usize,
    pub categories: BTreeMap<String, CategorySummary>,
    pub sentiment_breakdown: BTreeMap<String, usize>,
    pub churn_risk_breakdown: BTreeMap<String, usize>,
    pub upsell_opportunities: usize,
    /// Average over calls that reported a satisfaction score.
    pub avg_satisfaction: f64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "in_progress",
            TicketStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub ticket_id: String,
    pub period_key: String,
    pub category: String,
    /// 1 is highest.
    pub priority: u32,
    pub title: String,
    /// Markdown body.
    pub description: String,
    pub top_problems: Vec<ProblemCount>,
    pub issue_count: usize,
    pub affected_accounts: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affected_account_ids: Option<Vec<String>>,
    #[serde(default)]
    pub examples: Vec<String>,
    pub severity: Severity,
    /// Reported by more than one account in the period.
    pub is_recurring: bool,
    pub status: TicketStatus,
    pub created_at: DateTime<Utc>,
}
