pub mod context;
pub mod health;
pub mod issues;
pub mod trend;
pub mod types;

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::assessment::{CallAssessment, CallMetadata, Sentiment, Tier};
use health::HealthInputs;
use issues::IssueTracker;
use types::{
    AccountProfile, CallSummary, CategoryCount, IssueStatistics, StatusSnapshot, TrackedIssue,
    TrendPoint, TrendSeries,
};

pub use context::build_context;
pub use issues::{CategoryMatcher, IssueMatcher};

const TOP_CATEGORY_LIMIT: usize = 5;

/// Folds call assessments into account profiles.
///
/// Reconciliation is pure: the caller loads the existing profile, holds the
/// account's lock, and persists the returned profile.
#[derive(Default)]
pub struct ProfileReconciler {
    tracker: IssueTracker,
}

impl ProfileReconciler {
    pub fn new(tracker: IssueTracker) -> Self {
        Self { tracker }
    }

    pub fn reconcile(
        &self,
        existing: Option<AccountProfile>,
        account_id: &str,
        assessment: &CallAssessment,
        metadata: Option<&CallMetadata>,
        now: DateTime<Utc>,
    ) -> AccountProfile {
        let mut profile = existing.unwrap_or_else(|| {
            log::debug!("No profile for account {account_id}, starting a new one");
            AccountProfile::new(account_id, now)
        });

        if let Some(meta) = metadata {
            apply_metadata(&mut profile, meta);
        }

        profile.call_history.insert(0, call_summary(assessment, metadata));
        profile.total_calls = profile.call_history.len();
        profile.last_call_at = Some(assessment.timestamp);

        let active = std::mem::take(&mut profile.active_issues);
        let update = self.tracker.apply(
            account_id,
            &assessment.call_id,
            active,
            &assessment.issues,
            assessment.intent.prompt_resolution,
            now,
        );
        profile.call_history[0].issues_resolved = update.resolved_count();
        profile.active_issues = update.active;
        profile.resolved_issues.extend(update.newly_resolved);

        push_trend_points(&mut profile.trends, assessment);
        profile.current_status = status_snapshot(&profile, assessment);
        profile.issue_stats = issue_statistics(&profile.active_issues, &profile.resolved_issues);
        profile.updated_at = now.max(profile.created_at);

        profile
    }
}

fn apply_metadata(profile: &mut AccountProfile, meta: &CallMetadata) {
    if meta.customer_type.is_some() {
        profile.customer_type = meta.customer_type.clone();
    }
    if meta.city.is_some() {
        profile.city = meta.city.clone();
    }
    if meta.vertical.is_some() {
        profile.vertical = meta.vertical.clone();
    }
    if meta.vintage_months.is_some() {
        profile.vintage_months = meta.vintage_months;
    }
    if !meta.product_categories.is_empty() {
        profile.product_categories = meta.product_categories.clone();
    }
}

fn call_summary(assessment: &CallAssessment, metadata: Option<&CallMetadata>) -> CallSummary {
    CallSummary {
        call_id: assessment.call_id.clone(),
        timestamp: assessment.timestamp,
        duration_seconds: metadata.and_then(|m| m.duration_seconds),
        direction: metadata.and_then(|m| m.direction.clone()),
        summary: assessment.call_summary.clone(),
        sentiment: assessment.intent.sentiment,
        issues_raised: assessment.issues.len(),
        issues_resolved: 0,
        agent_performance: assessment.agent_performance.clone(),
        was_escalated: assessment.escalation_required,
        follow_up_needed: assessment.follow_up_needed,
    }
}

fn sentiment_value(s: Option<Sentiment>) -> f64 {
    match s {
        Some(Sentiment::Positive) => 1.0,
        Some(Sentiment::Neutral) => 0.5,
        _ => 0.0,
    }
}

fn churn_value(t: Option<Tier>) -> f64 {
    match t {
        Some(Tier::High) => 1.0,
        Some(Tier::Medium) => 0.5,
        _ => 0.0,
    }
}

fn push_trend_points(trends: &mut TrendSeries, a: &CallAssessment) {
    let date = a.timestamp.format("%Y-%m-%d").to_string();
    let point = |value: f64, label: Option<String>| TrendPoint {
        date: date.clone(),
        value,
        label,
        call_id: Some(a.call_id.clone()),
    };

    trends.sentiment_history.push(point(
        sentiment_value(a.intent.sentiment),
        a.intent.sentiment.map(|s| s.as_str().to_string()),
    ));
    trends
        .satisfaction_history
        .push(point(f64::from(a.intent.satisfaction_score), None));
    trends
        .issue_history
        .push(point(a.issues.len() as f64, None));
    trends.churn_risk_history.push(point(
        churn_value(a.churn.risk),
        a.churn.risk.map(|t| t.as_str().to_string()),
    ));

    trends.sentiment_trend = trend::direction(&trends.sentiment_history);
    trends.satisfaction_trend = trend::direction(&trends.satisfaction_history);
    trends.overall_trend = trend::overall(
        trend::direction(&trends.issue_history),
        trends.sentiment_trend,
    );
}

fn status_snapshot(profile: &AccountProfile, a: &CallAssessment) -> StatusSnapshot {
    let recurring = profile.recurring_active_count();
    let health = health::score(&HealthInputs {
        sentiment: a.intent.sentiment,
        satisfaction_score: a.intent.satisfaction_score,
        churn_risk: a.churn.risk,
        open_issues: profile.active_issues.len(),
        recurring_issues: recurring,
        overall_trend: profile.trends.overall_trend,
    });

    let upsell_potential = if a.upsell.has_opportunity {
        a.upsell.willingness.unwrap_or(Tier::Low)
    } else {
        Tier::Low
    };

    StatusSnapshot {
        sentiment: a.intent.sentiment,
        satisfaction_score: a.intent.satisfaction_score,
        churn_risk: a.churn.risk,
        churn_probability: a.churn.probability,
        open_issue_count: profile.active_issues.len(),
        upsell_potential,
        health_score: health.score,
        health_label: health.label,
        needs_attention: health.needs_attention(),
        attention_reason: health.attention,
    }
}

fn issue_statistics(active: &[TrackedIssue], resolved: &[TrackedIssue]) -> IssueStatistics {
    let resolution_days: Vec<f64> = resolved
        .iter()
        .filter_map(|i| {
            i.resolved_at
                .map(|r| (r - i.first_reported_at).num_seconds() as f64 / 86_400.0)
        })
        .collect();
    let avg_resolution_days = if resolution_days.is_empty() {
        0.0
    } else {
        resolution_days.iter().sum::<f64>() / resolution_days.len() as f64
    };

    let mut mentions: HashMap<&str, u32> = HashMap::new();
    for issue in active.iter().chain(resolved) {
        *mentions.entry(issue.category.as_str()).or_default() += issue.mention_count;
    }
    let mut top_categories: Vec<CategoryCount> = mentions
        .into_iter()
        .map(|(category, count)| CategoryCount {
            category: category.to_string(),
            count,
        })
        .collect();
    top_categories.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    top_categories.truncate(TOP_CATEGORY_LIMIT);

    let mut severity_breakdown = BTreeMap::new();
    for issue in active {
        *severity_breakdown.entry(issue.severity).or_insert(0) += 1;
    }

    IssueStatistics {
        total_issues_ever: active.len() + resolved.len(),
        current_open_count: active.len(),
        resolved_count: resolved.len(),
        recurring_count: active.iter().filter(|i| i.is_recurring).count(),
        avg_resolution_days,
        top_categories,
        severity_breakdown,
    }
}
