use super::types::{AccountProfile, TrendDirection};

const MAX_ISSUES: usize = 5;
const MAX_CALLS: usize = 3;

/// Prior-account context handed to the assessor with the next transcript.
///
/// Empty for accounts with no reconciled calls.
pub fn build_context(profile: &AccountProfile) -> String {
    if !profile.has_history() {
        return String::new();
    }

    let status = &profile.current_status;
    let mut parts = Vec::new();
    parts.push(format!(
        "=== ACCOUNT PROFILE (previous {} calls) ===",
        profile.total_calls
    ));
    parts.push(format!(
        "Health score: {}% ({})",
        status.health_score, status.health_label
    ));
    parts.push(format!(
        "Churn risk: {}",
        status.churn_risk.map(|t| t.as_str()).unwrap_or("unknown")
    ));
    parts.push(format!("Overall trend: {}", profile.trends.overall_trend));

    if !profile.active_issues.is_empty() {
        parts.push(format!("\nActive issues ({}):", profile.active_issues.len()));
        for issue in profile.active_issues.iter().take(MAX_ISSUES) {
            let recurring = if issue.is_recurring { " [RECURRING]" } else { "" };
            parts.push(format!(
                "  - [{}] {}{recurring} (mentioned {} times)",
                issue.category, issue.problem, issue.mention_count
            ));
        }
        if profile.active_issues.len() > MAX_ISSUES {
            parts.push(format!(
                "  ... and {} more",
                profile.active_issues.len() - MAX_ISSUES
            ));
        }
    }

    let recent = profile.recent_calls(MAX_CALLS);
    if !recent.is_empty() {
        parts.push("\nRecent calls:".to_string());
        for call in recent {
            parts.push(format!(
                "  - {}: {} (sentiment: {}, issues: {})",
                call.timestamp.format("%Y-%m-%d"),
                call.summary,
                call.sentiment.map(|s| s.as_str()).unwrap_or("unknown"),
                call.issues_raised
            ));
        }
    }

    if profile.trends.sentiment_trend != TrendDirection::Stable {
        parts.push(format!(
            "\nWARNING: sentiment is {} over recent calls",
            profile.trends.sentiment_trend
        ));
    }

    parts.push("=== END ACCOUNT PROFILE ===".to_string());
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{Sentiment, Severity};
    use crate::profile::types::{CallSummary, IssueStatus, TrackedIssue};
    use chrono::{TimeZone, Utc};

    fn issue(n: usize, recurring: bool) -> TrackedIssue {
        let now = Utc::now();
        TrackedIssue {
            issue_id: format!("a-c-{n}"),
            problem: format!("problem {n}"),
            category: format!("Cat{n}"),
            severity: Severity::Medium,
            action_required: String::new(),
            status: IssueStatus::Open,
            first_reported_at: now,
            last_mentioned_at: now,
            resolved_at: None,
            mention_count: if recurring { 3 } else { 1 },
            call_ids: vec!["c".into()],
            is_recurring: recurring,
        }
    }

    fn call(day: u32) -> CallSummary {
        CallSummary {
            call_id: format!("c{day}"),
            timestamp: Utc.with_ymd_and_hms(2025, 5, day, 10, 0, 0).unwrap(),
            duration_seconds: None,
            direction: None,
            summary: format!("call on day {day}"),
            sentiment: Some(Sentiment::Neutral),
            issues_raised: 1,
            issues_resolved: 0,
            agent_performance: None,
            was_escalated: false,
            follow_up_needed: false,
        }
    }

    #[test]
    fn test_new_account_has_empty_context() {
        let p = AccountProfile::new("a", Utc::now());
        assert_eq!(build_context(&p), "");
    }

    #[test]
    fn test_context_limits_issues_and_calls() {
        let mut p = AccountProfile::new("a", Utc::now());
        p.active_issues = (0..7).map(|n| issue(n, n == 0)).collect();
        p.call_history = (1..=5).rev().map(call).collect();
        p.total_calls = 5;
        p.trends.sentiment_trend = TrendDirection::Declining;

        let ctx = build_context(&p);
        assert!(ctx.contains("previous 5 calls"));
        assert!(ctx.contains("[Cat0] problem 0 [RECURRING] (mentioned 3 times)"));
        assert!(ctx.contains("[Cat4] problem 4"));
        assert!(!ctx.contains("[Cat5]"));
        assert!(ctx.contains("... and 2 more"));
        assert!(ctx.contains("2025-05-05: call on day 5"));
        assert!(ctx.contains("2025-05-03"));
        assert!(!ctx.contains("2025-05-02"));
        assert!(ctx.contains("sentiment is declining"));
    }

    #[test]
    fn test_stable_sentiment_has_no_warning() {
        let mut p = AccountProfile::new("a", Utc::now());
        p.call_history = vec![call(1)];
        p.total_calls = 1;
        assert!(!build_context(&p).contains("WARNING"));
    }
}
