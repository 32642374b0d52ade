use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::types::{CategorySummary, PeriodSummary, ProblemCount};
use crate::assessment::{CallAssessment, Severity};

const TOP_PROBLEMS: usize = 5;
const MAX_EXAMPLES: usize = 3;

#[derive(Default)]
struct CategoryTally {
    accounts: BTreeSet<String>,
    problems: HashMap<String, (usize, Severity)>,
    severities: BTreeMap<Severity, usize>,
    examples: Vec<String>,
}

impl CategoryTally {
    fn into_summary(self, category: String) -> CategorySummary {
        let mut ranked: Vec<ProblemCount> = self
            .problems
            .into_iter()
            .map(|(problem, (count, severity))| ProblemCount {
                problem,
                count,
                severity,
            })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.problem.cmp(&b.problem)));
        ranked.truncate(TOP_PROBLEMS);

        CategorySummary {
            category,
            total_count: ranked.iter().map(|p| p.count).sum(),
            affected_accounts: self.accounts.len(),
            affected_account_ids: self.accounts.into_iter().collect(),
            top_problems: ranked,
            severity_breakdown: self.severities,
            examples: self.examples,
        }
    }
}

/// Fold every assessment of one period into a summary.
pub fn summarize_period(
    period_key: &str,
    assessments: &[CallAssessment],
    now: DateTime<Utc>,
) -> PeriodSummary {
    let mut tallies: BTreeMap<String, CategoryTally> = BTreeMap::new();
    let mut sentiment_breakdown = BTreeMap::new();
    let mut churn_risk_breakdown = BTreeMap::new();
    let mut upsell_opportunities = 0;
    let mut total_issues = 0;
    let mut satisfaction_sum = 0i64;
    let mut satisfaction_n = 0usize;

    for a in assessments {
        if let Some(s) = a.intent.sentiment {
            *sentiment_breakdown.entry(s.as_str().to_string()).or_insert(0) += 1;
        }
        if let Some(risk) = a.churn.risk {
            *churn_risk_breakdown.entry(risk.as_str().to_string()).or_insert(0) += 1;
        }
        if a.upsell.has_opportunity {
            upsell_opportunities += 1;
        }
        if a.intent.satisfaction_score > 0 {
            satisfaction_sum += i64::from(a.intent.satisfaction_score);
            satisfaction_n += 1;
        }

        for issue in &a.issues {
            total_issues += 1;
            let tally = tallies.entry(issue.category.clone()).or_default();
            tally.accounts.insert(a.account_id.clone());
            let entry = tally
                .problems
                .entry(issue.problem.clone())
                .or_insert((0, issue.severity));
            entry.0 += 1;
            entry.1 = entry.1.max(issue.severity);
            *tally.severities.entry(issue.severity).or_insert(0) += 1;
            if tally.examples.len() < MAX_EXAMPLES {
                tally.examples.push(issue.action.clone());
            }
        }
    }

    let avg_satisfaction = if satisfaction_n > 0 {
        satisfaction_sum as f64 / satisfaction_n as f64
    } else {
        0.0
    };

    PeriodSummary {
        period_key: period_key.to_string(),
        total_calls: assessments.len(),
        total_issues,
        categories: tallies
            .into_iter()
            .map(|(category, tally)| (category.clone(), tally.into_summary(category)))
            .collect(),
        sentiment_breakdown,
        churn_risk_breakdown,
        upsell_opportunities,
        avg_satisfaction,
        generated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{ReportedIssue, Sentiment, Tier};

    fn call(account: &str, issues: &[(&str, &str, Severity)]) -> CallAssessment {
        let now = Utc::now();
        let mut a = CallAssessment::degraded("c", account, now, "", None, "");
        a.parse_error = None;
        a.issues = issues
            .iter()
            .map(|(cat, problem, severity)| ReportedIssue {
                problem: problem.to_string(),
                category: cat.to_string(),
                severity: *severity,
                action: format!("fix {problem}"),
            })
            .collect();
        a
    }

    #[test]
    fn test_empty_period() {
        let s = summarize_period("2025-01-01", &[], Utc::now());
        assert_eq!(s.total_calls, 0);
        assert_eq!(s.total_issues, 0);
        assert!(s.categories.is_empty());
        assert_eq!(s.avg_satisfaction, 0.0);
    }

    #[test]
    fn test_counts_accounts_and_examples() {
        let calls = vec![
            call("a1", &[("Billing", "double charge", Severity::Low)]),
            call("a2", &[("Billing", "double charge", Severity::High)]),
            call("a1", &[("Billing", "no invoice", Severity::Medium)]),
            call("a3", &[("Billing", "refund", Severity::Low), ("Payments", "upi fails", Severity::Low)]),
        ];
        let s = summarize_period("2025-01-01", &calls, Utc::now());
        assert_eq!(s.total_calls, 4);
        assert_eq!(s.total_issues, 5);

        let billing = &s.categories["Billing"];
        assert_eq!(billing.total_count, 4);
        assert_eq!(billing.affected_accounts, 3);
        assert_eq!(billing.affected_account_ids, vec!["a1", "a2", "a3"]);
        assert_eq!(billing.top_problems[0].problem, "double charge");
        assert_eq!(billing.top_problems[0].count, 2);
        assert_eq!(billing.top_problems[0].severity, Severity::High);
        assert_eq!(billing.examples.len(), 3);
        assert_eq!(billing.examples[0], "fix double charge");
        assert_eq!(billing.severity_breakdown[&Severity::Low], 2);
    }

    #[test]
    fn test_total_count_only_counts_top_five_problems() {
        let problems: Vec<(&str, String, Severity)> = (0..7)
            .map(|n| ("Leads", format!("p{n}"), Severity::Low))
            .collect();
        let mut calls = Vec::new();
        for (cat, p, sev) in &problems {
            calls.push(call("a", &[(*cat, p.as_str(), *sev)]));
        }
        // p0 reported twice more
        calls.push(call("a", &[("Leads", "p0", Severity::Low)]));
        calls.push(call("a", &[("Leads", "p0", Severity::Low)]));

        let s = summarize_period("2025-01-01", &calls, Utc::now());
        let leads = &s.categories["Leads"];
        assert_eq!(s.total_issues, 9);
        assert_eq!(leads.top_problems.len(), 5);
        assert_eq!(leads.top_problems[0].problem, "p0");
        assert_eq!(leads.top_problems[0].count, 3);
        // 3 + four singletons; two singletons fall outside the top five
        assert_eq!(leads.total_count, 7);
    }

    #[test]
    fn test_breakdowns_skip_unknown_labels() {
        let mut positive = call("a", &[]);
        positive.intent.sentiment = Some(Sentiment::Positive);
        positive.intent.satisfaction_score = 8;
        positive.churn.risk = Some(Tier::Low);
        positive.upsell.has_opportunity = true;
        let mut unknown = call("b", &[]);
        unknown.intent.satisfaction_score = 0;
        let mut negative = call("c", &[]);
        negative.intent.sentiment = Some(Sentiment::Negative);
        negative.intent.satisfaction_score = 4;

        let s = summarize_period("p", &[positive, unknown, negative], Utc::now());
        assert_eq!(s.sentiment_breakdown.len(), 2);
        assert_eq!(s.sentiment_breakdown["Positive"], 1);
        assert_eq!(s.churn_risk_breakdown.len(), 1);
        assert_eq!(s.upsell_opportunities, 1);
        assert!((s.avg_satisfaction - 6.0).abs() < 1e-9);
    }
}
