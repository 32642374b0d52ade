use chrono::{DateTime, Utc};

use super::types::{CategorySummary, PeriodSummary, Ticket, TicketStatus};
use crate::assessment::Severity;
use crate::date_util::{sanitize_key, truncate_with_ellipsis};

pub const MAX_TICKETS: usize = 5;
pub const MIN_CATEGORY_COUNT: usize = 3;
const TITLE_PROBLEM_CHARS: usize = 60;
const DESCRIPTION_PROBLEMS: usize = 3;

/// Severity from a category's issue volume.
pub fn severity_for(total_count: usize) -> Severity {
    if total_count >= 10 {
        Severity::Critical
    } else if total_count >= 5 {
        Severity::High
    } else {
        Severity::Medium
    }
}

/// One ticket per category; the suffix is fixed so reruns reuse the id.
pub fn ticket_id(period_key: &str, category: &str) -> String {
    format!("{period_key}-{}-01", sanitize_key(category))
}

/// Prioritized tickets for the busiest categories of a period.
pub fn generate_tickets(summary: &PeriodSummary, now: DateTime<Utc>) -> Vec<Ticket> {
    let mut qualifying: Vec<&CategorySummary> = summary
        .categories
        .values()
        .filter(|c| c.total_count >= MIN_CATEGORY_COUNT)
        .collect();
    qualifying.sort_by(|a, b| {
        b.total_count
            .cmp(&a.total_count)
            .then_with(|| a.category.cmp(&b.category))
    });

    if qualifying.is_empty() {
        log::debug!("No categories qualify for tickets in {}", summary.period_key);
    }

    qualifying
        .into_iter()
        .take(MAX_TICKETS)
        .enumerate()
        .map(|(rank, category)| build_ticket(&summary.period_key, category, rank as u32 + 1, now))
        .collect()
}

fn build_ticket(period_key: &str, c: &CategorySummary, priority: u32, now: DateTime<Utc>) -> Ticket {
    let severity = severity_for(c.total_count);
    let is_recurring = c.affected_accounts > 1;

    let headline = c
        .top_problems
        .first()
        .map(|p| truncate_with_ellipsis(&p.problem, TITLE_PROBLEM_CHARS))
        .unwrap_or_else(|| "Multiple issues reported".to_string());
    let title = format!(
        "[{}] {headline} ({} issues from {} accounts)",
        c.category, c.total_count, c.affected_accounts
    );

    Ticket {
        ticket_id: ticket_id(period_key, &c.category),
        period_key: period_key.to_string(),
        category: c.category.clone(),
        priority,
        title,
        description: describe(period_key, c, severity, is_recurring),
        top_problems: c.top_problems.clone(),
        issue_count: c.total_count,
        affected_accounts: c.affected_accounts,
        affected_account_ids: Some(c.affected_account_ids.clone()),
        examples: c.examples.clone(),
        severity,
        is_recurring,
        status: TicketStatus::Open,
        created_at: now,
    }
}

fn describe(period_key: &str, c: &CategorySummary, severity: Severity, is_recurring: bool) -> String {
    let problems: Vec<String> = c
        .top_problems
        .iter()
        .take(DESCRIPTION_PROBLEMS)
        .map(|p| format!("- {} (x{})", p.problem, p.count))
        .collect();
    let count_of = |s: Severity| c.severity_breakdown.get(&s).copied().unwrap_or(0);

    format!(
        "Auto-generated ticket for **{cat}** issues.\n\n\
         ## Summary\n\
         - **Total issues:** {total}\n\
         - **Affected accounts:** {accounts}\n\
         - **Recurring across accounts:** {is_recurring}\n\
         - **Severity:** {severity}\n\
         - **Period:** {period_key}\n\n\
         ## Top problems\n{problems}\n\n\
         ## Severity breakdown\n\
         - Critical: {critical}\n\
         - High: {high}\n\
         - Medium: {medium}\n\
         - Low: {low}\n",
        cat = c.category,
        total = c.total_count,
        accounts = c.affected_accounts,
        problems = problems.join("\n"),
        critical = count_of(Severity::Critical),
        high = count_of(Severity::High),
        medium = count_of(Severity::Medium),
        low = count_of(Severity::Low),
    )
}
