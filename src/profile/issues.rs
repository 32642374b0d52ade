use chrono::{DateTime, Utc};

use super::types::{IssueStatus, TrackedIssue};
use crate::assessment::ReportedIssue;

/// Decides whether a reported issue refers to an already-tracked one.
pub trait IssueMatcher: Send + Sync {
    fn matches(&self, tracked: &TrackedIssue, reported: &ReportedIssue) -> bool;
}

/// Two issues are the same tracked issue iff they share a category.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryMatcher;

impl IssueMatcher for CategoryMatcher {
    fn matches(&self, tracked: &TrackedIssue, reported: &ReportedIssue) -> bool {
        tracked.category == reported.category
    }
}

/// Result of folding one call's reported issues into the tracked set.
#[derive(Debug, Clone, Default)]
pub struct IssueUpdate {
    pub active: Vec<TrackedIssue>,
    /// Issues resolved by this call, in their previous active order.
    pub newly_resolved: Vec<TrackedIssue>,
}

impl IssueUpdate {
    pub fn resolved_count(&self) -> usize {
        self.newly_resolved.len()
    }
}

pub struct IssueTracker {
    matcher: Box<dyn IssueMatcher>,
}

impl Default for IssueTracker {
    fn default() -> Self {
        Self::new(Box::new(CategoryMatcher))
    }
}

impl IssueTracker {
    pub fn new(matcher: Box<dyn IssueMatcher>) -> Self {
        Self { matcher }
    }

    /// Match, update and (when `prompt_resolution` is set) resolve issues for one call.
    ///
    /// Each tracked issue is recognized at most once per call: a second
    /// reported issue that matches an issue already mentioned in this call is
    /// ignored. Issues mentioned in the call are never resolved by it.
    pub fn apply(
        &self,
        account_id: &str,
        call_id: &str,
        active: Vec<TrackedIssue>,
        reported: &[ReportedIssue],
        prompt_resolution: bool,
        now: DateTime<Utc>,
    ) -> IssueUpdate {
        let mut active = active;
        // Parallel to `active`; new issues are pushed to both.
        let mut mentioned = vec![false; active.len()];

        for issue in reported {
            match active.iter().position(|t| self.matcher.matches(t, issue)) {
                Some(idx) if mentioned[idx] => {
                    log::debug!(
                        "Ignoring repeated '{}' issue in call {call_id}",
                        issue.category
                    );
                }
                Some(idx) => {
                    let tracked = &mut active[idx];
                    tracked.mention_count += 1;
                    tracked.call_ids.push(call_id.to_string());
                    tracked.last_mentioned_at = now;
                    tracked.is_recurring = tracked.mention_count >= 2;
                    if issue.severity > tracked.severity {
                        tracked.severity = issue.severity;
                    }
                    mentioned[idx] = true;
                }
                None => {
                    let issue_id = format!("{account_id}-{call_id}-{}", active.len());
                    active.push(TrackedIssue {
                        issue_id,
                        problem: issue.problem.clone(),
                        category: issue.category.clone(),
                        severity: issue.severity,
                        action_required: issue.action.clone(),
                        status: IssueStatus::Open,
                        first_reported_at: now,
                        last_mentioned_at: now,
                        resolved_at: None,
                        mention_count: 1,
                        call_ids: vec![call_id.to_string()],
                        is_recurring: false,
                    });
                    mentioned.push(true);
                }
            }
        }

        if !prompt_resolution {
            return IssueUpdate {
                active,
                newly_resolved: Vec::new(),
            };
        }

        let mut still_active = Vec::with_capacity(active.len());
        let mut newly_resolved = Vec::new();
        for (mut issue, was_mentioned) in active.into_iter().zip(mentioned) {
            if was_mentioned {
                still_active.push(issue);
            } else {
                issue.status = IssueStatus::Resolved;
                issue.resolved_at = Some(now);
                newly_resolved.push(issue);
            }
        }

        IssueUpdate {
            active: still_active,
            newly_resolved,
        }
    }
}
