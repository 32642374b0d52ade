pub mod aggregate;
pub mod tickets;
pub mod types;
pub mod worker;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::locks::KeyedLocks;
use crate::storage::Store;
use types::{PeriodSummary, Ticket};

pub use worker::{AggregationQueue, ThresholdTrigger};

/// Output of one aggregation run.
#[derive(Debug, Clone, PartialEq)]
pub struct Rollup {
    pub summary: PeriodSummary,
    pub tickets: Vec<Ticket>,
}

/// Aggregate one period and persist its summary and tickets.
///
/// Runs under the period's lock. Returns `None` when the period has no
/// assessments; nothing is written in that case.
pub async fn run_period(
    store: &dyn Store,
    period_locks: &KeyedLocks,
    period_key: &str,
    now: DateTime<Utc>,
) -> Result<Option<Rollup>> {
    let _guard = period_locks.acquire(period_key).await;

    let assessments = store.load_assessments_for_period(period_key).await?;
    if assessments.is_empty() {
        log::debug!("No assessments for {period_key}, skipping aggregation");
        return Ok(None);
    }

    let summary = aggregate::summarize_period(period_key, &assessments, now);
    let tickets = tickets::generate_tickets(&summary, now);
    store.save_rollup(&summary, &tickets).await?;

    log::info!(
        "Aggregated {period_key}: {} calls, {} issues, {} tickets",
        summary.total_calls,
        summary.total_issues,
        tickets.len()
    );
    Ok(Some(Rollup { summary, tickets }))
}
