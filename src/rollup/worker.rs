use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::date_util::today_key;
use crate::locks::KeyedLocks;
use crate::storage::Store;

type Pending = Arc<Mutex<HashSet<String>>>;

fn lock_pending(pending: &Pending) -> MutexGuard<'_, HashSet<String>> {
    pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Sending side of the aggregation channel.
///
/// A period stays pending from the moment it is requested until the worker
/// has finished running it, so triggers that fire close together collapse
/// into one run.
#[derive(Clone)]
pub struct AggregationQueue {
    tx: mpsc::UnboundedSender<String>,
    pending: Pending,
}

impl AggregationQueue {
    /// Ask for `period_key` to be aggregated. Returns `false` if a run for
    /// that period is already pending or in flight, or the worker has stopped.
    pub fn request(&self, period_key: &str) -> bool {
        {
            let mut pending = lock_pending(&self.pending);
            if !pending.insert(period_key.to_string()) {
                log::debug!("Aggregation for {period_key} already pending");
                return false;
            }
        }
        if self.tx.send(period_key.to_string()).is_err() {
            log::warn!("Aggregation worker has stopped; dropping request for {period_key}");
            lock_pending(&self.pending).remove(period_key);
            return false;
        }
        true
    }

    pub fn is_pending(&self, period_key: &str) -> bool {
        lock_pending(&self.pending).contains(period_key)
    }
}

/// Start the single aggregation worker.
///
/// The worker exits once every `AggregationQueue` clone has been dropped and
/// the remaining requests are drained.
pub fn spawn(store: Arc<dyn Store>, period_locks: Arc<KeyedLocks>) -> (AggregationQueue, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let pending: Pending = Arc::default();
    let queue = AggregationQueue {
        tx,
        pending: Arc::clone(&pending),
    };

    let handle = tokio::spawn(async move {
        while let Some(period_key) = rx.recv().await {
            if let Err(e) =
                super::run_period(store.as_ref(), &period_locks, &period_key, Utc::now()).await
            {
                log::error!("Aggregation for {period_key} failed: {e}");
            }
            lock_pending(&pending).remove(&period_key);
        }
        log::debug!("Aggregation worker stopped");
    });

    (queue, handle)
}

/// Request the current period every `every`. The first request is made after
/// one full interval.
pub fn spawn_interval(queue: AggregationQueue, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let period_key = today_key();
            log::info!("Scheduled aggregation for {period_key}");
            queue.request(&period_key);
        }
    })
}

/// Counts processed calls and fires every `threshold` of them.
#[derive(Debug)]
pub struct ThresholdTrigger {
    threshold: usize,
    count: AtomicUsize,
}

impl ThresholdTrigger {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            count: AtomicUsize::new(0),
        }
    }

    /// Record one call. Returns `true` when the count reaches the threshold,
    /// resetting it.
    pub fn record(&self) -> bool {
        let threshold = self.threshold;
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(if n + 1 >= threshold { 0 } else { n + 1 })
            })
            .map(|prev| prev + 1 >= threshold)
            .unwrap_or(false)
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{CallAssessment, ReportedIssue, Severity};
    use crate::storage::Database;
    use chrono::TimeZone;

    async fn seeded_store() -> Arc<dyn Store> {
        let db = Database::open_memory().await.unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 4, 1, 8, 0, 0).unwrap();
        for n in 0..3 {
            let mut a = CallAssessment::degraded(&format!("c{n}"), &format!("a{n}"), ts, "t", None, "");
            a.parse_error = None;
            a.issues.push(ReportedIssue {
                problem: "refund pending".into(),
                category: "Payments".into(),
                severity: Severity::High,
                action: "push refund".into(),
            });
            db.save_assessment(&a).await.unwrap();
        }
        Arc::new(db)
    }

    #[test]
    fn test_threshold_fires_and_resets() {
        let trigger = ThresholdTrigger::new(3);
        assert!(!trigger.record());
        assert!(!trigger.record());
        assert!(trigger.record());
        assert_eq!(trigger.count(), 0);
        assert!(!trigger.record());
        assert_eq!(trigger.count(), 1);
    }

    #[test]
    fn test_threshold_of_zero_fires_every_call() {
        let trigger = ThresholdTrigger::new(0);
        assert!(trigger.record());
        assert!(trigger.record());
    }

    #[tokio::test]
    async fn test_duplicate_requests_collapse() {
        let store = seeded_store().await;
        let locks = Arc::new(KeyedLocks::new());

        // Hold the period so the first run cannot finish while we re-request.
        let guard = locks.acquire("2025-04-01").await;
        let (queue, handle) = spawn(Arc::clone(&store), Arc::clone(&locks));

        assert!(queue.request("2025-04-01"));
        assert!(!queue.request("2025-04-01"));
        assert!(queue.is_pending("2025-04-01"));
        assert!(queue.request("2025-04-02"));

        drop(guard);
        drop(queue);
        handle.await.unwrap();

        let tickets = store.load_tickets("2025-04-01").await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].category, "Payments");
        assert!(store.load_summary("2025-04-02").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_period_can_be_requested_again_after_run() {
        let store = seeded_store().await;
        let (queue, handle) = spawn(Arc::clone(&store), Arc::new(KeyedLocks::new()));

        assert!(queue.request("2025-04-01"));
        for _ in 0..100 {
            if !queue.is_pending("2025-04-01") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!queue.is_pending("2025-04-01"));
        assert!(queue.request("2025-04-01"));

        drop(queue);
        handle.await.unwrap();
        assert!(store.load_summary("2025-04-01").await.unwrap().is_some());
    }
}
