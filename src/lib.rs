pub mod assessment;
pub mod config;
pub mod date_util;
pub mod error;
pub mod ingest;
pub mod llm;
pub mod locks;
pub mod profile;
pub mod rollup;
pub mod storage;

use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;

pub use assessment::{CallAssessment, CallMetadata};
pub use config::Settings;
pub use error::{Error, Result};
pub use ingest::Transcript;
pub use llm::{Assessor, LlmAssessor};
pub use profile::types::AccountProfile;
pub use profile::ProfileReconciler;
pub use rollup::types::{PeriodSummary, Ticket};
pub use rollup::{AggregationQueue, Rollup, ThresholdTrigger};
pub use storage::{Database, FallbackStore, FileStore, Store};

use date_util::period_key_for;
use locks::KeyedLocks;

/// Result of handing one transcript to [`CallIntel::process_transcript`].
#[derive(Debug)]
pub enum ProcessOutcome {
    /// The call id already has a stored assessment; nothing was done.
    AlreadyProcessed,
    Processed(Box<ProcessedCall>),
}

#[derive(Debug)]
pub struct ProcessedCall {
    pub assessment: CallAssessment,
    pub profile: AccountProfile,
    /// Whether this call tripped the threshold and queued an aggregation.
    pub aggregation_requested: bool,
}

/// Main entry point: assesses calls, maintains account profiles, and rolls
/// periods up into summaries and tickets.
pub struct CallIntel {
    store: Arc<dyn Store>,
    assessor: Option<Arc<dyn Assessor>>,
    reconciler: ProfileReconciler,
    account_locks: KeyedLocks,
    period_locks: Arc<KeyedLocks>,
    threshold: ThresholdTrigger,
    queue: Option<AggregationQueue>,
}

impl CallIntel {
    /// Engine over `store`. Reads and aggregation work without an assessor;
    /// processing transcripts needs one, see [`CallIntel::with_assessor`].
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            assessor: None,
            reconciler: ProfileReconciler::default(),
            account_locks: KeyedLocks::new(),
            period_locks: Arc::new(KeyedLocks::new()),
            threshold: ThresholdTrigger::new(config::DEFAULT_AGGREGATION_THRESHOLD),
            queue: None,
        }
    }

    pub fn with_assessor(mut self, assessor: Arc<dyn Assessor>) -> Self {
        self.assessor = Some(assessor);
        self
    }

    /// Processed calls between threshold-triggered aggregations.
    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = ThresholdTrigger::new(threshold);
        self
    }

    pub fn with_reconciler(mut self, reconciler: ProfileReconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Access the store (for direct reads in the CLI).
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    // ── Aggregation worker ─────────────────────────────────────────

    /// Start the aggregation worker. Threshold triggers are ignored until it
    /// is running.
    pub fn start_aggregation_worker(&mut self) -> JoinHandle<()> {
        let (queue, handle) = rollup::worker::spawn(Arc::clone(&self.store), Arc::clone(&self.period_locks));
        self.queue = Some(queue);
        handle
    }

    pub fn aggregation_queue(&self) -> Option<&AggregationQueue> {
        self.queue.as_ref()
    }

    /// Drop this handle's queue so the worker can drain and exit.
    pub fn stop_aggregation_worker(&mut self) {
        self.queue = None;
    }

    // ── Call processing ────────────────────────────────────────────

    /// Assess one transcript and fold it into its account's profile.
    ///
    /// The account lock is held from context building through the save, so
    /// calls for one account are applied one at a time and each sees the
    /// profile left by the previous one.
    pub async fn process_transcript(&self, transcript: &Transcript) -> Result<ProcessOutcome> {
        if self.store.has_assessment(&transcript.call_id).await? {
            log::debug!("Call {} already processed, skipping", transcript.call_id);
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let _guard = self.account_locks.acquire(&transcript.account_id).await;
        // Re-check under the lock in case a concurrent caller got here first.
        if self.store.has_assessment(&transcript.call_id).await? {
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let existing = self.store.load_profile(&transcript.account_id).await?;
        let assessment = if transcript.is_empty() {
            log::info!("Call {} has an empty transcript", transcript.call_id);
            let now = Utc::now();
            let mut a = CallAssessment::degraded(
                &transcript.call_id,
                &transcript.account_id,
                transcript.timestamp.unwrap_or(now),
                "",
                None,
                "empty transcript",
            );
            a.original_language = transcript.language.clone();
            a
        } else {
            let context = existing
                .as_ref()
                .map(profile::build_context)
                .unwrap_or_default();
            let assessor = self
                .assessor
                .as_ref()
                .ok_or_else(|| Error::Config("no assessor configured".into()))?;
            assessor.assess(transcript, &context).await?
        };

        let profile = self
            .apply(existing, &assessment, Some(&transcript.metadata))
            .await?;
        log::info!(
            "Processed call {} for {}: {} issues, health {} ({})",
            assessment.call_id,
            assessment.account_id,
            assessment.issues.len(),
            profile.current_status.health_score,
            profile.current_status.health_label
        );

        let aggregation_requested = self.threshold.record()
            && match &self.queue {
                Some(queue) => queue.request(&period_key_for(assessment.timestamp)),
                None => false,
            };

        Ok(ProcessOutcome::Processed(Box::new(ProcessedCall {
            assessment,
            profile,
            aggregation_requested,
        })))
    }

    pub async fn process_file(&self, path: &Path) -> Result<ProcessOutcome> {
        let transcript = Transcript::from_path(path)?;
        self.process_transcript(&transcript).await
    }

    /// Fold an already-assessed call into its account's profile and persist
    /// both. Nothing is written if loading or saving fails.
    pub async fn reconcile_call(
        &self,
        assessment: &CallAssessment,
        metadata: Option<&CallMetadata>,
    ) -> Result<AccountProfile> {
        let _guard = self.account_locks.acquire(&assessment.account_id).await;
        let existing = self.store.load_profile(&assessment.account_id).await?;
        self.apply(existing, assessment, metadata).await
    }

    /// Caller holds the account lock.
    async fn apply(
        &self,
        existing: Option<AccountProfile>,
        assessment: &CallAssessment,
        metadata: Option<&CallMetadata>,
    ) -> Result<AccountProfile> {
        let profile = self.reconciler.reconcile(
            existing,
            &assessment.account_id,
            assessment,
            metadata,
            Utc::now(),
        );
        self.store.save_call(assessment, &profile).await?;
        Ok(profile)
    }

    // ── Aggregation ────────────────────────────────────────────────

    /// Aggregate a period now, bypassing the queue. `None` if the period has
    /// no assessments.
    pub async fn run_aggregation(&self, period_key: &str) -> Result<Option<Rollup>> {
        rollup::run_period(self.store.as_ref(), &self.period_locks, period_key, Utc::now()).await
    }

    // ── Reads ──────────────────────────────────────────────────────

    pub async fn profile(&self, account_id: &str) -> Result<Option<AccountProfile>> {
        self.store.load_profile(account_id).await
    }

    pub async fn account_ids(&self) -> Result<Vec<String>> {
        self.store.list_profile_ids().await
    }

    /// Profiles flagged for attention, lowest health first.
    pub async fn accounts_needing_attention(&self) -> Result<Vec<AccountProfile>> {
        let mut flagged = Vec::new();
        for id in self.store.list_profile_ids().await? {
            if let Some(p) = self.store.load_profile(&id).await? {
                if p.current_status.needs_attention {
                    flagged.push(p);
                }
            }
        }
        flagged.sort_by(|a, b| {
            a.current_status
                .health_score
                .cmp(&b.current_status.health_score)
                .then_with(|| a.account_id.cmp(&b.account_id))
        });
        Ok(flagged)
    }

    /// Context text the next assessment for this account would receive.
    pub async fn account_context(&self, account_id: &str) -> Result<String> {
        Ok(self
            .store
            .load_profile(account_id)
            .await?
            .map(|p| profile::build_context(&p))
            .unwrap_or_default())
    }

    pub async fn summary(&self, period_key: &str) -> Result<Option<PeriodSummary>> {
        self.store.load_summary(period_key).await
    }

    pub async fn summary_periods(&self) -> Result<Vec<String>> {
        self.store.list_summary_periods().await
    }

    pub async fn tickets(&self, period_key: &str) -> Result<Vec<Ticket>> {
        self.store.load_tickets(period_key).await
    }

    pub async fn ticket(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        self.store.load_ticket(ticket_id).await
    }
}
