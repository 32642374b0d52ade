use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::Store;
use crate::assessment::CallAssessment;
use crate::error::Result;
use crate::profile::types::AccountProfile;
use crate::rollup::types::{PeriodSummary, Ticket};

/// Primary store with a secondary used when the primary fails.
///
/// Writes go to the primary and fall back on error. Reads fall back when the
/// primary has nothing for the key, so data written during a primary outage
/// stays visible. A primary read error is only masked when the fallback holds
/// a copy; otherwise the error is returned, never a miss.
///
/// After a failover the two stores can disagree. Profiles and summaries are
/// read from both and the later stamp wins (`updated_at`, `generated_at`);
/// tickets follow whichever store holds the winning summary.
pub struct FallbackStore<P, F> {
    primary: P,
    fallback: F,
}

impl<P: Store, F: Store> FallbackStore<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    pub fn primary(&self) -> &P {
        &self.primary
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    async fn fallback_rollup_is_newer(&self, period_key: &str) -> bool {
        match (
            self.primary.load_summary(period_key).await,
            self.fallback.load_summary(period_key).await,
        ) {
            (Ok(Some(primary)), Ok(Some(copy))) => copy.generated_at > primary.generated_at,
            (Err(_), Ok(Some(_))) => true,
            _ => false,
        }
    }
}

/// `primary`, unless the fallback holds a copy stamped later.
fn newest<T>(primary: T, copy: Result<Option<T>>, stamp: impl Fn(&T) -> DateTime<Utc>, what: &str) -> T {
    match copy {
        Ok(Some(copy)) if stamp(&copy) > stamp(&primary) => {
            log::info!("Fallback copy of {what} is newer than the primary's; using it");
            copy
        }
        Ok(_) => primary,
        Err(e) => {
            log::warn!("Fallback store failed to load {what}: {e}");
            primary
        }
    }
}

macro_rules! write_through {
    ($self:ident, $what:expr, $method:ident($($arg:expr),*)) => {
        match $self.primary.$method($($arg),*).await {
            Ok(v) => Ok(v),
            Err(e) => {
                log::warn!("Primary store failed to save {}: {e}; using fallback", $what);
                $self.fallback.$method($($arg),*).await
            }
        }
    };
}

macro_rules! read_optional {
    (@miss $self:ident, $what:expr, $primary:expr, $method:ident($($arg:expr),*)) => {
        match $primary {
            Ok(_) => $self.fallback.$method($($arg),*).await,
            Err(e) => match $self.fallback.$method($($arg),*).await {
                Ok(Some(v)) => {
                    log::warn!("Primary store failed to load {}: {e}; using fallback copy", $what);
                    Ok(Some(v))
                }
                Ok(None) => Err(e),
                Err(fallback_err) => {
                    log::warn!("Fallback store also failed to load {}: {fallback_err}", $what);
                    Err(e)
                }
            },
        }
    };
    ($self:ident, $what:expr, $method:ident($($arg:expr),*), newest_by $stamp:expr) => {
        match $self.primary.$method($($arg),*).await {
            Ok(Some(v)) => Ok(Some(newest(v, $self.fallback.$method($($arg),*).await, $stamp, &$what))),
            miss => read_optional!(@miss $self, $what, miss, $method($($arg),*)),
        }
    };
    ($self:ident, $what:expr, $method:ident($($arg:expr),*)) => {
        match $self.primary.$method($($arg),*).await {
            Ok(Some(v)) => Ok(Some(v)),
            miss => read_optional!(@miss $self, $what, miss, $method($($arg),*)),
        }
    };
}

macro_rules! read_list {
    ($self:ident, $what:expr, $method:ident($($arg:expr),*)) => {
        match $self.primary.$method($($arg),*).await {
            Ok(v) if !v.is_empty() => Ok(v),
            Ok(_) => $self.fallback.$method($($arg),*).await,
            Err(e) => match $self.fallback.$method($($arg),*).await {
                Ok(v) if !v.is_empty() => {
                    log::warn!("Primary store failed to list {}: {e}; using fallback", $what);
                    Ok(v)
                }
                _ => Err(e),
            },
        }
    };
}

#[async_trait]
impl<P: Store, F: Store> Store for FallbackStore<P, F> {
    async fn load_profile(&self, account_id: &str) -> Result<Option<AccountProfile>> {
        read_optional!(
            self,
            format!("profile {account_id}"),
            load_profile(account_id),
            newest_by |p: &AccountProfile| p.updated_at
        )
    }

    async fn save_profile(&self, profile: &AccountProfile) -> Result<()> {
        write_through!(self, format!("profile {}", profile.account_id), save_profile(profile))
    }

    async fn list_profile_ids(&self) -> Result<Vec<String>> {
        read_list!(self, "profiles", list_profile_ids())
    }

    async fn save_assessment(&self, assessment: &CallAssessment) -> Result<()> {
        write_through!(
            self,
            format!("assessment {}", assessment.call_id),
            save_assessment(assessment)
        )
    }

    async fn save_call(&self, assessment: &CallAssessment, profile: &AccountProfile) -> Result<()> {
        write_through!(
            self,
            format!("call {}", assessment.call_id),
            save_call(assessment, profile)
        )
    }

    async fn load_assessment(&self, call_id: &str) -> Result<Option<CallAssessment>> {
        read_optional!(self, format!("assessment {call_id}"), load_assessment(call_id))
    }

    async fn has_assessment(&self, call_id: &str) -> Result<bool> {
        match self.primary.has_assessment(call_id).await {
            Ok(true) => Ok(true),
            Ok(false) => self.fallback.has_assessment(call_id).await,
            Err(e) => match self.fallback.has_assessment(call_id).await {
                Ok(true) => {
                    log::warn!("Primary store failed to check assessment {call_id}: {e}; found in fallback");
                    Ok(true)
                }
                _ => Err(e),
            },
        }
    }

    async fn load_assessments_for_period(&self, period_key: &str) -> Result<Vec<CallAssessment>> {
        read_list!(
            self,
            format!("assessments for {period_key}"),
            load_assessments_for_period(period_key)
        )
    }

    async fn save_rollup(&self, summary: &PeriodSummary, tickets: &[Ticket]) -> Result<()> {
        write_through!(
            self,
            format!("rollup for {}", summary.period_key),
            save_rollup(summary, tickets)
        )
    }

    async fn load_summary(&self, period_key: &str) -> Result<Option<PeriodSummary>> {
        read_optional!(
            self,
            format!("summary {period_key}"),
            load_summary(period_key),
            newest_by |s: &PeriodSummary| s.generated_at
        )
    }

    async fn list_summary_periods(&self) -> Result<Vec<String>> {
        read_list!(self, "summaries", list_summary_periods())
    }

    async fn load_tickets(&self, period_key: &str) -> Result<Vec<Ticket>> {
        if self.fallback_rollup_is_newer(period_key).await {
            return self.fallback.load_tickets(period_key).await;
        }
        read_list!(self, format!("tickets for {period_key}"), load_tickets(period_key))
    }

    async fn load_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        // Ticket ids start with their period key.
        if let Some(period_key) = ticket_id.get(..10) {
            if self.fallback_rollup_is_newer(period_key).await {
                return self.fallback.load_ticket(ticket_id).await;
            }
        }
        read_optional!(self, format!("ticket {ticket_id}"), load_ticket(ticket_id))
    }
}
