use async_trait::async_trait;

use super::repository;
use super::Database;
use crate::assessment::CallAssessment;
use crate::date_util::period_key_for;
use crate::error::{Error, Result};
use crate::profile::types::AccountProfile;
use crate::rollup::types::{PeriodSummary, Ticket};

/// Keyed persistence for profiles, assessments, summaries and tickets.
///
/// Every save is an upsert. A missing key loads as `Ok(None)`.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load_profile(&self, account_id: &str) -> Result<Option<AccountProfile>>;
    async fn save_profile(&self, profile: &AccountProfile) -> Result<()>;
    async fn list_profile_ids(&self) -> Result<Vec<String>>;

    async fn save_assessment(&self, assessment: &CallAssessment) -> Result<()>;
    async fn load_assessment(&self, call_id: &str) -> Result<Option<CallAssessment>>;
    async fn has_assessment(&self, call_id: &str) -> Result<bool> {
        Ok(self.load_assessment(call_id).await?.is_some())
    }
    /// Persist a reconciled call: its assessment and the account's updated
    /// profile. Either both are written or neither is; backends that can fail
    /// between the two writes must override this.
    async fn save_call(&self, assessment: &CallAssessment, profile: &AccountProfile) -> Result<()> {
        self.save_profile(profile).await?;
        self.save_assessment(assessment).await
    }
    /// Oldest call first.
    async fn load_assessments_for_period(&self, period_key: &str) -> Result<Vec<CallAssessment>>;

    /// Persist a period summary together with its tickets, replacing any
    /// summary and tickets from an earlier run for the same period.
    async fn save_rollup(&self, summary: &PeriodSummary, tickets: &[Ticket]) -> Result<()>;
    async fn load_summary(&self, period_key: &str) -> Result<Option<PeriodSummary>>;
    /// Newest period first.
    async fn list_summary_periods(&self) -> Result<Vec<String>>;
    /// Priority order.
    async fn load_tickets(&self, period_key: &str) -> Result<Vec<Ticket>>;
    async fn load_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>>;
}

fn decode<T: serde::de::DeserializeOwned>(body: Option<String>) -> Result<Option<T>> {
    body.map(|b| serde_json::from_str::<T>(&b))
        .transpose()
        .map_err(Error::from)
}

fn decode_all<T: serde::de::DeserializeOwned>(bodies: Vec<String>) -> Result<Vec<T>> {
    bodies
        .iter()
        .map(|b| serde_json::from_str::<T>(b).map_err(Error::from))
        .collect()
}

#[async_trait]
impl Store for Database {
    async fn load_profile(&self, account_id: &str) -> Result<Option<AccountProfile>> {
        let id = account_id.to_string();
        let body = self
            .reader()
            .call(move |conn| repository::get_profile_body(conn, &id))
            .await?;
        decode(body)
    }

    async fn save_profile(&self, profile: &AccountProfile) -> Result<()> {
        let body = serde_json::to_string(profile)?;
        let profile = profile.clone();
        self.writer()
            .call(move |conn| repository::upsert_profile(conn, &profile, &body))
            .await?;
        Ok(())
    }

    async fn list_profile_ids(&self) -> Result<Vec<String>> {
        let ids = self.reader().call(|conn| repository::list_profile_ids(conn)).await?;
        Ok(ids)
    }

    async fn save_assessment(&self, assessment: &CallAssessment) -> Result<()> {
        let body = serde_json::to_string(assessment)?;
        let period_key = period_key_for(assessment.timestamp);
        let assessment = assessment.clone();
        self.writer()
            .call(move |conn| repository::upsert_assessment(conn, &assessment, &period_key, &body))
            .await?;
        Ok(())
    }

    async fn load_assessment(&self, call_id: &str) -> Result<Option<CallAssessment>> {
        let id = call_id.to_string();
        let body = self
            .reader()
            .call(move |conn| repository::get_assessment_body(conn, &id))
            .await?;
        decode(body)
    }

    async fn has_assessment(&self, call_id: &str) -> Result<bool> {
        let id = call_id.to_string();
        let exists = self
            .reader()
            .call(move |conn| repository::assessment_exists(conn, &id))
            .await?;
        Ok(exists)
    }

    async fn save_call(&self, assessment: &CallAssessment, profile: &AccountProfile) -> Result<()> {
        let assessment_body = serde_json::to_string(assessment)?;
        let profile_body = serde_json::to_string(profile)?;
        let period_key = period_key_for(assessment.timestamp);
        let (assessment, profile) = (assessment.clone(), profile.clone());
        self.writer()
            .call(move |conn| {
                let tx = conn.transaction()?;
                repository::upsert_profile(&tx, &profile, &profile_body)?;
                repository::upsert_assessment(&tx, &assessment, &period_key, &assessment_body)?;
                tx.commit()
            })
            .await?;
        Ok(())
    }

    async fn load_assessments_for_period(&self, period_key: &str) -> Result<Vec<CallAssessment>> {
        let key = period_key.to_string();
        let bodies = self
            .reader()
            .call(move |conn| repository::list_assessment_bodies_for_period(conn, &key))
            .await?;
        decode_all(bodies)
    }

    async fn save_rollup(&self, summary: &PeriodSummary, tickets: &[Ticket]) -> Result<()> {
        let summary_body = serde_json::to_string(summary)?;
        let ticket_rows = tickets
            .iter()
            .map(|t| -> Result<(Ticket, String)> { Ok((t.clone(), serde_json::to_string(t)?)) })
            .collect::<Result<Vec<_>>>()?;
        let summary = summary.clone();

        self.writer()
            .call(move |conn| {
                let tx = conn.transaction()?;
                repository::upsert_summary(&tx, &summary, &summary_body)?;
                let removed = repository::delete_tickets_for_period(&tx, &summary.period_key)?;
                for (ticket, body) in &ticket_rows {
                    repository::upsert_ticket(&tx, ticket, body)?;
                }
                tx.commit()?;
                if removed > 0 {
                    log::debug!(
                        "Replaced {removed} earlier tickets for {}",
                        summary.period_key
                    );
                }
                Ok::<(), rusqlite::Error>(())
            })
            .await?;
        Ok(())
    }

    async fn load_summary(&self, period_key: &str) -> Result<Option<PeriodSummary>> {
        let key = period_key.to_string();
        let body = self
            .reader()
            .call(move |conn| repository::get_summary_body(conn, &key))
            .await?;
        decode(body)
    }

    async fn list_summary_periods(&self) -> Result<Vec<String>> {
        let periods = self
            .reader()
            .call(|conn| repository::list_summary_periods(conn))
            .await?;
        Ok(periods)
    }

    async fn load_tickets(&self, period_key: &str) -> Result<Vec<Ticket>> {
        let key = period_key.to_string();
        let bodies = self
            .reader()
            .call(move |conn| repository::list_ticket_bodies_for_period(conn, &key))
            .await?;
        decode_all(bodies)
    }

    async fn load_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        let id = ticket_id.to_string();
        let body = self
            .reader()
            .call(move |conn| repository::get_ticket_body(conn, &id))
            .await?;
        decode(body)
    }
}
