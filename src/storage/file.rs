use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use tempfile::{NamedTempFile, TempDir};

use super::Store;
use crate::assessment::CallAssessment;
use crate::date_util::period_key_for;
use crate::error::{Error, Result};
use crate::profile::types::AccountProfile;
use crate::rollup::types::{PeriodSummary, Ticket};

const PROFILES: &str = "profiles";
const ASSESSMENTS: &str = "assessments";
const SUMMARIES: &str = "summaries";
const TICKETS: &str = "tickets";

/// JSON-file backend: one file per key under `root`.
///
/// ```text
/// root/profiles/<account>.json
/// root/assessments/<period>/<call>.json
/// root/summaries/<period>.json
/// root/tickets/<period>/<ticket>.json
/// ```
///
/// Files are written to a temporary sibling and renamed into place, so a
/// reader never sees a partial file. Multi-file writes (`save_call`,
/// `save_rollup`) stage everything first and undo the earlier renames if a
/// later one fails.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Reject keys that would escape their namespace directory.
fn checked_key(key: &str) -> Result<&str> {
    if key.is_empty() || key.starts_with('.') || key.contains(|c: char| matches!(c, '/' | '\\' | '\0')) {
        return Err(Error::InvalidInput(format!("unusable storage key: {key:?}")));
    }
    Ok(key)
}

fn json_path(dir: &Path, key: &str) -> Result<PathBuf> {
    Ok(dir.join(format!("{}.json", checked_key(key)?)))
}

/// Serialize `value` into a synced temp file beside `path`, ready to persist.
fn stage_json<T: Serialize>(path: &Path, value: &T) -> Result<NamedTempFile> {
    let parent = path
        .parent()
        .ok_or_else(|| Error::Storage(format!("no parent directory for {}", path.display())))?;
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<()> {
    tmp.persist(path)
        .map_err(|e| Error::Storage(format!("{}: {e}", path.display())))?;
    Ok(())
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    persist(stage_json(path, value)?, path)
}

fn read_bytes(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Put `previous` back at `path`, or remove `path` if it did not exist.
fn restore(path: &Path, previous: Option<&[u8]>) -> Result<()> {
    match (previous, path.parent()) {
        (Some(bytes), Some(parent)) => {
            let mut tmp = NamedTempFile::new_in(parent)?;
            tmp.write_all(bytes)?;
            tmp.as_file().sync_all()?;
            persist(tmp, path)
        }
        (Some(_), None) => Err(Error::Storage(format!("no parent directory for {}", path.display()))),
        (None, _) => match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        },
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Keys of `*.json` files directly under `dir`, sorted. A missing dir is empty.
fn list_keys(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut keys = Vec::new();
    for entry in entries {
        let name = entry?.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with('.') {
            continue;
        }
        if let Some(key) = name.strip_suffix(".json") {
            keys.push(key.to_string());
        }
    }
    keys.sort();
    Ok(keys)
}

/// Subdirectory names under `dir`, sorted, skipping hidden staging dirs.
fn list_dirs(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if !name.starts_with('.') {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for key in list_keys(dir)? {
        if let Some(v) = read_json(&json_path(dir, &key)?)? {
            out.push(v);
        }
    }
    Ok(out)
}

/// Write `tickets` into a hidden staging dir under `tickets_root`.
fn stage_tickets(tickets_root: &Path, tickets: &[Ticket]) -> Result<TempDir> {
    std::fs::create_dir_all(tickets_root)?;
    let staging = tempfile::Builder::new()
        .prefix(".staging-")
        .tempdir_in(tickets_root)?;
    for ticket in tickets {
        write_json_atomic(&json_path(staging.path(), &ticket.ticket_id)?, ticket)?;
    }
    Ok(staging)
}

/// A period's ticket dir replaced by a staged set. The previous set is kept
/// aside until [`TicketSwap::finish`] or [`TicketSwap::rollback`].
struct TicketSwap {
    dir: PathBuf,
    backup: Option<PathBuf>,
}

fn swap_ticket_dir(tickets_root: &Path, period_key: &str, staging: TempDir) -> Result<TicketSwap> {
    let dir = tickets_root.join(checked_key(period_key)?);
    let backup_path = tickets_root.join(format!(".old-{period_key}"));
    if backup_path.exists() {
        std::fs::remove_dir_all(&backup_path)?;
    }
    let backup = if dir.exists() {
        std::fs::rename(&dir, &backup_path)?;
        Some(backup_path)
    } else {
        None
    };
    if let Err(e) = std::fs::rename(staging.path(), &dir) {
        if let Some(backup) = &backup {
            if let Err(restore_err) = std::fs::rename(backup, &dir) {
                log::error!(
                    "Could not restore tickets for {period_key} from {}: {restore_err}",
                    backup.display()
                );
            }
        }
        return Err(e.into());
    }
    Ok(TicketSwap { dir, backup })
}

impl TicketSwap {
    fn finish(self) -> Result<()> {
        if let Some(backup) = &self.backup {
            std::fs::remove_dir_all(backup)?;
        }
        Ok(())
    }

    /// Put the previous ticket set back. Failures are only logged; the caller
    /// returns the original error.
    fn rollback(self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            log::error!("Could not remove new tickets at {}: {e}", self.dir.display());
            return;
        }
        if let Some(backup) = &self.backup {
            if let Err(e) = std::fs::rename(backup, &self.dir) {
                log::error!(
                    "Could not restore tickets at {} from {}: {e}",
                    self.dir.display(),
                    backup.display()
                );
            }
        }
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Storage(format!("file store task failed: {e}")))?
}

impl FileStore {
    fn dir(&self, namespace: &str) -> PathBuf {
        self.root.join(namespace)
    }

    fn find_assessment_path(&self, call_id: &str) -> Result<Option<PathBuf>> {
        let base = self.dir(ASSESSMENTS);
        for period in list_dirs(&base)? {
            let path = json_path(&base.join(&period), call_id)?;
            if path.exists() {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Store for FileStore {
    async fn load_profile(&self, account_id: &str) -> Result<Option<AccountProfile>> {
        let path = json_path(&self.dir(PROFILES), account_id)?;
        blocking(move || read_json(&path)).await
    }

    async fn save_profile(&self, profile: &AccountProfile) -> Result<()> {
        let path = json_path(&self.dir(PROFILES), &profile.account_id)?;
        let profile = profile.clone();
        blocking(move || write_json_atomic(&path, &profile)).await
    }

    async fn list_profile_ids(&self) -> Result<Vec<String>> {
        let dir = self.dir(PROFILES);
        blocking(move || list_keys(&dir)).await
    }

    async fn save_assessment(&self, assessment: &CallAssessment) -> Result<()> {
        let period = period_key_for(assessment.timestamp);
        let path = json_path(&self.dir(ASSESSMENTS).join(&period), &assessment.call_id)?;
        let assessment = assessment.clone();
        blocking(move || write_json_atomic(&path, &assessment)).await
    }

    async fn save_call(&self, assessment: &CallAssessment, profile: &AccountProfile) -> Result<()> {
        let profile_path = json_path(&self.dir(PROFILES), &profile.account_id)?;
        let period = period_key_for(assessment.timestamp);
        let assessment_path = json_path(&self.dir(ASSESSMENTS).join(&period), &assessment.call_id)?;
        let account_id = profile.account_id.clone();
        let (assessment, profile) = (assessment.clone(), profile.clone());
        blocking(move || {
            let profile_tmp = stage_json(&profile_path, &profile)?;
            let assessment_tmp = stage_json(&assessment_path, &assessment)?;
            let previous = read_bytes(&profile_path)?;
            persist(profile_tmp, &profile_path)?;
            if let Err(e) = persist(assessment_tmp, &assessment_path) {
                if let Err(restore_err) = restore(&profile_path, previous.as_deref()) {
                    log::error!("Could not restore profile {account_id} after a failed save: {restore_err}");
                }
                return Err(e);
            }
            Ok(())
        })
        .await
    }

    async fn load_assessment(&self, call_id: &str) -> Result<Option<CallAssessment>> {
        checked_key(call_id)?;
        let store = self.clone();
        let call_id = call_id.to_string();
        blocking(move || match store.find_assessment_path(&call_id)? {
            Some(path) => read_json(&path),
            None => Ok(None),
        })
        .await
    }

    async fn has_assessment(&self, call_id: &str) -> Result<bool> {
        checked_key(call_id)?;
        let store = self.clone();
        let call_id = call_id.to_string();
        blocking(move || Ok(store.find_assessment_path(&call_id)?.is_some())).await
    }

    async fn load_assessments_for_period(&self, period_key: &str) -> Result<Vec<CallAssessment>> {
        let dir = self.dir(ASSESSMENTS).join(checked_key(period_key)?);
        blocking(move || {
            let mut all: Vec<CallAssessment> = read_all(&dir)?;
            all.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.call_id.cmp(&b.call_id))
            });
            Ok(all)
        })
        .await
    }

    async fn save_rollup(&self, summary: &PeriodSummary, tickets: &[Ticket]) -> Result<()> {
        let summary_path = json_path(&self.dir(SUMMARIES), &summary.period_key)?;
        let tickets_root = self.dir(TICKETS);
        let summary = summary.clone();
        let tickets = tickets.to_vec();
        blocking(move || {
            let summary_tmp = stage_json(&summary_path, &summary)?;
            let staging = stage_tickets(&tickets_root, &tickets)?;
            let swap = swap_ticket_dir(&tickets_root, &summary.period_key, staging)?;
            if let Err(e) = persist(summary_tmp, &summary_path) {
                swap.rollback();
                return Err(e);
            }
            swap.finish()
        })
        .await
    }

    async fn load_summary(&self, period_key: &str) -> Result<Option<PeriodSummary>> {
        let path = json_path(&self.dir(SUMMARIES), period_key)?;
        blocking(move || read_json(&path)).await
    }

    async fn list_summary_periods(&self) -> Result<Vec<String>> {
        let dir = self.dir(SUMMARIES);
        blocking(move || {
            let mut keys = list_keys(&dir)?;
            keys.reverse();
            Ok(keys)
        })
        .await
    }

    async fn load_tickets(&self, period_key: &str) -> Result<Vec<Ticket>> {
        let dir = self.dir(TICKETS).join(checked_key(period_key)?);
        blocking(move || {
            let mut tickets: Vec<Ticket> = read_all(&dir)?;
            tickets.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.ticket_id.cmp(&b.ticket_id))
            });
            Ok(tickets)
        })
        .await
    }

    async fn load_ticket(&self, ticket_id: &str) -> Result<Option<Ticket>> {
        // Ticket ids start with their period key.
        let Some(period) = ticket_id.get(..10) else {
            return Ok(None);
        };
        let path = json_path(&self.dir(TICKETS).join(checked_key(period)?), ticket_id)?;
        blocking(move || read_json(&path)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assessment::{ReportedIssue, Severity};
    use crate::rollup::{aggregate::summarize_period, tickets::generate_tickets};
    use chrono::{TimeZone, Utc};

    fn assessment(call_id: &str, category: &str, hour: u32) -> CallAssessment {
        let ts = Utc.with_ymd_and_hms(2025, 8, 3, hour, 0, 0).unwrap();
        let mut a = CallAssessment::degraded(call_id, call_id, ts, "", None, "");
        a.parse_error = None;
        a.issues.push(ReportedIssue {
            problem: "payment gateway timeout".into(),
            category: category.into(),
            severity: Severity::Critical,
            action: "escalate to payments".into(),
        });
        a
    }

    #[tokio::test]
    async fn test_profile_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.load_profile("acct").await.unwrap().is_none());

        let profile = AccountProfile::new("acct", Utc::now());
        store.save_profile(&profile).await.unwrap();
        assert_eq!(store.load_profile("acct").await.unwrap(), Some(profile));
        assert_eq!(store.list_profile_ids().await.unwrap(), vec!["acct".to_string()]);
    }

    #[tokio::test]
    async fn test_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(matches!(
            store.load_profile("../etc").await,
            Err(Error::InvalidInput(_))
        ));
        assert!(store.load_profile("").await.is_err());
    }

    #[tokio::test]
    async fn test_assessments_by_period_in_time_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save_assessment(&assessment("late", "Payments", 18)).await.unwrap();
        store.save_assessment(&assessment("early", "Payments", 6)).await.unwrap();

        let all = store.load_assessments_for_period("2025-08-03").await.unwrap();
        let ids: Vec<_> = all.iter().map(|a| a.call_id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
        assert!(store.has_assessment("late").await.unwrap());
        assert!(!store.has_assessment("missing").await.unwrap());
        assert!(store.load_assessments_for_period("2025-08-04").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rollup_rerun_replaces_tickets() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let now = Utc::now();

        let first: Vec<_> = (0..3).map(|n| assessment(&format!("a{n}"), "Payments", 9)).collect();
        let summary = summarize_period("2025-08-03", &first, now);
        store.save_rollup(&summary, &generate_tickets(&summary, now)).await.unwrap();
        assert_eq!(store.load_tickets("2025-08-03").await.unwrap().len(), 1);

        let second: Vec<_> = (0..5).map(|n| assessment(&format!("a{n}"), "Billing", 9)).collect();
        let summary = summarize_period("2025-08-03", &second, now);
        store.save_rollup(&summary, &generate_tickets(&summary, now)).await.unwrap();

        let tickets = store.load_tickets("2025-08-03").await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].category, "Billing");
        let one = store.load_ticket(&tickets[0].ticket_id).await.unwrap();
        assert_eq!(one.map(|t| t.issue_count), Some(5));
        assert!(store.load_ticket("2025-08-03-Payments-01").await.unwrap().is_none());
        assert_eq!(store.list_summary_periods().await.unwrap(), vec!["2025-08-03".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_save_call_restores_previous_profile() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let before = AccountProfile::new("acct", Utc::now());
        store.save_profile(&before).await.unwrap();

        // A directory where the assessment file should go makes the final rename fail.
        std::fs::create_dir_all(dir.path().join("assessments/2025-08-03/c1.json")).unwrap();
        let mut after = before.clone();
        after.total_calls = 1;
        assert!(store.save_call(&assessment("c1", "Payments", 9), &after).await.is_err());
        assert_eq!(store.load_profile("acct").await.unwrap(), Some(before));

        let fresh = AccountProfile::new("fresh", Utc::now());
        assert!(store.save_call(&assessment("c1", "Payments", 9), &fresh).await.is_err());
        assert!(store.load_profile("fresh").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_call_writes_nothing_when_staging_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let blocker = dir.path().join("assessments");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let a = assessment("c1", "Payments", 9);
        let profile = AccountProfile::new("c1", Utc::now());
        assert!(store.save_call(&a, &profile).await.is_err());
        assert!(store.load_profile("c1").await.unwrap().is_none());

        std::fs::remove_file(&blocker).unwrap();
        store.save_call(&a, &profile).await.unwrap();
        assert!(store.has_assessment("c1").await.unwrap());
        assert_eq!(store.load_profile("c1").await.unwrap(), Some(profile));
    }

    #[tokio::test]
    async fn test_failed_summary_write_keeps_previous_tickets() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let now = Utc::now();

        let first: Vec<_> = (0..3).map(|n| assessment(&format!("a{n}"), "Payments", 9)).collect();
        let summary = summarize_period("2025-08-03", &first, now);
        store.save_rollup(&summary, &generate_tickets(&summary, now)).await.unwrap();

        let summary_path = dir.path().join("summaries/2025-08-03.json");
        std::fs::remove_file(&summary_path).unwrap();
        std::fs::create_dir(&summary_path).unwrap();

        let second: Vec<_> = (0..5).map(|n| assessment(&format!("a{n}"), "Billing", 9)).collect();
        let summary = summarize_period("2025-08-03", &second, now);
        assert!(store.save_rollup(&summary, &generate_tickets(&summary, now)).await.is_err());

        let tickets = store.load_tickets("2025-08-03").await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].category, "Payments");
        assert!(!dir.path().join("tickets/.old-2025-08-03").exists());
    }
}
