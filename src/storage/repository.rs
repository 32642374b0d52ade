use rusqlite::{params, Connection, OptionalExtension};

use crate::assessment::CallAssessment;
use crate::profile::types::AccountProfile;
use crate::rollup::types::{PeriodSummary, Ticket};

// Bodies are JSON produced by the caller; these functions only move rows.

// ── Profiles ───────────────────────────────────────────────────────

pub fn upsert_profile(
    conn: &Connection,
    profile: &AccountProfile,
    body: &str,
) -> Result<(), rusqlite::Error> {
    let status = &profile.current_status;
    conn.execute(
        "INSERT INTO account_profiles (
            account_id, health_score, health_label, needs_attention,
            total_calls, last_call_at, body, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(account_id) DO UPDATE SET
            health_score=excluded.health_score, health_label=excluded.health_label,
            needs_attention=excluded.needs_attention, total_calls=excluded.total_calls,
            last_call_at=excluded.last_call_at, body=excluded.body,
            updated_at=excluded.updated_at",
        params![
            profile.account_id,
            status.health_score,
            status.health_label.as_str(),
            status.needs_attention as i32,
            profile.total_calls as i64,
            profile.last_call_at.map(|t| t.to_rfc3339()),
            body,
            profile.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_profile_body(
    conn: &Connection,
    account_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT body FROM account_profiles WHERE account_id = ?1",
        params![account_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn list_profile_ids(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT account_id FROM account_profiles ORDER BY account_id")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Accounts flagged for attention, lowest health first.
pub fn list_attention_profile_ids(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT account_id FROM account_profiles
         WHERE needs_attention = 1
         ORDER BY health_score ASC, account_id",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

// ── Assessments ────────────────────────────────────────────────────

pub fn upsert_assessment(
    conn: &Connection,
    assessment: &CallAssessment,
    period_key: &str,
    body: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO call_assessments (
            call_id, account_id, period_key, call_ts, is_degraded, body, analyzed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            assessment.call_id,
            assessment.account_id,
            period_key,
            assessment.timestamp.to_rfc3339(),
            assessment.is_degraded() as i32,
            body,
            assessment.analyzed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_assessment_body(
    conn: &Connection,
    call_id: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT body FROM call_assessments WHERE call_id = ?1",
        params![call_id],
        |row| row.get(0),
    )
    .optional()
}

pub fn assessment_exists(conn: &Connection, call_id: &str) -> Result<bool, rusqlite::Error> {
    let found: Option<i32> = conn
        .query_row(
            "SELECT 1 FROM call_assessments WHERE call_id = ?1",
            params![call_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Assessment bodies for one period, oldest call first.
pub fn list_assessment_bodies_for_period(
    conn: &Connection,
    period_key: &str,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT body FROM call_assessments
         WHERE period_key = ?1 ORDER BY call_ts, call_id",
    )?;
    let rows = stmt.query_map(params![period_key], |row| row.get(0))?;
    rows.collect()
}

pub fn count_assessments(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("SELECT COUNT(*) FROM call_assessments", [], |row| row.get(0))
}

// ── Summaries ──────────────────────────────────────────────────────

pub fn upsert_summary(
    conn: &Connection,
    summary: &PeriodSummary,
    body: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO period_summaries (
            period_key, total_calls, total_issues, body, generated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            summary.period_key,
            summary.total_calls as i64,
            summary.total_issues as i64,
            body,
            summary.generated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get_summary_body(
    conn: &Connection,
    period_key: &str,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT body FROM period_summaries WHERE period_key = ?1",
        params![period_key],
        |row| row.get(0),
    )
    .optional()
}

/// Newest period first.
pub fn list_summary_periods(conn: &Connection) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT period_key FROM period_summaries ORDER BY period_key DESC")?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

// ── Tickets ────────────────────────────────────────────────────────

pub fn upsert_ticket(conn: &Connection, ticket: &Ticket, body: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO tickets (
            ticket_id, period_key, category, priority, severity, status, body, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            ticket.ticket_id,
            ticket.period_key,
            ticket.category,
            ticket.priority,
            ticket.severity.as_str(),
            ticket.status.as_str(),
            body,
            ticket.created_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn delete_tickets_for_period(conn: &Connection, period_key: &str) -> Result<usize, rusqlite::Error> {
    conn.execute("DELETE FROM tickets WHERE period_key = ?1", params![period_key])
}

pub fn get_ticket_body(conn: &Connection, ticket_id: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT body FROM tickets WHERE ticket_id = ?1",
        params![ticket_id],
        |row| row.get(0),
    )
    .optional()
}

/// Ticket bodies for one period in priority order.
pub fn list_ticket_bodies_for_period(
    conn: &Connection,
    period_key: &str,
) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(
        "SELECT body FROM tickets WHERE period_key = ?1 ORDER BY priority, ticket_id",
    )?;
    let rows = stmt.query_map(params![period_key], |row| row.get(0))?;
    rows.collect()
}

// ── Config ─────────────────────────────────────────────────────────

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM app_config WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_config(conn: &Connection, key: &str, value: &str) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR REPLACE INTO app_config (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))",
        params![key, value],
    )?;
    Ok(())
}

pub fn list_config(conn: &Connection) -> Result<Vec<(String, String)>, rusqlite::Error> {
    let mut stmt = conn.prepare("SELECT key, value FROM app_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::Utc;

    #[tokio::test]
    async fn test_config_round_trip() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                set_config(conn, "aggregation_threshold", "25")?;
                let val = get_config(conn, "aggregation_threshold")?;
                assert_eq!(val, Some("25".to_string()));

                let missing = get_config(conn, "nonexistent")?;
                assert_eq!(missing, None);

                set_config(conn, "aggregation_threshold", "30")?;
                let all = list_config(conn)?;
                assert_eq!(all, vec![("aggregation_threshold".to_string(), "30".to_string())]);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_profile_upsert_replaces_row() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let mut profile = AccountProfile::new("acct-1", Utc::now());
                upsert_profile(conn, &profile, "{\"v\":1}")?;
                profile.total_calls = 3;
                upsert_profile(conn, &profile, "{\"v\":2}")?;

                assert_eq!(list_profile_ids(conn)?, vec!["acct-1".to_string()]);
                assert_eq!(get_profile_body(conn, "acct-1")?.as_deref(), Some("{\"v\":2}"));
                assert_eq!(get_profile_body(conn, "missing")?, None);

                let calls: i64 = conn.query_row(
                    "SELECT total_calls FROM account_profiles WHERE account_id = 'acct-1'",
                    [],
                    |row| row.get(0),
                )?;
                assert_eq!(calls, 3);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_attention_ids_sorted_by_health() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                for (id, score, flagged) in [("a", 35u8, true), ("b", 10, true), ("c", 90, false)] {
                    let mut p = AccountProfile::new(id, Utc::now());
                    p.current_status.health_score = score;
                    p.current_status.needs_attention = flagged;
                    upsert_profile(conn, &p, "{}")?;
                }
                assert_eq!(list_attention_profile_ids(conn)?, vec!["b", "a"]);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_assessment_exists() {
        let db = Database::open_memory().await.unwrap();

        db.writer()
            .call(|conn| {
                let a = CallAssessment::degraded("call-9", "acct", Utc::now(), "", None, "empty");
                assert!(!assessment_exists(conn, "call-9")?);
                upsert_assessment(conn, &a, "2025-01-01", "{}")?;
                assert!(assessment_exists(conn, "call-9")?);
                assert_eq!(list_assessment_bodies_for_period(conn, "2025-01-01")?.len(), 1);
                assert!(list_assessment_bodies_for_period(conn, "2025-01-02")?.is_empty());
                assert_eq!(count_assessments(conn)?, 1);
                Ok::<(), rusqlite::Error>(())
            })
            .await
            .unwrap();
    }
}
