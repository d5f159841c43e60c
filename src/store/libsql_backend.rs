//! libSQL backend — async `CompletionStore` implementation.
//!
//! Supports local file and in-memory databases. A single
//! `libsql::Connection` is reused for all operations; it is
//! `Send + Sync` and safe for concurrent async use.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Achievement, CompletionDetails, CompletionStatus, PointsEntry, TaskCompletion, TaskKind,
};
use crate::store::migrations;
use crate::store::traits::CompletionStore;

const COMPLETION_COLUMNS: &str = "id, user_id, family_id, task_kind, completed_date, proof_ref, \
     status, verification, details, verified_at, created_at, updated_at";

/// libSQL store backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Connection(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        // libsql enables foreign_keys by default, unlike stock SQLite;
        // the code expects the stock default (REFERENCES not enforced).
        conn.execute("PRAGMA foreign_keys = OFF", ())
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to set pragma: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Connection(format!("Failed to create connection: {e}")))?;

        conn.execute("PRAGMA foreign_keys = OFF", ())
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to set pragma: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::Serialization(format!("Bad date {s}: {e}")))
}

fn parse_status(s: &str) -> Result<CompletionStatus, StoreError> {
    s.parse().map_err(StoreError::Serialization)
}

/// Convert an optional owned string into a libsql value.
fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Detect a uniqueness violation in a libsql error.
fn is_unique_violation(e: &libsql::Error) -> bool {
    e.to_string().contains("UNIQUE constraint failed")
}

/// Map a libsql row to a TaskCompletion. Column order matches
/// `COMPLETION_COLUMNS`.
fn row_to_completion(row: &libsql::Row) -> Result<TaskCompletion, StoreError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StoreError::Query(format!("completion id column: {e}")))?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| StoreError::Serialization(format!("Bad completion id {id_str}: {e}")))?;

    let user_id: String = row.get(1).map_err(row_err)?;
    let family_id: String = row.get(2).map_err(row_err)?;
    let kind_str: String = row.get(3).map_err(row_err)?;
    let date_str: String = row.get(4).map_err(row_err)?;
    let proof_ref: Option<String> = row.get(5).ok();
    let status_str: String = row.get(6).map_err(row_err)?;
    let verification_str: Option<String> = row.get(7).ok();
    let details_str: String = row.get(8).map_err(row_err)?;
    let verified_at_str: Option<String> = row.get(9).ok();
    let created_str: String = row.get(10).map_err(row_err)?;
    let updated_str: String = row.get(11).map_err(row_err)?;

    let verification = verification_str
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StoreError::Serialization(format!("Bad verification JSON: {e}")))?;
    let details: CompletionDetails = serde_json::from_str(&details_str)
        .map_err(|e| StoreError::Serialization(format!("Bad details JSON: {e}")))?;

    Ok(TaskCompletion {
        id,
        user_id,
        family_id,
        task_kind: TaskKind::from(kind_str),
        completed_date: parse_date(&date_str)?,
        proof_ref,
        status: parse_status(&status_str)?,
        verification,
        details,
        verified_at: verified_at_str.as_deref().map(parse_datetime),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_err(e: libsql::Error) -> StoreError {
    StoreError::Query(format!("completion row column: {e}"))
}

#[async_trait]
impl CompletionStore for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Completions ─────────────────────────────────────────────────

    async fn insert_completion(&self, completion: &TaskCompletion) -> Result<(), StoreError> {
        let verification = completion
            .verification
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization(format!("verification JSON: {e}")))?;
        let details = serde_json::to_string(&completion.details)
            .map_err(|e| StoreError::Serialization(format!("details JSON: {e}")))?;

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO completions ({COMPLETION_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
                ),
                params![
                    completion.id.to_string(),
                    completion.user_id.clone(),
                    completion.family_id.clone(),
                    completion.task_kind.to_string(),
                    completion.completed_date.format("%Y-%m-%d").to_string(),
                    opt_text_owned(completion.proof_ref.clone()),
                    completion.status.to_string(),
                    opt_text_owned(verification),
                    details,
                    opt_text_owned(completion.verified_at.map(|t| t.to_rfc3339())),
                    completion.created_at.to_rfc3339(),
                    completion.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Constraint(format!("insert_completion: {e}"))
                } else {
                    StoreError::Query(format!("insert_completion: {e}"))
                }
            })?;

        debug!(
            completion_id = %completion.id,
            task_kind = %completion.task_kind,
            date = %completion.completed_date,
            "Completion inserted"
        );
        Ok(())
    }

    async fn get_completion(&self, id: Uuid) -> Result<Option<TaskCompletion>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {COMPLETION_COLUMNS} FROM completions WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_completion: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_completion(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_completion: {e}"))),
        }
    }

    async fn update_completion_status(
        &self,
        id: Uuid,
        status: CompletionStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE completions SET status = ?1, verified_at = ?2, updated_at = ?3 \
                 WHERE id = ?4",
                params![
                    status.to_string(),
                    opt_text_owned(verified_at.map(|t| t.to_rfc3339())),
                    now,
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Constraint(format!("update_completion_status: {e}"))
                } else {
                    StoreError::Query(format!("update_completion_status: {e}"))
                }
            })?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "completion".into(),
                id: id.to_string(),
            });
        }

        debug!(completion_id = %id, status = %status, "Completion status updated");
        Ok(())
    }

    async fn update_completion_details(
        &self,
        id: Uuid,
        details: &CompletionDetails,
    ) -> Result<(), StoreError> {
        let json = serde_json::to_string(details)
            .map_err(|e| StoreError::Serialization(format!("details JSON: {e}")))?;
        let now = Utc::now().to_rfc3339();

        let affected = self
            .conn()
            .execute(
                "UPDATE completions SET details = ?1, updated_at = ?2 WHERE id = ?3",
                params![json, now, id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("update_completion_details: {e}")))?;

        if affected == 0 {
            return Err(StoreError::NotFound {
                entity: "completion".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_completion(&self, id: Uuid) -> Result<bool, StoreError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM completions WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("delete_completion: {e}")))?;

        Ok(affected > 0)
    }

    async fn query_completions(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        status: Option<CompletionStatus>,
    ) -> Result<Vec<TaskCompletion>, StoreError> {
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();

        let mut rows = match status {
            Some(status) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {COMPLETION_COLUMNS} FROM completions \
                         WHERE user_id = ?1 AND completed_date BETWEEN ?2 AND ?3 \
                         AND status = ?4 ORDER BY completed_date ASC"
                    ),
                    params![user_id, from, to, status.to_string()],
                )
                .await,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {COMPLETION_COLUMNS} FROM completions \
                         WHERE user_id = ?1 AND completed_date BETWEEN ?2 AND ?3 \
                         ORDER BY completed_date ASC"
                    ),
                    params![user_id, from, to],
                )
                .await,
        }
        .map_err(|e| StoreError::Query(format!("query_completions: {e}")))?;

        let mut completions = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            completions.push(row_to_completion(&row)?);
        }
        Ok(completions)
    }

    async fn find_verified(
        &self,
        user_id: &str,
        kind: &TaskKind,
        date: NaiveDate,
    ) -> Result<Option<TaskCompletion>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {COMPLETION_COLUMNS} FROM completions \
                     WHERE user_id = ?1 AND task_kind = ?2 AND completed_date = ?3 \
                     AND status = 'verified'"
                ),
                params![
                    user_id,
                    kind.to_string(),
                    date.format("%Y-%m-%d").to_string()
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("find_verified: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_completion(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("find_verified: {e}"))),
        }
    }

    // ── Points ledger ───────────────────────────────────────────────

    async fn insert_points_entry(&self, entry: &PointsEntry) -> Result<(), StoreError> {
        self.conn()
            .execute(
                "INSERT INTO points_entries \
                 (id, user_id, family_id, points, source, completion_id, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.id.to_string(),
                    entry.user_id.clone(),
                    entry.family_id.clone(),
                    entry.points,
                    entry.source.clone(),
                    opt_text_owned(entry.completion_id.map(|id| id.to_string())),
                    entry.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| StoreError::Query(format!("insert_points_entry: {e}")))?;

        debug!(
            user_id = %entry.user_id,
            points = entry.points,
            source = %entry.source,
            "Points entry recorded"
        );
        Ok(())
    }

    async fn delete_points_for_completion(&self, completion_id: Uuid) -> Result<usize, StoreError> {
        let affected = self
            .conn()
            .execute(
                "DELETE FROM points_entries WHERE completion_id = ?1",
                params![completion_id.to_string()],
            )
            .await
            .map_err(|e| StoreError::Query(format!("delete_points_for_completion: {e}")))?;

        Ok(affected as usize)
    }

    async fn sum_points(&self, user_id: &str) -> Result<i64, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT COALESCE(SUM(points), 0) FROM points_entries WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("sum_points: {e}")))?;

        let total = match rows.next().await {
            Ok(Some(row)) => row
                .get::<i64>(0)
                .map_err(|e| StoreError::Query(format!("sum_points column: {e}")))?,
            Ok(None) => 0,
            Err(e) => return Err(StoreError::Query(format!("sum_points: {e}"))),
        };

        // The ledger itself may dip negative through corrections; the
        // displayed total never does.
        Ok(total.max(0))
    }

    // ── Streak cache ────────────────────────────────────────────────

    async fn upsert_streak_cache(&self, user_id: &str, streak: u32) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO streak_cache (user_id, streak, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT (user_id) DO UPDATE SET streak = ?2, updated_at = ?3",
                params![user_id, streak as i64, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("upsert_streak_cache: {e}")))?;
        Ok(())
    }

    async fn get_streak_cache(&self, user_id: &str) -> Result<Option<u32>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT streak FROM streak_cache WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_streak_cache: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let streak: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("get_streak_cache column: {e}")))?;
                Ok(Some(streak.max(0) as u32))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_streak_cache: {e}"))),
        }
    }

    // ── Achievements ────────────────────────────────────────────────

    async fn insert_achievement(&self, achievement: &Achievement) -> Result<bool, StoreError> {
        let result = self
            .conn()
            .execute(
                "INSERT INTO achievements \
                 (id, user_id, family_id, kind, week_start, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    achievement.id.to_string(),
                    achievement.user_id.clone(),
                    achievement.family_id.clone(),
                    achievement.kind.clone(),
                    achievement.week_start.format("%Y-%m-%d").to_string(),
                    achievement.created_at.to_rfc3339(),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(StoreError::Query(format!("insert_achievement: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VerificationResult;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    async fn backend() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    #[tokio::test]
    async fn completion_round_trips() {
        let store = backend().await;
        let completion = TaskCompletion::new_pending("u1", "f1", TaskKind::Workout, day(5))
            .with_proof_ref("u1/1709600000.jpg")
            .with_verification(VerificationResult::new(true, 0.9, "gym photo", "judge-v2"));

        store.insert_completion(&completion).await.unwrap();
        let loaded = store.get_completion(completion.id).await.unwrap().unwrap();

        assert_eq!(loaded.user_id, "u1");
        assert_eq!(loaded.task_kind, TaskKind::Workout);
        assert_eq!(loaded.completed_date, day(5));
        assert_eq!(loaded.proof_ref.as_deref(), Some("u1/1709600000.jpg"));
        assert_eq!(loaded.status, CompletionStatus::Pending);
        assert_eq!(loaded.verification.unwrap().model, "judge-v2");
        assert!(loaded.verified_at.is_none());
    }

    #[tokio::test]
    async fn second_verified_row_for_slot_is_a_constraint_violation() {
        let store = backend().await;

        let first = TaskCompletion::new_pending("u1", "f1", TaskKind::Workout, day(5));
        store.insert_completion(&first).await.unwrap();
        store
            .update_completion_status(first.id, CompletionStatus::Verified, Some(Utc::now()))
            .await
            .unwrap();

        let second = TaskCompletion::new_pending("u1", "f1", TaskKind::Workout, day(5));
        store.insert_completion(&second).await.unwrap();
        let err = store
            .update_completion_status(second.id, CompletionStatus::Verified, Some(Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint(_)));

        // A different kind on the same day is fine.
        let other = TaskCompletion::new_pending("u1", "f1", TaskKind::Reading, day(5));
        store.insert_completion(&other).await.unwrap();
        store
            .update_completion_status(other.id, CompletionStatus::Verified, Some(Utc::now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rejected_rows_do_not_occupy_the_slot() {
        let store = backend().await;

        let rejected = TaskCompletion::new_pending("u1", "f1", TaskKind::Workout, day(5));
        store.insert_completion(&rejected).await.unwrap();
        store
            .update_completion_status(rejected.id, CompletionStatus::Rejected, None)
            .await
            .unwrap();

        let retry = TaskCompletion::new_pending("u1", "f1", TaskKind::Workout, day(5));
        store.insert_completion(&retry).await.unwrap();
        store
            .update_completion_status(retry.id, CompletionStatus::Verified, Some(Utc::now()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn query_filters_by_range_and_status() {
        let store = backend().await;

        for d in [3, 5, 7] {
            let c = TaskCompletion::new_pending("u1", "f1", TaskKind::Workout, day(d));
            store.insert_completion(&c).await.unwrap();
            if d != 7 {
                store
                    .update_completion_status(c.id, CompletionStatus::Verified, Some(Utc::now()))
                    .await
                    .unwrap();
            }
        }
        // Another user's rows never leak in.
        let other = TaskCompletion::new_pending("u2", "f1", TaskKind::Workout, day(5));
        store.insert_completion(&other).await.unwrap();

        let all = store
            .query_completions("u1", day(1), day(31), None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let verified = store
            .query_completions("u1", day(4), day(31), Some(CompletionStatus::Verified))
            .await
            .unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].completed_date, day(5));
    }

    #[tokio::test]
    async fn points_sum_is_clamped_at_zero() {
        let store = backend().await;

        store
            .insert_points_entry(&PointsEntry::new("u1", "f1", -30, "correction"))
            .await
            .unwrap();
        assert_eq!(store.sum_points("u1").await.unwrap(), 0);

        store
            .insert_points_entry(&PointsEntry::new("u1", "f1", 50, "workout:completed"))
            .await
            .unwrap();
        assert_eq!(store.sum_points("u1").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn points_delete_by_completion_is_exact() {
        let store = backend().await;
        let completion_id = Uuid::new_v4();

        store
            .insert_points_entry(
                &PointsEntry::new("u1", "f1", 10, "workout:completed").for_completion(completion_id),
            )
            .await
            .unwrap();
        store
            .insert_points_entry(&PointsEntry::new("u1", "f1", 20, "weekly_goal:workout"))
            .await
            .unwrap();

        let removed = store
            .delete_points_for_completion(completion_id)
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.sum_points("u1").await.unwrap(), 20);
    }

    #[tokio::test]
    async fn streak_cache_upserts() {
        let store = backend().await;
        assert_eq!(store.get_streak_cache("u1").await.unwrap(), None);

        store.upsert_streak_cache("u1", 4).await.unwrap();
        assert_eq!(store.get_streak_cache("u1").await.unwrap(), Some(4));

        store.upsert_streak_cache("u1", 0).await.unwrap();
        assert_eq!(store.get_streak_cache("u1").await.unwrap(), Some(0));
    }

    #[tokio::test]
    async fn achievement_insert_is_idempotent_per_week() {
        let store = backend().await;

        let first = Achievement::new("u1", "f1", "weekly_goal:workout", day(4));
        assert!(store.insert_achievement(&first).await.unwrap());

        let duplicate = Achievement::new("u1", "f1", "weekly_goal:workout", day(4));
        assert!(!store.insert_achievement(&duplicate).await.unwrap());

        // A different week is a fresh slot.
        let next_week = Achievement::new("u1", "f1", "weekly_goal:workout", day(11));
        assert!(store.insert_achievement(&next_week).await.unwrap());
    }
}
