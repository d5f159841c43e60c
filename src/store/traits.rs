//! Backend-agnostic store trait for the completion workflow.
//!
//! Any transactional row store suffices; exclusivity for the
//! one-verified-row-per-slot invariant comes from the backend's
//! per-row constraints, never from in-process locking.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Achievement, CompletionDetails, CompletionStatus, PointsEntry, TaskCompletion, TaskKind,
};

/// Backend-agnostic store covering completions, points, streak cache,
/// and achievements.
#[async_trait]
pub trait CompletionStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), StoreError>;

    // ── Completions ─────────────────────────────────────────────────

    /// Insert a completion row.
    async fn insert_completion(&self, completion: &TaskCompletion) -> Result<(), StoreError>;

    /// Get a completion by ID.
    async fn get_completion(&self, id: Uuid) -> Result<Option<TaskCompletion>, StoreError>;

    /// Update a completion's status, optionally stamping `verified_at`.
    ///
    /// Transitioning into `Verified` trips the partial unique index when
    /// another `Verified` row already holds the same `(user, kind, date)`
    /// slot; that surfaces as [`StoreError::Constraint`].
    async fn update_completion_status(
        &self,
        id: Uuid,
        status: CompletionStatus,
        verified_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Replace a completion's details map.
    async fn update_completion_details(
        &self,
        id: Uuid,
        details: &CompletionDetails,
    ) -> Result<(), StoreError>;

    /// Delete a completion row. Returns whether a row existed.
    async fn delete_completion(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Query a user's completions in a date range (inclusive), optionally
    /// filtered by status.
    async fn query_completions(
        &self,
        user_id: &str,
        from: NaiveDate,
        to: NaiveDate,
        status: Option<CompletionStatus>,
    ) -> Result<Vec<TaskCompletion>, StoreError>;

    /// Find the verified completion for one `(user, kind, date)` slot.
    async fn find_verified(
        &self,
        user_id: &str,
        kind: &TaskKind,
        date: NaiveDate,
    ) -> Result<Option<TaskCompletion>, StoreError>;

    // ── Points ledger ───────────────────────────────────────────────

    /// Append a ledger entry.
    async fn insert_points_entry(&self, entry: &PointsEntry) -> Result<(), StoreError>;

    /// Delete the entries earned by one completion. Returns the number
    /// of rows removed.
    async fn delete_points_for_completion(&self, completion_id: Uuid) -> Result<usize, StoreError>;

    /// Sum a user's ledger, clamped at a minimum of zero.
    async fn sum_points(&self, user_id: &str) -> Result<i64, StoreError>;

    // ── Streak cache ────────────────────────────────────────────────

    /// Upsert the cached streak value for a user. The cache is derived;
    /// the completion history remains the source of truth.
    async fn upsert_streak_cache(&self, user_id: &str, streak: u32) -> Result<(), StoreError>;

    /// Read the cached streak value, if one has been computed.
    async fn get_streak_cache(&self, user_id: &str) -> Result<Option<u32>, StoreError>;

    // ── Achievements ────────────────────────────────────────────────

    /// Insert an achievement if none exists for its
    /// `(user, family, kind, week_start)` slot. Returns `true` when the
    /// row was newly inserted.
    async fn insert_achievement(&self, achievement: &Achievement) -> Result<bool, StoreError>;
}
