//! Weekly aggregate and goal evaluation.
//!
//! The week map is a derived display view and is never persisted. The
//! goal evaluator is idempotent per week: the achievements table's
//! unique constraint guarantees the bonus is granted at most once even
//! if two evaluations race.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Datelike, Days, NaiveDate, Weekday};
use tracing::info;

use crate::error::StoreError;
use crate::model::{Achievement, CompletionStatus, PointsEntry, TaskKind};
use crate::store::CompletionStore;

/// First day of the week containing `date`, for a week starting on
/// `week_start`.
pub fn week_start_for(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let offset = (date.weekday().num_days_from_monday() + 7
        - week_start.num_days_from_monday())
        % 7;
    date - Days::new(offset as u64)
}

/// Per-day completion booleans for the 7-day window starting at
/// `week_start_date`: true when the day's verified kinds cover all of
/// `required`.
pub fn compute_week(
    verified: &[(NaiveDate, TaskKind)],
    required: &[TaskKind],
    week_start_date: NaiveDate,
) -> [bool; 7] {
    let mut by_day: HashMap<NaiveDate, HashSet<&TaskKind>> = HashMap::new();
    for (date, kind) in verified {
        by_day.entry(*date).or_default().insert(kind);
    }

    let mut week = [false; 7];
    for (i, slot) in week.iter_mut().enumerate() {
        let day = week_start_date + Days::new(i as u64);
        *slot = !required.is_empty()
            && by_day
                .get(&day)
                .is_some_and(|kinds| required.iter().all(|k| kinds.contains(k)));
    }
    week
}

/// Evaluates whether a weekly goal was newly crossed and grants the
/// bonus exactly once per user/family/week.
pub struct WeeklyGoalEvaluator {
    store: Arc<dyn CompletionStore>,
    /// Task kind whose distinct verified days count toward the goal.
    pub goal_kind: TaskKind,
    /// Distinct-day threshold.
    pub goal: u32,
    /// Bonus points granted on achievement.
    pub bonus: i64,
    /// Day the goal week starts on.
    pub week_start: Weekday,
}

impl WeeklyGoalEvaluator {
    pub fn new(
        store: Arc<dyn CompletionStore>,
        goal_kind: TaskKind,
        goal: u32,
        bonus: i64,
        week_start: Weekday,
    ) -> Self {
        Self {
            store,
            goal_kind,
            goal,
            bonus,
            week_start,
        }
    }

    /// Check the goal for the week containing `date`. Returns whether
    /// the achievement was newly recorded (and the bonus granted).
    ///
    /// Counts distinct days with a verified occurrence of the goal kind,
    /// not completion rows; the partial unique index already caps rows
    /// at one per day, but the count is defensive against backfills.
    pub async fn check(
        &self,
        user_id: &str,
        family_id: &str,
        date: NaiveDate,
    ) -> Result<bool, StoreError> {
        let week_start = week_start_for(date, self.week_start);
        let week_end = week_start + Days::new(6);

        let verified = self
            .store
            .query_completions(user_id, week_start, week_end, Some(CompletionStatus::Verified))
            .await?;

        let distinct_days: HashSet<NaiveDate> = verified
            .iter()
            .filter(|c| c.task_kind == self.goal_kind)
            .map(|c| c.completed_date)
            .collect();

        if (distinct_days.len() as u32) < self.goal {
            return Ok(false);
        }

        let achievement = Achievement::new(
            user_id,
            family_id,
            format!("weekly_goal:{}", self.goal_kind),
            week_start,
        );
        if !self.store.insert_achievement(&achievement).await? {
            // Already recorded for this week; nothing to grant.
            return Ok(false);
        }

        self.store
            .insert_points_entry(&PointsEntry::new(
                user_id,
                family_id,
                self.bonus,
                format!("weekly_goal:{}", self.goal_kind),
            ))
            .await?;

        info!(
            user_id = %user_id,
            kind = %self.goal_kind,
            week_start = %week_start,
            bonus = self.bonus,
            "Weekly goal achieved"
        );
        Ok(true)
    }
}
