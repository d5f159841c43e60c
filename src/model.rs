//! Core data model — completions, verification results, points entries.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a verification reason, in characters.
pub const MAX_REASON_CHARS: usize = 200;

/// The kind of task a completion satisfies.
///
/// The two built-in kinds are the required pair for streak purposes;
/// `Custom` covers family-defined task templates registered in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TaskKind {
    Workout,
    Reading,
    Custom(String),
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Workout => write!(f, "workout"),
            Self::Reading => write!(f, "reading"),
            Self::Custom(name) => write!(f, "{name}"),
        }
    }
}

impl From<String> for TaskKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "workout" => Self::Workout,
            "reading" => Self::Reading,
            _ => Self::Custom(s),
        }
    }
}

impl From<&str> for TaskKind {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<TaskKind> for String {
    fn from(kind: TaskKind) -> Self {
        kind.to_string()
    }
}

/// Lifecycle status of a completion attempt.
///
/// A completion is created `Pending`, transitions exactly once to
/// `Verified` or `Rejected`, and is never resurrected — undoing a
/// finalized completion deletes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Pending,
    Verified,
    Rejected,
}

impl std::fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Verified => write!(f, "verified"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

impl std::str::FromStr for CompletionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            _ => Err(format!("Unknown completion status: {s}")),
        }
    }
}

/// Outcome of an AI judgment or manual override.
///
/// `model` is provenance metadata (`"manual"`, `"manual-override"`, or a
/// model name), not a security boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub is_verified: bool,
    /// Judge confidence, clamped to `[0, 1]`.
    pub confidence: f64,
    /// Human-readable explanation, truncated to [`MAX_REASON_CHARS`].
    pub reason: String,
    pub model: String,
}

impl VerificationResult {
    /// Build a result, clamping confidence and bounding the reason.
    pub fn new(
        is_verified: bool,
        confidence: f64,
        reason: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        let mut reason: String = reason.into();
        if reason.chars().count() > MAX_REASON_CHARS {
            reason = reason.chars().take(MAX_REASON_CHARS).collect();
        }
        Self {
            is_verified,
            confidence: confidence.clamp(0.0, 1.0),
            reason,
            model: model.into(),
        }
    }

    /// Synthetic result for completions submitted without evidence.
    pub fn no_evidence() -> Self {
        Self::new(true, 1.0, "no evidence required", "manual")
    }

    /// Degraded result used when the user continues past a failed judgment.
    pub fn degraded() -> Self {
        Self::new(
            true,
            0.0,
            "verification unavailable, user override",
            "manual-override",
        )
    }
}

/// Task-specific metrics captured at detail-capture time.
pub type CompletionDetails = BTreeMap<String, serde_json::Value>;

/// One attempt to satisfy a task on a specific calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub id: Uuid,
    pub user_id: String,
    pub family_id: String,
    pub task_kind: TaskKind,
    /// Calendar day the task was done, not a timestamp.
    pub completed_date: NaiveDate,
    /// Reference to an uploaded proof image; absent for no-evidence completions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_ref: Option<String>,
    pub status: CompletionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(default)]
    pub details: CompletionDetails,
    /// Set only on the transition into `Verified`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskCompletion {
    /// Create a new pending completion.
    pub fn new_pending(
        user_id: impl Into<String>,
        family_id: impl Into<String>,
        task_kind: TaskKind,
        completed_date: NaiveDate,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            family_id: family_id.into(),
            task_kind,
            completed_date,
            proof_ref: None,
            status: CompletionStatus::Pending,
            verification: None,
            details: CompletionDetails::new(),
            verified_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: attach a proof image reference.
    pub fn with_proof_ref(mut self, proof_ref: impl Into<String>) -> Self {
        self.proof_ref = Some(proof_ref.into());
        self
    }

    /// Builder: attach a verification result.
    pub fn with_verification(mut self, verification: VerificationResult) -> Self {
        self.verification = Some(verification);
        self
    }

    /// Builder: set the status.
    pub fn with_status(mut self, status: CompletionStatus) -> Self {
        self.status = status;
        self
    }
}

/// Immutable points ledger row.
///
/// A user's total is always the sum of their entries; there is no mutable
/// running-total column that could drift from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsEntry {
    pub id: Uuid,
    pub user_id: String,
    pub family_id: String,
    /// Signed award; negative entries are corrections.
    pub points: i64,
    /// Free-text tag keyed to a task kind and action, e.g. `workout:completed`.
    pub source: String,
    /// The completion that earned these points, if any. Reversal on
    /// mark-incomplete deletes exactly the entries keyed here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl PointsEntry {
    pub fn new(
        user_id: impl Into<String>,
        family_id: impl Into<String>,
        points: i64,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            family_id: family_id.into(),
            points,
            source: source.into(),
            completion_id: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: link to the completion that earned the points.
    pub fn for_completion(mut self, completion_id: Uuid) -> Self {
        self.completion_id = Some(completion_id);
        self
    }
}

/// A recorded weekly-goal achievement. One row per user/family/kind/week;
/// the unique constraint is what makes the bonus grant idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: Uuid,
    pub user_id: String,
    pub family_id: String,
    /// Achievement kind tag, e.g. `weekly_goal:workout`.
    pub kind: String,
    /// First day of the week the achievement covers.
    pub week_start: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Achievement {
    pub fn new(
        user_id: impl Into<String>,
        family_id: impl Into<String>,
        kind: impl Into<String>,
        week_start: NaiveDate,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            family_id: family_id.into(),
            kind: kind.into(),
            week_start,
            created_at: Utc::now(),
        }
    }
}
