//! Configuration types.

use chrono::Weekday;
use secrecy::SecretString;

use crate::catalog::TaskSpec;
use crate::error::ConfigError;
use crate::model::TaskKind;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Task kinds that must all be verified for a day to count toward a streak.
    pub required_kinds: Vec<TaskKind>,
    /// Declared task specs, built-ins plus family-defined customs.
    pub catalog: Vec<TaskSpec>,
    /// Points granted when a weekly goal is newly achieved.
    pub weekly_bonus: i64,
    /// Task kind the weekly goal counts distinct days for.
    pub weekly_goal_kind: TaskKind,
    /// Distinct verified days needed to hit the weekly goal.
    pub weekly_goal: u32,
    /// Day the display/goal week starts on.
    pub week_start: Weekday,
    /// Streak recompute window, in days back from today.
    pub lookback_days: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            required_kinds: vec![TaskKind::Workout, TaskKind::Reading],
            catalog: vec![TaskSpec::workout(), TaskSpec::reading()],
            weekly_bonus: 20,
            weekly_goal_kind: TaskKind::Workout,
            weekly_goal: 5,
            week_start: Weekday::Mon,
            lookback_days: 365,
        }
    }
}

impl EngineConfig {
    /// Look up the declared spec for a task kind.
    pub fn spec_for(&self, kind: &TaskKind) -> Option<&TaskSpec> {
        self.catalog.iter().find(|s| &s.kind == kind)
    }

    /// Register a family-defined task spec, replacing any existing spec
    /// for the same kind.
    pub fn register_task(&mut self, spec: TaskSpec) {
        self.catalog.retain(|s| s.kind != spec.kind);
        self.catalog.push(spec);
    }
}

/// Verification-service connection settings.
#[derive(Debug, Clone)]
pub struct VerifierConfig {
    /// Endpoint URL for the image-verification service.
    pub endpoint: String,
    /// Bearer token for the service.
    pub api_key: SecretString,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl VerifierConfig {
    /// Read settings from `TASKPROOF_VERIFY_URL` and `TASKPROOF_VERIFY_KEY`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = std::env::var("TASKPROOF_VERIFY_URL")
            .map_err(|_| ConfigError::MissingEnvVar("TASKPROOF_VERIFY_URL".into()))?;
        let api_key = std::env::var("TASKPROOF_VERIFY_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("TASKPROOF_VERIFY_KEY".into()))?;

        let timeout_secs = match std::env::var("TASKPROOF_VERIFY_TIMEOUT_SECS") {
            Ok(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TASKPROOF_VERIFY_TIMEOUT_SECS".into(),
                message: format!("not an integer: {v}"),
            })?,
            Err(_) => 30,
        };

        Ok(Self {
            endpoint,
            api_key: SecretString::from(api_key),
            timeout_secs,
        })
    }
}
