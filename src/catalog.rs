//! Task catalog — declared task specs and metric-schema validation.
//!
//! Replaces the duck-typed string maps of the original screens with a
//! closed set of built-in task kinds plus schema-described custom tasks
//! validated at the boundary.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::model::{CompletionDetails, TaskKind};

/// Value type a metric accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// JSON number, or a string that parses as one.
    Number,
    Text,
    Boolean,
}

impl std::fmt::Display for MetricType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number => write!(f, "number"),
            Self::Text => write!(f, "text"),
            Self::Boolean => write!(f, "boolean"),
        }
    }
}

/// One declared metric on a task (name, type, required flag, unit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub name: String,
    pub metric_type: MetricType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl MetricSpec {
    pub fn number(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            metric_type: MetricType::Number,
            required,
            unit: None,
        }
    }

    pub fn text(name: impl Into<String>, required: bool) -> Self {
        Self {
            name: name.into(),
            metric_type: MetricType::Text,
            required,
            unit: None,
        }
    }

    /// Builder: attach a display unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// A task's declared shape: award size, judge instruction, metric schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub kind: TaskKind,
    /// Points granted on finalize.
    pub points_award: i64,
    /// Instruction text sent to the verification service with proof images.
    pub verification_prompt: String,
    /// Declared metrics. Empty means details are free-form.
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

impl TaskSpec {
    /// Built-in workout task.
    pub fn workout() -> Self {
        Self {
            kind: TaskKind::Workout,
            points_award: 10,
            verification_prompt: "Does this photo show evidence of a completed workout \
                 (gym equipment, exercise in progress, or a fitness tracker summary)?"
                .into(),
            metrics: vec![
                MetricSpec::number("duration_minutes", false).with_unit("min"),
                MetricSpec::text("notes", false),
            ],
        }
    }

    /// Built-in reading task.
    pub fn reading() -> Self {
        Self {
            kind: TaskKind::Reading,
            points_award: 10,
            verification_prompt: "Does this photo show evidence of reading \
                 (an open book, e-reader, or reading log)?"
                .into(),
            metrics: vec![
                MetricSpec::number("pages", false),
                MetricSpec::text("book_title", false),
            ],
        }
    }

    /// Validate captured details against this spec's metric schema.
    ///
    /// Required metrics must be present, typed metrics must match, and
    /// unknown keys are rejected once a schema is declared. Specs with no
    /// declared metrics accept anything.
    pub fn validate_details(&self, details: &CompletionDetails) -> Result<(), ValidationError> {
        if self.metrics.is_empty() {
            return Ok(());
        }

        for spec in &self.metrics {
            match details.get(&spec.name) {
                None | Some(serde_json::Value::Null) if spec.required => {
                    return Err(ValidationError::MissingRequired {
                        name: spec.name.clone(),
                    });
                }
                None | Some(serde_json::Value::Null) => {}
                Some(value) => check_type(spec, value)?,
            }
        }

        for key in details.keys() {
            if !self.metrics.iter().any(|m| &m.name == key) {
                return Err(ValidationError::UnknownMetric { name: key.clone() });
            }
        }

        Ok(())
    }
}

fn check_type(spec: &MetricSpec, value: &serde_json::Value) -> Result<(), ValidationError> {
    let ok = match spec.metric_type {
        MetricType::Number => match value {
            serde_json::Value::Number(_) => true,
            // Numeric strings are accepted; form inputs arrive as text.
            serde_json::Value::String(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        },
        MetricType::Text => value.is_string(),
        MetricType::Boolean => value.is_boolean(),
    };

    if ok {
        Ok(())
    } else {
        Err(ValidationError::WrongType {
            name: spec.name.clone(),
            expected: spec.metric_type.to_string(),
            got: json_type_name(value).to_string(),
        })
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
