use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Pipeline stages in their canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classification,
    XmlParsing,
    Ocr,
    LayoutAnalysis,
    EntityExtraction,
    Validation,
    Storage,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Classification,
        Stage::XmlParsing,
        Stage::Ocr,
        Stage::LayoutAnalysis,
        Stage::EntityExtraction,
        Stage::Validation,
        Stage::Storage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classification => "classification",
            Stage::XmlParsing => "xml_parsing",
            Stage::Ocr => "ocr",
            Stage::LayoutAnalysis => "layout_analysis",
            Stage::EntityExtraction => "entity_extraction",
            Stage::Validation => "validation",
            Stage::Storage => "storage",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    /// Only validation ends this way; the job carries on.
    Partial,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Partial => "partial",
            StageStatus::Failed => "failed",
        }
    }
}

impl FromStr for StageStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(StageStatus::Success),
            "partial" => Ok(StageStatus::Partial),
            "failed" => Ok(StageStatus::Failed),
            other => Err(format!("unknown stage status '{}'", other)),
        }
    }
}

/// One stage execution. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageRecord {
    pub job_id: String,
    pub stage: Stage,
    pub status: StageStatus,
    /// Stage-defined summary.
    pub output: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(serialize_with = "serialize_millis", rename = "duration_ms")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    pub created_at: DateTime<Utc>,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

/// What a stage hands back to the runner on success.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub summary: Map<String, Value>,
    pub tokens_used: Option<u64>,
    pub cost_usd: Option<f64>,
}

impl StageOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.summary.insert(key.to_string(), value.into());
        self
    }

    pub fn with_usage(mut self, tokens_used: u64, cost_usd: f64) -> Self {
        self.tokens_used = Some(tokens_used);
        self.cost_usd = Some(cost_usd);
        self
    }
}
