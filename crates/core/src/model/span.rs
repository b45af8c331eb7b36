use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LlmTraceError, Result};
use crate::ids::RunId;

/// Kind of instrumented unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanKind {
    LlmCall,
    Chain,
    Tool,
    AgentAction,
    GraphNode,
}

impl SpanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LlmCall => "llm_call",
            Self::Chain => "chain",
            Self::Tool => "tool",
            Self::AgentAction => "agent_action",
            Self::GraphNode => "graph_node",
        }
    }
}

impl FromStr for SpanKind {
    type Err = LlmTraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "llm_call" => Ok(Self::LlmCall),
            "chain" => Ok(Self::Chain),
            "tool" => Ok(Self::Tool),
            "agent_action" => Ok(Self::AgentAction),
            "graph_node" => Ok(Self::GraphNode),
            _ => Err(LlmTraceError::Parse(format!("unknown span kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

impl FromStr for SpanStatus {
    type Err = LlmTraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(Self::Ok),
            "error" => Ok(Self::Error),
            _ => Err(LlmTraceError::Parse(format!("unknown span status: {s}"))),
        }
    }
}

/// Closed failure taxonomy. Unmatched errors classify as `Unknown`, never
/// dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    RateLimit,
    InvalidRequest,
    ModelError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::InvalidRequest => "invalid_request",
            Self::ModelError => "model_error",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ErrorKind {
    type Err = LlmTraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "timeout" => Ok(Self::Timeout),
            "rate_limit" => Ok(Self::RateLimit),
            "invalid_request" => Ok(Self::InvalidRequest),
            "model_error" => Ok(Self::ModelError),
            "unknown" => Ok(Self::Unknown),
            _ => Err(LlmTraceError::Parse(format!("unknown error kind: {s}"))),
        }
    }
}

/// One finalized instrumented call. Immutable once constructed: cost and
/// latency are computed exactly once, at finalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpanRecord {
    pub run_id: RunId,
    pub parent_run_id: Option<RunId>,
    pub kind: SpanKind,
    pub name: String,
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub input_text: String,
    pub output_text: String,
    pub model_name: Option<String>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: f64,
    pub status: SpanStatus,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    /// Set when the reported parent run id was not found among in-flight
    /// spans at begin time.
    pub orphaned_parent: bool,
    pub metadata: BTreeMap<String, String>,
}

impl SpanRecord {
    pub fn is_error(&self) -> bool {
        self.status == SpanStatus::Error
    }

    pub fn metadata_json(&self) -> String {
        serde_json::to_string(&self.metadata).unwrap_or_else(|_| "{}".to_string())
    }

    pub fn metadata_from_json(raw: &str) -> BTreeMap<String, String> {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips() {
        for kind in [
            SpanKind::LlmCall,
            SpanKind::Chain,
            SpanKind::Tool,
            SpanKind::AgentAction,
            SpanKind::GraphNode,
        ] {
            assert_eq!(kind.as_str().parse::<SpanKind>().unwrap(), kind);
        }
        assert!("llm".parse::<SpanKind>().is_err());
    }

    #[test]
    fn metadata_json_round_trips() {
        let mut metadata = BTreeMap::new();
        metadata.insert("team".to_string(), "search".to_string());
        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(SpanRecord::metadata_from_json(&json), metadata);
        assert!(SpanRecord::metadata_from_json("not json").is_empty());
    }
}
