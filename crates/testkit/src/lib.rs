//! Shared fixtures for llmtrace tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, TimeZone, Utc};

use llmtrace_context::SpanStart;
use llmtrace_core::ids::RunId;
use llmtrace_core::model::span::{ErrorKind, SpanKind, SpanRecord, SpanStatus};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
}

/// A finished ok span with the given prompt/response text, started
/// `offset_secs` after the fixed base time.
pub fn finished_span(run_id: &str, input: &str, output: &str, offset_secs: i64) -> SpanRecord {
    let started_at = base_time() + Duration::seconds(offset_secs);
    let ended_at = started_at + Duration::milliseconds(100);
    SpanRecord {
        run_id: RunId::parse(run_id).unwrap(),
        parent_run_id: None,
        kind: SpanKind::LlmCall,
        name: format!("llm_{run_id}"),
        session_id: None,
        started_at,
        ended_at,
        input_text: input.to_string(),
        output_text: output.to_string(),
        model_name: Some("llama3-8b-8192".to_string()),
        prompt_tokens: 0,
        completion_tokens: 0,
        cost_usd: 0.0,
        latency_ms: 100.0,
        status: SpanStatus::Ok,
        error_kind: None,
        error_message: None,
        orphaned_parent: false,
        metadata: BTreeMap::new(),
    }
}

/// A finished ok span with explicit start time (ends one second later).
pub fn span_at(run_id: &str, started_at: DateTime<Utc>) -> SpanRecord {
    let mut span = finished_span(run_id, "", "", 0);
    span.started_at = started_at;
    span.ended_at = started_at + Duration::seconds(1);
    span.latency_ms = 1000.0;
    span
}

/// A failed span classified from the given message.
pub fn failed_span(run_id: &str, message: &str) -> SpanRecord {
    let mut span = finished_span(run_id, "", "", 0);
    span.status = SpanStatus::Error;
    span.error_kind = Some(ErrorKind::Unknown);
    span.error_message = Some(message.to_string());
    span
}

/// Begin-arguments for a tool span, for driving a `TraceContext` in tests.
pub fn tool_start(run_id: &str, parent: Option<&str>) -> SpanStart {
    SpanStart {
        run_id: RunId::parse(run_id).unwrap(),
        parent_run_id: parent.map(|p| RunId::parse(p).unwrap()),
        kind: SpanKind::Tool,
        name: format!("tool_{run_id}"),
        model_name: None,
        input_text: String::new(),
        session_id: None,
        metadata: BTreeMap::new(),
    }
}
