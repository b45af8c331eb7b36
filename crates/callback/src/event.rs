use std::collections::BTreeMap;

use llmtrace_core::ids::RunId;
use llmtrace_core::model::span::SpanKind;

/// One lifecycle transition reported by the orchestration framework, already
/// validated into a tagged variant at this boundary. No untyped payloads
/// travel past this point.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Start {
        run_id: RunId,
        parent_run_id: Option<RunId>,
        kind: SpanKind,
        name: String,
        model_name: Option<String>,
        input: String,
        session_id: Option<String>,
        metadata: BTreeMap<String, String>,
    },
    End {
        run_id: RunId,
        output: String,
        prompt_tokens: Option<u64>,
        completion_tokens: Option<u64>,
    },
    Fail {
        run_id: RunId,
        error_kind_hint: Option<String>,
        error_message: String,
    },
}

impl LifecycleEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Start { run_id, .. } | Self::End { run_id, .. } | Self::Fail { run_id, .. } => {
                run_id
            }
        }
    }
}
