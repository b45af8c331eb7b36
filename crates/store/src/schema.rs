pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS spans (
  run_id TEXT PRIMARY KEY,
  parent_run_id TEXT,
  kind TEXT NOT NULL,
  name TEXT NOT NULL,
  session_id TEXT,
  started_at TIMESTAMP NOT NULL,
  ended_at TIMESTAMP NOT NULL,
  input_text TEXT NOT NULL,
  output_text TEXT NOT NULL,
  model_name TEXT,
  prompt_tokens BIGINT NOT NULL,
  completion_tokens BIGINT NOT NULL,
  cost_usd DOUBLE NOT NULL,
  latency_ms DOUBLE NOT NULL,
  status TEXT NOT NULL,
  error_kind TEXT,
  error_message TEXT,
  orphaned_parent BOOLEAN NOT NULL,
  metadata_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS span_terms (
  term TEXT NOT NULL,
  run_id TEXT NOT NULL,
  tf INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_spans_started ON spans(started_at);
CREATE INDEX IF NOT EXISTS idx_spans_ended ON spans(ended_at);
CREATE INDEX IF NOT EXISTS idx_spans_session ON spans(session_id);
CREATE INDEX IF NOT EXISTS idx_spans_model ON spans(model_name);
CREATE INDEX IF NOT EXISTS idx_spans_status ON spans(status);
CREATE INDEX IF NOT EXISTS idx_spans_parent ON spans(parent_run_id);

CREATE INDEX IF NOT EXISTS idx_terms_term ON span_terms(term);
CREATE INDEX IF NOT EXISTS idx_terms_run ON span_terms(run_id);
"#;
