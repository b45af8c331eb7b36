use duckdb::params;
use llmtrace_core::error::{LlmTraceError, Result};
use llmtrace_core::model::span::SpanRecord;

use crate::Store;
use crate::fts::term_frequencies;

impl Store {
    /// Persists one finalized span. Idempotent on `run_id`: a duplicate
    /// write updates the row and rebuilds its term postings, tolerating the
    /// adapter's at-least-once delivery.
    pub fn persist(&self, span: &SpanRecord) -> Result<()> {
        self.persist_batch(std::slice::from_ref(span))
    }

    /// Batch write path. One short transaction covers the span rows and
    /// their inverted-index postings; no lock is held across anything else.
    pub fn persist_batch(&self, spans: &[SpanRecord]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| LlmTraceError::Store(format!("begin tx failed: {e}")))?;

        {
            let mut upsert = tx
                .prepare(
                    "INSERT OR REPLACE INTO spans
                     (run_id, parent_run_id, kind, name, session_id, started_at, ended_at,
                      input_text, output_text, model_name, prompt_tokens, completion_tokens,
                      cost_usd, latency_ms, status, error_kind, error_message, orphaned_parent,
                      metadata_json)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .map_err(|e| LlmTraceError::Store(format!("prepare upsert span failed: {e}")))?;
            let mut clear_terms = tx
                .prepare("DELETE FROM span_terms WHERE run_id = ?")
                .map_err(|e| LlmTraceError::Store(format!("prepare clear terms failed: {e}")))?;
            let mut insert_term = tx
                .prepare("INSERT INTO span_terms (term, run_id, tf) VALUES (?, ?, ?)")
                .map_err(|e| LlmTraceError::Store(format!("prepare insert term failed: {e}")))?;

            for span in spans {
                upsert
                    .execute(params![
                        span.run_id.as_str(),
                        span.parent_run_id.as_ref().map(|p| p.as_str()),
                        span.kind.as_str(),
                        span.name,
                        span.session_id,
                        span.started_at.to_rfc3339(),
                        span.ended_at.to_rfc3339(),
                        span.input_text,
                        span.output_text,
                        span.model_name,
                        span.prompt_tokens as i64,
                        span.completion_tokens as i64,
                        span.cost_usd,
                        span.latency_ms,
                        span.status.as_str(),
                        span.error_kind.map(|k| k.as_str()),
                        span.error_message,
                        span.orphaned_parent,
                        span.metadata_json(),
                    ])
                    .map_err(|e| LlmTraceError::Store(format!("upsert span failed: {e}")))?;

                clear_terms
                    .execute(params![span.run_id.as_str()])
                    .map_err(|e| LlmTraceError::Store(format!("clear terms failed: {e}")))?;

                for (term, tf) in term_frequencies(&[&span.input_text, &span.output_text]) {
                    insert_term
                        .execute(params![term, span.run_id.as_str(), tf])
                        .map_err(|e| LlmTraceError::Store(format!("insert term failed: {e}")))?;
                }
            }
        }

        tx.commit()
            .map_err(|e| LlmTraceError::Store(format!("commit spans failed: {e}")))
    }
}
