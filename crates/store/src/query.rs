use chrono::NaiveDateTime;
use duckdb::{params, params_from_iter, types::Value};
use tracing::warn;

use llmtrace_core::error::{LlmTraceError, Result};
use llmtrace_core::filter::{SpanFilter, TimeWindow};
use llmtrace_core::ids::RunId;
use llmtrace_core::model::span::SpanRecord;
use llmtrace_core::query::Aggregates;
use llmtrace_metrics::latency::summarize_with_sampling;

use crate::Store;
use crate::fts::query_terms;

/// Above this many matching rows, latency percentiles are computed over a
/// bounded reservoir sample instead of the full set. Error is bounded by the
/// sample size; sums and counts are always exact.
const LATENCY_SAMPLE_THRESHOLD: usize = 100_000;
const LATENCY_SAMPLE_ROWS: usize = 100_000;

const SPAN_COLUMNS: &str = "run_id, parent_run_id, kind, name, session_id, started_at, ended_at, \
     input_text, output_text, model_name, prompt_tokens, completion_tokens, \
     cost_usd, latency_ms, status, error_kind, error_message, orphaned_parent, metadata_json";

impl Store {
    pub fn get_span(&self, run_id: &RunId) -> Result<Option<SpanRecord>> {
        let rows = self.fetch_spans(
            &format!("SELECT {SPAN_COLUMNS} FROM spans WHERE run_id = ?"),
            vec![Value::Text(run_id.as_str().to_string())],
        )?;
        Ok(rows.into_iter().next())
    }

    /// Finalized spans whose start falls in `window`, newest first.
    pub fn recent(&self, window: TimeWindow, limit: usize) -> Result<Vec<SpanRecord>> {
        let (where_sql, mut args) = window_clause(&window);
        args.push(Value::BigInt(limit as i64));
        self.fetch_spans(
            &format!(
                "SELECT {SPAN_COLUMNS} FROM spans {where_sql}
                 ORDER BY started_at DESC LIMIT ?"
            ),
            args,
        )
    }

    /// All spans of one logical session, oldest first.
    pub fn session_spans(&self, session_id: &str) -> Result<Vec<SpanRecord>> {
        self.fetch_spans(
            &format!(
                "SELECT {SPAN_COLUMNS} FROM spans WHERE session_id = ?
                 ORDER BY started_at ASC"
            ),
            vec![Value::Text(session_id.to_string())],
        )
    }

    pub fn recent_errors(&self, limit: usize) -> Result<Vec<SpanRecord>> {
        self.fetch_spans(
            &format!(
                "SELECT {SPAN_COLUMNS} FROM spans WHERE status = 'error'
                 ORDER BY started_at DESC LIMIT ?"
            ),
            vec![Value::BigInt(limit as i64)],
        )
    }

    /// Full-text search over prompt/response text via the inverted index.
    /// Every query term must match (case-insensitive); results are ranked by
    /// summed term frequency, most relevant first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SpanRecord>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; terms.len()].join(", ");
        let sql = format!(
            "SELECT run_id FROM span_terms
             WHERE term IN ({placeholders})
             GROUP BY run_id
             HAVING COUNT(DISTINCT term) = ?
             ORDER BY SUM(tf) DESC, run_id ASC
             LIMIT ?"
        );

        let mut args = terms.into_iter().map(Value::Text).collect::<Vec<_>>();
        let n_terms = args.len() as i64;
        args.push(Value::BigInt(n_terms));
        args.push(Value::BigInt(limit as i64));

        let run_ids = {
            let conn = self.conn();
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| LlmTraceError::Store(format!("prepare search failed: {e}")))?;
            let rows = stmt
                .query_map(params_from_iter(args.iter()), |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| LlmTraceError::Store(format!("query search failed: {e}")))?;

            let mut ids = Vec::new();
            for row in rows {
                ids.push(
                    row.map_err(|e| LlmTraceError::Store(format!("map search row failed: {e}")))?,
                );
            }
            ids
        };

        let mut results = Vec::with_capacity(run_ids.len());
        for id in run_ids {
            let run_id = RunId::parse(&id)
                .map_err(|_| LlmTraceError::Corrupt(format!("invalid run id in index: {id}")))?;
            match self.get_span(&run_id)? {
                Some(span) => results.push(span),
                // Dangling posting: degrade the result set instead of failing
                // the whole query.
                None => warn!(run_id = %run_id, "term posting without span row, skipping"),
            }
        }
        Ok(results)
    }

    /// Windowed/filtered aggregates for the dashboard refresh tick. Sums and
    /// counts come from one indexed scan; percentiles from a second latency
    /// projection, reservoir-sampled above a size threshold.
    pub fn aggregates(&self, filter: &SpanFilter) -> Result<Aggregates> {
        let (where_sql, args) = filter_clause(filter);

        let (span_count, error_count, total_cost, prompt_tokens, completion_tokens) = {
            let conn = self.conn();
            let sql = format!(
                "SELECT COUNT(*),
                        COALESCE(SUM(CASE WHEN status = 'error' THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(cost_usd), 0),
                        COALESCE(SUM(prompt_tokens), 0),
                        COALESCE(SUM(completion_tokens), 0)
                 FROM spans {where_sql}"
            );
            conn.query_row(&sql, params_from_iter(args.iter()), |row| {
                Ok((
                    row.get::<_, i64>(0)? as usize,
                    row.get::<_, i64>(1)? as usize,
                    row.get::<_, f64>(2)?,
                    row.get::<_, i64>(3)? as u64,
                    row.get::<_, i64>(4)? as u64,
                ))
            })
            .map_err(|e| LlmTraceError::Store(format!("aggregate query failed: {e}")))?
        };

        let latency = if span_count == 0 {
            None
        } else {
            let sampled = span_count > LATENCY_SAMPLE_THRESHOLD;
            let sample_sql = if sampled {
                format!(" USING SAMPLE reservoir({LATENCY_SAMPLE_ROWS} ROWS)")
            } else {
                String::new()
            };
            let sql = format!("SELECT latency_ms FROM spans {where_sql}{sample_sql}");

            let samples = {
                let conn = self.conn();
                let mut stmt = conn
                    .prepare(&sql)
                    .map_err(|e| LlmTraceError::Store(format!("prepare latency failed: {e}")))?;
                let rows = stmt
                    .query_map(params_from_iter(args.iter()), |row| row.get::<_, f64>(0))
                    .map_err(|e| LlmTraceError::Store(format!("query latency failed: {e}")))?;

                let mut samples = Vec::new();
                for row in rows {
                    samples.push(row.map_err(|e| {
                        LlmTraceError::Store(format!("map latency row failed: {e}"))
                    })?);
                }
                samples
            };
            summarize_with_sampling(&samples, sampled)
        };

        let error_rate = if span_count == 0 {
            0.0
        } else {
            error_count as f64 / span_count as f64
        };

        Ok(Aggregates {
            span_count,
            error_count,
            error_rate,
            total_cost_usd: total_cost,
            total_prompt_tokens: prompt_tokens,
            total_completion_tokens: completion_tokens,
            latency,
        })
    }

    fn fetch_spans(&self, sql: &str, args: Vec<Value>) -> Result<Vec<SpanRecord>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| LlmTraceError::Store(format!("prepare spans failed: {e}")))?;

        let rows = stmt
            .query_map(params_from_iter(args.iter()), raw_span_from_row)
            .map_err(|e| LlmTraceError::Store(format!("query spans failed: {e}")))?;

        let mut spans = Vec::new();
        for row in rows {
            let raw = row.map_err(|e| LlmTraceError::Store(format!("map span row failed: {e}")))?;
            spans.push(raw.into_record()?);
        }
        Ok(spans)
    }
}

struct RawSpan {
    run_id: String,
    parent_run_id: Option<String>,
    kind: String,
    name: String,
    session_id: Option<String>,
    started_at: NaiveDateTime,
    ended_at: NaiveDateTime,
    input_text: String,
    output_text: String,
    model_name: Option<String>,
    prompt_tokens: i64,
    completion_tokens: i64,
    cost_usd: f64,
    latency_ms: f64,
    status: String,
    error_kind: Option<String>,
    error_message: Option<String>,
    orphaned_parent: bool,
    metadata_json: String,
}

fn raw_span_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<RawSpan> {
    Ok(RawSpan {
        run_id: row.get(0)?,
        parent_run_id: row.get(1)?,
        kind: row.get(2)?,
        name: row.get(3)?,
        session_id: row.get(4)?,
        started_at: row.get(5)?,
        ended_at: row.get(6)?,
        input_text: row.get(7)?,
        output_text: row.get(8)?,
        model_name: row.get(9)?,
        prompt_tokens: row.get(10)?,
        completion_tokens: row.get(11)?,
        cost_usd: row.get(12)?,
        latency_ms: row.get(13)?,
        status: row.get(14)?,
        error_kind: row.get(15)?,
        error_message: row.get(16)?,
        orphaned_parent: row.get(17)?,
        metadata_json: row.get(18)?,
    })
}

impl RawSpan {
    fn into_record(self) -> Result<SpanRecord> {
        let corrupt = |what: &str, value: &str| {
            LlmTraceError::Corrupt(format!("bad {what} in span row: {value}"))
        };

        Ok(SpanRecord {
            run_id: RunId::parse(&self.run_id)
                .map_err(|_| corrupt("run_id", &self.run_id))?,
            parent_run_id: match &self.parent_run_id {
                Some(p) => Some(RunId::parse(p).map_err(|_| corrupt("parent_run_id", p))?),
                None => None,
            },
            kind: self.kind.parse().map_err(|_| corrupt("kind", &self.kind))?,
            name: self.name,
            session_id: self.session_id,
            started_at: self.started_at.and_utc(),
            ended_at: self.ended_at.and_utc(),
            input_text: self.input_text,
            output_text: self.output_text,
            model_name: self.model_name,
            prompt_tokens: self.prompt_tokens.max(0) as u64,
            completion_tokens: self.completion_tokens.max(0) as u64,
            cost_usd: self.cost_usd,
            latency_ms: self.latency_ms,
            status: self
                .status
                .parse()
                .map_err(|_| corrupt("status", &self.status))?,
            error_kind: match &self.error_kind {
                Some(k) => Some(k.parse().map_err(|_| corrupt("error_kind", k))?),
                None => None,
            },
            error_message: self.error_message,
            orphaned_parent: self.orphaned_parent,
            metadata: SpanRecord::metadata_from_json(&self.metadata_json),
        })
    }
}

fn window_clause(window: &TimeWindow) -> (String, Vec<Value>) {
    let mut parts = Vec::new();
    let mut args = Vec::new();
    if let Some(since) = window.since {
        parts.push("started_at >= ?");
        args.push(Value::Text(since.to_rfc3339()));
    }
    if let Some(until) = window.until {
        parts.push("started_at <= ?");
        args.push(Value::Text(until.to_rfc3339()));
    }
    let sql = if parts.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", parts.join(" AND "))
    };
    (sql, args)
}

fn filter_clause(filter: &SpanFilter) -> (String, Vec<Value>) {
    let mut parts = Vec::new();
    let mut args = Vec::new();
    if let Some(since) = filter.window.since {
        parts.push("started_at >= ?");
        args.push(Value::Text(since.to_rfc3339()));
    }
    if let Some(until) = filter.window.until {
        parts.push("started_at <= ?");
        args.push(Value::Text(until.to_rfc3339()));
    }
    if let Some(session) = &filter.session_id {
        parts.push("session_id = ?");
        args.push(Value::Text(session.clone()));
    }
    if let Some(model) = &filter.model_name {
        parts.push("model_name = ?");
        args.push(Value::Text(model.clone()));
    }
    if let Some(kind) = filter.kind {
        parts.push("kind = ?");
        args.push(Value::Text(kind.as_str().to_string()));
    }
    let sql = if parts.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", parts.join(" AND "))
    };
    (sql, args)
}
