//! In-flight span tracking.
//!
//! Maps a stream of asynchronous begin/end/fail notifications, keyed by
//! opaque run ids, into correctly nested [`SpanRecord`]s. The map is sharded
//! so operations on distinct run ids do not contend; operations on a single
//! run id linearize on its shard lock. Once a span is finalized it leaves
//! this map for good — long-term ownership belongs to the store.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use llmtrace_core::error::{LlmTraceError, Result};
use llmtrace_core::ids::RunId;
use llmtrace_core::model::span::{SpanKind, SpanRecord, SpanStatus};
use llmtrace_core::pricing::PricingTable;
use llmtrace_core::time::duration_ms;
use llmtrace_metrics::errors::classify;

const SHARD_COUNT: usize = 16;

/// Arguments for registering a new in-flight span.
#[derive(Debug, Clone)]
pub struct SpanStart {
    pub run_id: RunId,
    pub parent_run_id: Option<RunId>,
    pub kind: SpanKind,
    pub name: String,
    pub model_name: Option<String>,
    pub input_text: String,
    pub session_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounts {
    pub prompt: u64,
    pub completion: u64,
}

#[derive(Debug, Clone)]
struct InFlightSpan {
    start: SpanStart,
    started_at: DateTime<Utc>,
    orphaned_parent: bool,
}

/// An in-flight span older than the leak threshold; the upstream framework
/// never delivered its end/fail event.
#[derive(Debug, Clone)]
pub struct LeakedSpan {
    pub run_id: RunId,
    pub kind: SpanKind,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub age: Duration,
}

/// The in-flight map. Explicit instance, no process-wide singleton: tests
/// and independent pipelines get their own.
pub struct TraceContext {
    shards: Vec<Mutex<HashMap<RunId, InFlightSpan>>>,
    pricing: Arc<PricingTable>,
}

impl TraceContext {
    pub fn new(pricing: Arc<PricingTable>) -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(HashMap::new())).collect(),
            pricing,
        }
    }

    fn shard(&self, run_id: &RunId) -> &Mutex<HashMap<RunId, InFlightSpan>> {
        let mut hasher = DefaultHasher::new();
        run_id.hash(&mut hasher);
        &self.shards[hasher.finish() as usize % SHARD_COUNT]
    }

    fn lock(
        &self,
        run_id: &RunId,
    ) -> std::sync::MutexGuard<'_, HashMap<RunId, InFlightSpan>> {
        match self.shard(run_id).lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Registers a new in-flight span at the current time.
    pub fn begin(&self, start: SpanStart) -> Result<()> {
        self.begin_at(start, Utc::now())
    }

    /// Registers a new in-flight span with an explicit start timestamp.
    ///
    /// A parent run id that is not currently in flight flags the span as
    /// orphaned instead of rejecting it: upstream frameworks report parents
    /// that already completed due to internal pipelining. A duplicate begin
    /// for a live run id keeps the original registration and errors.
    pub fn begin_at(&self, start: SpanStart, started_at: DateTime<Utc>) -> Result<()> {
        let orphaned_parent = match &start.parent_run_id {
            Some(parent) => {
                let found = self.lock(parent).contains_key(parent);
                if !found {
                    warn!(
                        run_id = %start.run_id,
                        parent_run_id = %parent,
                        "parent not in flight, span flagged as orphaned"
                    );
                }
                !found
            }
            None => false,
        };

        let mut shard = self.lock(&start.run_id);
        if shard.contains_key(&start.run_id) {
            return Err(LlmTraceError::DuplicateRun(start.run_id.to_string()));
        }
        shard.insert(
            start.run_id.clone(),
            InFlightSpan {
                start,
                started_at,
                orphaned_parent,
            },
        );
        Ok(())
    }

    /// Finalizes a span successfully, computing latency and cost exactly
    /// once, and returns the immutable record. `UnknownRun` for a run id
    /// never begun (or already finalized).
    pub fn end(
        &self,
        run_id: &RunId,
        output: String,
        token_counts: Option<TokenCounts>,
    ) -> Result<SpanRecord> {
        self.end_at(run_id, output, token_counts, Utc::now())
    }

    pub fn end_at(
        &self,
        run_id: &RunId,
        output: String,
        token_counts: Option<TokenCounts>,
        ended_at: DateTime<Utc>,
    ) -> Result<SpanRecord> {
        let in_flight = self
            .lock(run_id)
            .remove(run_id)
            .ok_or_else(|| LlmTraceError::UnknownRun(run_id.to_string()))?;

        Ok(self.finalize(in_flight, ended_at, output, token_counts, SpanStatus::Ok, None))
    }

    /// Same finalization path as `end` with status `error`. The failing call
    /// still consumed wall-clock time, so latency is computed; token counts
    /// are usually unknown at failure, which means zero cost, not an error.
    pub fn fail(
        &self,
        run_id: &RunId,
        error_kind_hint: Option<&str>,
        error_message: &str,
    ) -> Result<SpanRecord> {
        self.fail_at(run_id, error_kind_hint, error_message, None, Utc::now())
    }

    pub fn fail_at(
        &self,
        run_id: &RunId,
        error_kind_hint: Option<&str>,
        error_message: &str,
        token_counts: Option<TokenCounts>,
        ended_at: DateTime<Utc>,
    ) -> Result<SpanRecord> {
        let in_flight = self
            .lock(run_id)
            .remove(run_id)
            .ok_or_else(|| LlmTraceError::UnknownRun(run_id.to_string()))?;

        let kind = classify(error_kind_hint, error_message);
        let mut record = self.finalize(
            in_flight,
            ended_at,
            String::new(),
            token_counts,
            SpanStatus::Error,
            Some(error_message.to_string()),
        );
        record.error_kind = Some(kind);
        Ok(record)
    }

    fn finalize(
        &self,
        in_flight: InFlightSpan,
        ended_at: DateTime<Utc>,
        output: String,
        token_counts: Option<TokenCounts>,
        status: SpanStatus,
        error_message: Option<String>,
    ) -> SpanRecord {
        let InFlightSpan {
            start,
            started_at,
            orphaned_parent,
        } = in_flight;

        let tokens = token_counts.unwrap_or_default();
        let cost_usd = match &start.model_name {
            Some(model) => self.pricing.cost(model, tokens.prompt, tokens.completion),
            None => 0.0,
        };

        SpanRecord {
            run_id: start.run_id,
            parent_run_id: start.parent_run_id,
            kind: start.kind,
            name: start.name,
            session_id: start.session_id,
            started_at,
            ended_at,
            input_text: start.input_text,
            output_text: output,
            model_name: start.model_name,
            prompt_tokens: tokens.prompt,
            completion_tokens: tokens.completion,
            cost_usd,
            latency_ms: duration_ms(started_at, ended_at),
            status,
            error_kind: None,
            error_message,
            orphaned_parent,
            metadata: start.metadata,
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| match s.lock() {
                Ok(guard) => guard.len(),
                Err(poisoned) => poisoned.into_inner().len(),
            })
            .sum()
    }

    /// Spans in flight longer than `threshold`: the upstream framework never
    /// reported their completion. A derived anomaly, not a failure.
    pub fn leaked(&self, threshold: Duration) -> Vec<LeakedSpan> {
        let now = Utc::now();
        let mut leaked = Vec::new();
        for shard in &self.shards {
            let guard = match shard.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            for span in guard.values() {
                let age = (now - span.started_at).to_std().unwrap_or_default();
                if age >= threshold {
                    leaked.push(LeakedSpan {
                        run_id: span.start.run_id.clone(),
                        kind: span.start.kind,
                        name: span.start.name.clone(),
                        started_at: span.started_at,
                        age,
                    });
                }
            }
        }
        leaked.sort_by_key(|l| l.started_at);
        leaked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ctx() -> TraceContext {
        TraceContext::new(Arc::new(PricingTable::default()))
    }

    fn start(run_id: &str) -> SpanStart {
        SpanStart {
            run_id: RunId::parse(run_id).unwrap(),
            parent_run_id: None,
            kind: SpanKind::LlmCall,
            name: format!("llm_{run_id}"),
            model_name: Some("llama3-70b-8192".to_string()),
            input_text: "what is observability?".to_string(),
            session_id: None,
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn begin_end_round_trip() {
        let ctx = ctx();
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        ctx.begin_at(start("r1"), t0).unwrap();
        assert_eq!(ctx.in_flight_count(), 1);

        let record = ctx
            .end_at(
                &RunId::parse("r1").unwrap(),
                "it is watching".to_string(),
                Some(TokenCounts {
                    prompt: 1000,
                    completion: 1000,
                }),
                t0 + chrono::Duration::milliseconds(250),
            )
            .unwrap();

        assert_eq!(ctx.in_flight_count(), 0);
        assert_eq!(record.latency_ms, 250.0);
        assert_eq!(record.status, SpanStatus::Ok);
        // 1000/1000 * 0.00059 + 1000/1000 * 0.00079
        assert_eq!(record.cost_usd, 0.0014);
        assert!(record.ended_at >= record.started_at);
    }

    #[test]
    fn end_of_unknown_run_errors() {
        let ctx = ctx();
        let err = ctx
            .end(&RunId::parse("missing").unwrap(), String::new(), None)
            .unwrap_err();
        assert!(matches!(err, LlmTraceError::UnknownRun(_)));
    }

    #[test]
    fn duplicate_end_errors_second_time() {
        let ctx = ctx();
        ctx.begin(start("r1")).unwrap();
        let run = RunId::parse("r1").unwrap();
        ctx.end(&run, String::new(), None).unwrap();
        assert!(matches!(
            ctx.end(&run, String::new(), None),
            Err(LlmTraceError::UnknownRun(_))
        ));
    }

    #[test]
    fn duplicate_begin_keeps_original() {
        let ctx = ctx();
        ctx.begin(start("r1")).unwrap();
        assert!(matches!(
            ctx.begin(start("r1")),
            Err(LlmTraceError::DuplicateRun(_))
        ));
        assert_eq!(ctx.in_flight_count(), 1);
    }

    #[test]
    fn missing_parent_flags_orphan_but_registers() {
        let ctx = ctx();
        let mut child = start("child");
        child.parent_run_id = Some(RunId::parse("gone").unwrap());
        ctx.begin(child).unwrap();

        let record = ctx
            .end(&RunId::parse("child").unwrap(), String::new(), None)
            .unwrap();
        assert!(record.orphaned_parent);
        assert_eq!(
            record.parent_run_id,
            Some(RunId::parse("gone").unwrap())
        );
    }

    #[test]
    fn live_parent_is_not_orphaned() {
        let ctx = ctx();
        ctx.begin(start("parent")).unwrap();
        let mut child = start("child");
        child.parent_run_id = Some(RunId::parse("parent").unwrap());
        ctx.begin(child).unwrap();

        let record = ctx
            .end(&RunId::parse("child").unwrap(), String::new(), None)
            .unwrap();
        assert!(!record.orphaned_parent);
    }

    #[test]
    fn fail_classifies_and_keeps_latency() {
        let ctx = ctx();
        let t0 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        ctx.begin_at(start("r1"), t0).unwrap();

        let record = ctx
            .fail_at(
                &RunId::parse("r1").unwrap(),
                None,
                "request timed out after 30s",
                None,
                t0 + chrono::Duration::seconds(30),
            )
            .unwrap();

        assert_eq!(record.status, SpanStatus::Error);
        assert_eq!(
            record.error_kind,
            Some(llmtrace_core::model::span::ErrorKind::Timeout)
        );
        assert_eq!(record.latency_ms, 30_000.0);
        assert_eq!(record.cost_usd, 0.0);
    }

    #[test]
    fn concurrent_interleavings_produce_unique_finalized_spans() {
        let ctx = Arc::new(ctx());
        let mut handles = Vec::new();
        for t in 0..8 {
            let ctx = Arc::clone(&ctx);
            handles.push(std::thread::spawn(move || {
                let mut records = Vec::new();
                for i in 0..50 {
                    let id = format!("run-{t}-{i}");
                    ctx.begin(SpanStart {
                        run_id: RunId::parse(&id).unwrap(),
                        parent_run_id: None,
                        kind: SpanKind::Tool,
                        name: "lookup".to_string(),
                        model_name: None,
                        input_text: String::new(),
                        session_id: None,
                        metadata: BTreeMap::new(),
                    })
                    .unwrap();
                    records.push(
                        ctx.end(&RunId::parse(&id).unwrap(), String::new(), None)
                            .unwrap(),
                    );
                }
                records
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.join().unwrap());
        }

        let mut ids = all.iter().map(|r| r.run_id.clone()).collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 400);
        assert!(all.iter().all(|r| r.ended_at >= r.started_at));
        assert_eq!(ctx.in_flight_count(), 0);
    }

    #[test]
    fn leak_detection_reports_stale_spans() {
        let ctx = ctx();
        let old = Utc::now() - chrono::Duration::minutes(20);
        ctx.begin_at(start("stale"), old).unwrap();
        ctx.begin(start("fresh")).unwrap();

        let leaked = ctx.leaked(Duration::from_secs(600));
        assert_eq!(leaked.len(), 1);
        assert_eq!(leaked[0].run_id.as_str(), "stale");
        assert!(leaked[0].age >= Duration::from_secs(600));
    }
}
