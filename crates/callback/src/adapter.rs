use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;

use llmtrace_context::{LeakedSpan, SpanStart, TokenCounts, TraceContext};
use llmtrace_core::config::Config;
use llmtrace_core::error::{LlmTraceError, Result};
use llmtrace_core::model::span::SpanRecord;
use llmtrace_core::pricing::PricingTable;
use llmtrace_metrics::errors::{AlertEvent, ErrorRateMonitor};
use llmtrace_store::Store;

use crate::event::LifecycleEvent;
use crate::pipeline::{persist_blocking_with_retry, Pipeline, PipelineConfig};

const REDACTED: &str = "[redacted]";
const ALERT_CHANNEL_CAPACITY: usize = 64;

/// Counts of anomalies the adapter absorbed instead of surfacing as errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnomalySnapshot {
    pub unknown_runs: u64,
    pub duplicate_runs: u64,
    pub orphaned_parents: u64,
    pub failed_writes: u64,
}

#[derive(Default)]
struct AnomalyCounters {
    unknown_runs: AtomicU64,
    duplicate_runs: AtomicU64,
    orphaned_parents: AtomicU64,
    failed_writes: AtomicU64,
}

/// The boundary between an orchestration framework's lifecycle callbacks and
/// the rest of the toolkit.
///
/// `handle` never propagates an error to the caller: an observability layer
/// that can crash the pipeline it watches is worse than no observability.
/// Malformed sequences (ends without begins, duplicate begins) are logged and
/// counted; storage failures are retried and, as a last resort, counted.
pub struct CallbackAdapter {
    context: Arc<TraceContext>,
    store: Store,
    pipeline: Option<Pipeline>,
    monitor: Mutex<ErrorRateMonitor>,
    alerts: broadcast::Sender<AlertEvent>,
    counters: AnomalyCounters,
    log_prompts: bool,
    log_responses: bool,
    max_text_len: usize,
    leak_threshold: Duration,
}

impl CallbackAdapter {
    /// Direct-write adapter: each finalized span is persisted inline with
    /// bounded retry. Works without an async runtime.
    pub fn new(config: &Config, store: Store) -> Result<Self> {
        Self::build(config, store, None)
    }

    /// Batching adapter: finalized spans flow through a background write
    /// pipeline. Must be called from within a tokio runtime.
    pub fn with_pipeline(config: &Config, store: Store) -> Result<Self> {
        let pipeline = Pipeline::new(
            store.clone(),
            PipelineConfig {
                channel_capacity: config.write_batch_size.max(1),
                flush_interval: Duration::from_millis(config.write_flush_ms.max(1)),
                batch_size: config.write_batch_size.max(1),
            },
        );
        Self::build(config, store, Some(pipeline))
    }

    fn build(config: &Config, store: Store, pipeline: Option<Pipeline>) -> Result<Self> {
        let pricing = match &config.pricing_path {
            Some(path) => PricingTable::load(path)?,
            None => PricingTable::default(),
        };
        let (alerts, _) = broadcast::channel(ALERT_CHANNEL_CAPACITY);
        Ok(Self {
            context: Arc::new(TraceContext::new(Arc::new(pricing))),
            store,
            pipeline,
            monitor: Mutex::new(ErrorRateMonitor::new(
                config.error_window,
                config.error_rate_threshold,
            )),
            alerts,
            counters: AnomalyCounters::default(),
            log_prompts: config.log_prompts,
            log_responses: config.log_responses,
            max_text_len: config.max_text_len,
            leak_threshold: config.leak_threshold,
        })
    }

    /// Processes one lifecycle event. Infallible by contract.
    pub fn handle(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Start {
                run_id,
                parent_run_id,
                kind,
                name,
                model_name,
                input,
                session_id,
                metadata,
            } => {
                let input_text = self.prepare_text(input, self.log_prompts);
                let result = self.context.begin(SpanStart {
                    run_id: run_id.clone(),
                    parent_run_id,
                    kind,
                    name,
                    model_name,
                    input_text,
                    session_id,
                    metadata,
                });
                if let Err(e) = result {
                    if matches!(e, LlmTraceError::DuplicateRun(_)) {
                        self.counters.duplicate_runs.fetch_add(1, Ordering::Relaxed);
                    }
                    warn!(run_id = %run_id, error = %e, "dropped start event");
                }
            }
            LifecycleEvent::End {
                run_id,
                output,
                prompt_tokens,
                completion_tokens,
            } => {
                let output_text = self.prepare_text(output, self.log_responses);
                let tokens = match (prompt_tokens, completion_tokens) {
                    (None, None) => None,
                    (p, c) => Some(TokenCounts {
                        prompt: p.unwrap_or(0),
                        completion: c.unwrap_or(0),
                    }),
                };
                match self.context.end(&run_id, output_text, tokens) {
                    Ok(record) => self.finish(record),
                    Err(e) => {
                        self.counters.unknown_runs.fetch_add(1, Ordering::Relaxed);
                        warn!(run_id = %run_id, error = %e, "dropped end event");
                    }
                }
            }
            LifecycleEvent::Fail {
                run_id,
                error_kind_hint,
                error_message,
            } => {
                match self
                    .context
                    .fail(&run_id, error_kind_hint.as_deref(), &error_message)
                {
                    Ok(record) => self.finish(record),
                    Err(e) => {
                        self.counters.unknown_runs.fetch_add(1, Ordering::Relaxed);
                        warn!(run_id = %run_id, error = %e, "dropped fail event");
                    }
                }
            }
        }
    }

    fn finish(&self, record: SpanRecord) {
        if record.orphaned_parent {
            self.counters
                .orphaned_parents
                .fetch_add(1, Ordering::Relaxed);
        }

        let alert = {
            let mut monitor = match self.monitor.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            monitor.record(record.is_error())
        };
        if let Some(event) = alert {
            match event {
                AlertEvent::Raised { rate, threshold } => {
                    warn!(rate, threshold, "error rate alert raised");
                }
                AlertEvent::Cleared { rate } => {
                    warn!(rate, "error rate alert cleared");
                }
            }
            // No subscribers is fine: the alert is already logged.
            let _ = self.alerts.send(event);
        }

        match &self.pipeline {
            Some(pipeline) => pipeline.submit(vec![record]),
            None => {
                if !persist_blocking_with_retry(&self.store, std::slice::from_ref(&record)) {
                    self.counters.failed_writes.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    fn prepare_text(&self, text: String, allowed: bool) -> String {
        if !allowed {
            return REDACTED.to_string();
        }
        if text.chars().count() <= self.max_text_len {
            return text;
        }
        let mut truncated: String = text.chars().take(self.max_text_len).collect();
        truncated.push_str("...");
        truncated
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alerts.subscribe()
    }

    pub fn anomalies(&self) -> AnomalySnapshot {
        AnomalySnapshot {
            unknown_runs: self.counters.unknown_runs.load(Ordering::Relaxed),
            duplicate_runs: self.counters.duplicate_runs.load(Ordering::Relaxed),
            orphaned_parents: self.counters.orphaned_parents.load(Ordering::Relaxed),
            failed_writes: self.counters.failed_writes.load(Ordering::Relaxed),
        }
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    /// In-flight spans older than the configured leak threshold.
    pub fn leaked(&self) -> Vec<LeakedSpan> {
        self.context.leaked(self.leak_threshold)
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}
