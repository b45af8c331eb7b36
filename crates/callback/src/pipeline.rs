use std::time::Duration;

use llmtrace_core::model::span::SpanRecord;
use llmtrace_store::Store;
use tokio::sync::mpsc;
use tracing::warn;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// Background batching writer. Finalized spans are queued off the event hot
/// path and flushed on batch size or interval; transient storage failures
/// are retried with bounded backoff before a batch is given up on.
#[derive(Clone)]
pub struct Pipeline {
    tx: mpsc::Sender<Vec<SpanRecord>>,
    store: Store,
}

pub struct PipelineConfig {
    pub channel_capacity: usize,
    pub flush_interval: Duration,
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            flush_interval: Duration::from_millis(200),
            batch_size: 256,
        }
    }
}

impl Pipeline {
    pub fn new(store: Store, cfg: PipelineConfig) -> Self {
        let (tx, rx) = mpsc::channel(cfg.channel_capacity);
        tokio::spawn(run_span_writer(
            store.clone(),
            rx,
            cfg.batch_size,
            cfg.flush_interval,
        ));
        Self { tx, store }
    }

    /// Non-blocking enqueue. When the channel is saturated (or the writer is
    /// gone) the spans are persisted inline instead of being dropped.
    pub fn submit(&self, spans: Vec<SpanRecord>) {
        if let Err(e) = self.tx.try_send(spans) {
            let spans = match e {
                mpsc::error::TrySendError::Full(spans) => spans,
                mpsc::error::TrySendError::Closed(spans) => spans,
            };
            warn!(
                count = spans.len(),
                "span pipeline backpressure, persisting inline"
            );
            persist_blocking_with_retry(&self.store, &spans);
        }
    }
}

async fn run_span_writer(
    store: Store,
    mut rx: mpsc::Receiver<Vec<SpanRecord>>,
    batch_size: usize,
    flush_interval: Duration,
) {
    let mut ticker = tokio::time::interval(flush_interval);
    let mut buffer = Vec::new();
    loop {
        tokio::select! {
            batch = rx.recv() => {
                let Some(batch) = batch else { break };
                buffer.extend(batch);
                if buffer.len() >= batch_size {
                    flush_with_retry(&store, &mut buffer).await;
                }
            }
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    flush_with_retry(&store, &mut buffer).await;
                }
            }
        }
    }

    if !buffer.is_empty() {
        flush_with_retry(&store, &mut buffer).await;
    }
}

async fn flush_with_retry(store: &Store, buffer: &mut Vec<SpanRecord>) {
    let mut backoff = RETRY_BACKOFF;
    for attempt in 1..=RETRY_ATTEMPTS {
        match store.persist_batch(buffer) {
            Ok(()) => {
                buffer.clear();
                return;
            }
            Err(e) if attempt < RETRY_ATTEMPTS => {
                warn!(error = ?e, attempt, "span batch write failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(e) => {
                warn!(error = ?e, count = buffer.len(), "span batch dropped after retries");
                buffer.clear();
            }
        }
    }
}

/// Synchronous retry path for direct-mode writes and for the backpressure
/// fallback.
pub(crate) fn persist_blocking_with_retry(store: &Store, spans: &[SpanRecord]) -> bool {
    let mut backoff = RETRY_BACKOFF;
    for attempt in 1..=RETRY_ATTEMPTS {
        match store.persist_batch(spans) {
            Ok(()) => return true,
            Err(e) if attempt < RETRY_ATTEMPTS => {
                warn!(error = ?e, attempt, "span write failed, retrying");
                std::thread::sleep(backoff);
                backoff *= 2;
            }
            Err(e) => {
                warn!(error = ?e, count = spans.len(), "span write dropped after retries");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmtrace_core::filter::TimeWindow;
    use llmtrace_testkit::finished_span;

    #[tokio::test]
    async fn pipeline_flushes_on_interval() {
        let store = Store::open_in_memory().unwrap();
        let pipeline = Pipeline::new(
            store.clone(),
            PipelineConfig {
                channel_capacity: 8,
                flush_interval: Duration::from_millis(10),
                batch_size: 100,
            },
        );

        pipeline.submit(vec![finished_span("r1", "hello", "world", 0)]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let spans = store.recent(TimeWindow::all(), 10).unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].run_id.as_str(), "r1");
    }

    #[tokio::test]
    async fn pipeline_flushes_on_batch_size() {
        let store = Store::open_in_memory().unwrap();
        let pipeline = Pipeline::new(
            store.clone(),
            PipelineConfig {
                channel_capacity: 8,
                flush_interval: Duration::from_secs(60),
                batch_size: 2,
            },
        );

        pipeline.submit(vec![finished_span("r1", "", "", 0)]);
        pipeline.submit(vec![finished_span("r2", "", "", 1)]);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.status().unwrap().spans_count, 2);
    }

    #[tokio::test]
    async fn saturated_channel_falls_back_to_inline_persist() {
        let store = Store::open_in_memory().unwrap();
        // Writer never drains in time: tiny channel, long interval.
        let pipeline = Pipeline::new(
            store.clone(),
            PipelineConfig {
                channel_capacity: 1,
                flush_interval: Duration::from_secs(60),
                batch_size: 1000,
            },
        );

        for i in 0..10 {
            pipeline.submit(vec![finished_span(&format!("r{i}"), "", "", i)]);
        }

        // Whatever path each batch took, nothing was silently dropped.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let inline = store.status().unwrap().spans_count;
        assert!(inline >= 8, "expected inline fallback to persist, got {inline}");
    }
}
