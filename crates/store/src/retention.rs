use std::time::Duration;

use chrono::{DateTime, Utc};
use duckdb::params;
use llmtrace_core::error::{LlmTraceError, Result};

use crate::Store;

impl Store {
    /// Deletes finalized spans whose `ended_at` precedes `cutoff`, together
    /// with their full-text postings, in one transaction. Returns the number
    /// of spans removed. Periodic maintenance, not part of the write path.
    pub fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = cutoff.to_rfc3339();

        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .map_err(|e| LlmTraceError::Store(format!("begin tx failed: {e}")))?;

        tx.execute(
            "DELETE FROM span_terms WHERE run_id IN
             (SELECT run_id FROM spans WHERE ended_at < ?)",
            params![cutoff.clone()],
        )
        .map_err(|e| LlmTraceError::Store(format!("retention terms delete failed: {e}")))?;

        let removed = tx
            .execute("DELETE FROM spans WHERE ended_at < ?", params![cutoff])
            .map_err(|e| LlmTraceError::Store(format!("retention spans delete failed: {e}")))?;

        tx.commit()
            .map_err(|e| LlmTraceError::Store(format!("commit retention failed: {e}")))?;
        Ok(removed)
    }

    pub fn prune_older_than(&self, retention: Duration) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| LlmTraceError::Internal(format!("retention conversion failed: {e}")))?;
        self.prune(cutoff)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use llmtrace_testkit::span_at;

    use crate::Store;

    #[test]
    fn prune_removes_exactly_spans_ended_before_cutoff() {
        let store = Store::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        let old = span_at("old", base - Duration::days(40));
        let boundary = span_at("boundary", base);
        let fresh = span_at("fresh", base + Duration::days(1));
        store.persist_batch(&[old, boundary.clone(), fresh]).unwrap();

        let removed = store.prune(boundary.ended_at).unwrap();
        assert_eq!(removed, 1);

        let status = store.status().unwrap();
        assert_eq!(status.spans_count, 2);
        assert!(store.get_span(&boundary.run_id).unwrap().is_some());
    }

    #[test]
    fn pruned_spans_never_reappear_in_search() {
        let store = Store::open_in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();

        let mut old = span_at("old", base - Duration::days(40));
        old.input_text = "zanzibar is unique here".to_string();
        store.persist(&old).unwrap();

        assert_eq!(store.search("zanzibar", 10).unwrap().len(), 1);
        store.prune(base).unwrap();

        assert!(store.search("zanzibar", 10).unwrap().is_empty());
        assert_eq!(store.status().unwrap().terms_count, 0);
        store.verify().unwrap();
    }

    #[test]
    fn prune_older_than_uses_wall_clock() {
        let store = Store::open_in_memory().unwrap();
        let old = span_at("old", Utc::now() - Duration::days(60));
        let fresh = span_at("fresh", Utc::now());
        store.persist_batch(&[old, fresh]).unwrap();

        let removed = store
            .prune_older_than(std::time::Duration::from_secs(60 * 60 * 24 * 30))
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.status().unwrap().spans_count, 1);
    }
}
