use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDateTime, Utc};
use duckdb::Connection;
use llmtrace_core::error::{LlmTraceError, Result};
use llmtrace_core::query::StatusResponse;

use crate::schema::SCHEMA_SQL;

/// Durable storage for finalized spans. Shared handle; every operation is a
/// short critical section on the connection, so concurrent writers and
/// dashboard readers both complete in bounded time.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    db_path: String,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| LlmTraceError::Io(format!("failed to create db dir: {e}")))?;
        }

        let conn = Connection::open(path)
            .map_err(|e| LlmTraceError::Store(format!("failed to open duckdb: {e}")))?;
        conn.execute_batch("PRAGMA threads=4;")
            .map_err(|e| LlmTraceError::Store(format!("failed to set pragmas: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| LlmTraceError::Store(format!("failed to initialize schema: {e}")))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.display().to_string(),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| LlmTraceError::Store(format!("failed to open in-memory db: {e}")))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| LlmTraceError::Store(format!("failed to initialize schema: {e}")))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: ":memory:".to_string(),
        })
    }

    pub(crate) fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn status(&self) -> Result<StatusResponse> {
        let conn = self.conn();

        let spans_count = scalar_usize(&conn, "SELECT COUNT(*) FROM spans")?;
        let terms_count = scalar_usize(&conn, "SELECT COUNT(*) FROM span_terms")?;
        let oldest_ended = scalar_ts(&conn, "SELECT MIN(ended_at) FROM spans")?;
        let newest_ended = scalar_ts(&conn, "SELECT MAX(ended_at) FROM spans")?;

        let db_size_bytes = if self.db_path == ":memory:" {
            0
        } else {
            fs::metadata(&self.db_path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StatusResponse {
            db_path: self.db_path.clone(),
            db_size_bytes,
            spans_count,
            terms_count,
            oldest_ended,
            newest_ended,
        })
    }

    /// Cross-checks the inverted index against the span table. A posting
    /// whose span is gone (or the reverse, for spans with indexable text)
    /// is reported as corruption; reads degrade around it, this is for
    /// maintenance visibility.
    pub fn verify(&self) -> Result<()> {
        let conn = self.conn();
        let dangling = scalar_usize(
            &conn,
            "SELECT COUNT(*) FROM span_terms t
             WHERE NOT EXISTS (SELECT 1 FROM spans s WHERE s.run_id = t.run_id)",
        )?;
        if dangling > 0 {
            return Err(LlmTraceError::Corrupt(format!(
                "{dangling} term postings without a span row"
            )));
        }
        Ok(())
    }
}

pub(crate) fn scalar_usize(conn: &Connection, sql: &str) -> Result<usize> {
    conn.query_row(sql, [], |row| row.get::<_, i64>(0))
        .map(|v| v as usize)
        .map_err(|e| LlmTraceError::Store(format!("query failed: {e}")))
}

fn scalar_ts(conn: &Connection, sql: &str) -> Result<Option<DateTime<Utc>>> {
    conn.query_row(sql, [], |row| row.get::<_, Option<NaiveDateTime>>(0))
        .map(|opt| opt.map(|dt| dt.and_utc()))
        .map_err(|e| LlmTraceError::Store(format!("query failed: {e}")))
}
