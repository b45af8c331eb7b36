use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latency distribution over a set of finalized spans. Absence of the whole
/// struct (not zeros) is the "no data" result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LatencySummary {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub mean: f64,
    pub max: f64,
    pub count: usize,
    /// True when percentiles were computed over a bounded reservoir sample
    /// instead of the full row set.
    pub sampled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Aggregates {
    pub span_count: usize,
    pub error_count: usize,
    /// errors / total in the filtered set; 0.0 when the set is empty.
    pub error_rate: f64,
    pub total_cost_usd: f64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub latency: Option<LatencySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub db_path: String,
    pub db_size_bytes: u64,
    pub spans_count: usize,
    pub terms_count: usize,
    pub oldest_ended: Option<DateTime<Utc>>,
    pub newest_ended: Option<DateTime<Utc>>,
}
