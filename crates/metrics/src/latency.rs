use llmtrace_core::query::LatencySummary;

/// Nearest-rank percentile over an ascending-sorted sample set:
/// `idx = ceil(p/100 * n) - 1`, clamped to `[0, n-1]`.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (pct / 100.0 * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    sorted[idx]
}

/// Computes the latency distribution for a set of samples. `None` is the
/// explicit "no data" result for an empty set.
pub fn summarize(samples: &[f64]) -> Option<LatencySummary> {
    summarize_with_sampling(samples, false)
}

pub fn summarize_with_sampling(samples: &[f64], sampled: bool) -> Option<LatencySummary> {
    if samples.is_empty() {
        return None;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let count = sorted.len();
    let mean = sorted.iter().sum::<f64>() / count as f64;

    Some(LatencySummary {
        p50: percentile(&sorted, 50.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        mean,
        max: sorted[count - 1],
        count,
        sampled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_is_no_data() {
        assert!(summarize(&[]).is_none());
    }

    #[test]
    fn nearest_rank_on_reference_samples() {
        let samples = [10.0, 20.0, 30.0, 40.0, 100.0];
        let summary = summarize(&samples).unwrap();
        assert_eq!(summary.p50, 30.0);
        assert_eq!(summary.max, 100.0);
        assert_eq!(percentile(&samples, 100.0), 100.0);
        assert_eq!(summary.mean, 40.0);
        assert_eq!(summary.count, 5);
        assert!(!summary.sampled);
    }

    #[test]
    fn single_sample_answers_every_percentile() {
        let summary = summarize(&[42.0]).unwrap();
        assert_eq!(summary.p50, 42.0);
        assert_eq!(summary.p95, 42.0);
        assert_eq!(summary.p99, 42.0);
        assert_eq!(summary.max, 42.0);
    }

    #[test]
    fn unsorted_input_is_tolerated() {
        let summary = summarize(&[100.0, 10.0, 30.0, 20.0, 40.0]).unwrap();
        assert_eq!(summary.p50, 30.0);
    }

    #[test]
    fn p99_picks_tail_sample() {
        let samples: Vec<f64> = (1..=100).map(|i| i as f64).collect();
        assert_eq!(percentile(&samples, 99.0), 99.0);
        assert_eq!(percentile(&samples, 50.0), 50.0);
    }
}
