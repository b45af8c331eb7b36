use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use llmtrace_core::model::span::ErrorKind;

/// Maps raw upstream error information to the closed failure taxonomy.
/// The kind hint (when the framework supplies one) is matched before the
/// free-text message; anything unmatched is `Unknown`, never dropped.
pub fn classify(kind_hint: Option<&str>, message: &str) -> ErrorKind {
    if let Some(hint) = kind_hint
        && let Some(kind) = match_patterns(hint)
    {
        return kind;
    }
    match_patterns(message).unwrap_or(ErrorKind::Unknown)
}

fn match_patterns(text: &str) -> Option<ErrorKind> {
    let lower = text.to_ascii_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if contains_any(&["timeout", "timed out", "deadline exceeded"]) {
        return Some(ErrorKind::Timeout);
    }
    if contains_any(&["rate limit", "rate_limit", "429", "too many requests", "quota"]) {
        return Some(ErrorKind::RateLimit);
    }
    if contains_any(&[
        "invalid request",
        "invalid_request",
        "bad request",
        "400",
        "422",
        "validation",
    ]) {
        return Some(ErrorKind::InvalidRequest);
    }
    if contains_any(&[
        "model error",
        "model_error",
        "internal server",
        "overloaded",
        "500",
        "502",
        "503",
    ]) {
        return Some(ErrorKind::ModelError);
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AlertEvent {
    Raised { rate: f64, threshold: f64 },
    Cleared { rate: f64 },
}

/// Rolling error-rate monitor over the last `window` finalized spans.
///
/// The rate denominator is the window capacity, with slots not yet seen
/// counted as successes, so a burst of early errors must reach the threshold
/// in absolute terms before an alert raises. Alerts are one-shot with
/// hysteresis: one `Raised` when the rate crosses the threshold, one
/// `Cleared` when it drops back below, nothing in between.
#[derive(Debug)]
pub struct ErrorRateMonitor {
    window: usize,
    threshold: f64,
    outcomes: VecDeque<bool>,
    errors: usize,
    alerting: bool,
}

impl ErrorRateMonitor {
    pub fn new(window: usize, threshold: f64) -> Self {
        Self {
            window: window.max(1),
            threshold,
            outcomes: VecDeque::with_capacity(window.max(1)),
            errors: 0,
            alerting: false,
        }
    }

    pub fn rate(&self) -> f64 {
        self.errors as f64 / self.window as f64
    }

    pub fn is_alerting(&self) -> bool {
        self.alerting
    }

    pub fn record(&mut self, is_error: bool) -> Option<AlertEvent> {
        if self.outcomes.len() == self.window
            && let Some(evicted) = self.outcomes.pop_front()
            && evicted
        {
            self.errors -= 1;
        }
        self.outcomes.push_back(is_error);
        if is_error {
            self.errors += 1;
        }

        let rate = self.rate();
        if !self.alerting && rate >= self.threshold {
            self.alerting = true;
            return Some(AlertEvent::Raised {
                rate,
                threshold: self.threshold,
            });
        }
        if self.alerting && rate < self.threshold {
            self.alerting = false;
            return Some(AlertEvent::Cleared { rate });
        }
        None
    }
}
