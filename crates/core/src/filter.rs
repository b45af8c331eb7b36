use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::span::SpanKind;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TimeWindow {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeWindow {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn since(ts: DateTime<Utc>) -> Self {
        Self {
            since: Some(ts),
            until: None,
        }
    }

    /// The dashboard's "last N hours" view.
    pub fn last(duration: chrono::Duration) -> Self {
        Self::since(Utc::now() - duration)
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        if let Some(since) = self.since
            && ts < since
        {
            return false;
        }
        if let Some(until) = self.until
            && ts > until
        {
            return false;
        }
        true
    }
}

/// Filter applied to aggregate and listing queries. All fields optional;
/// the window constrains `started_at`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SpanFilter {
    pub window: TimeWindow,
    pub session_id: Option<String>,
    pub model_name: Option<String>,
    pub kind: Option<SpanKind>,
}

impl SpanFilter {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Self::default()
        }
    }

    pub fn model(model_name: impl Into<String>) -> Self {
        Self {
            model_name: Some(model_name.into()),
            ..Self::default()
        }
    }
}
