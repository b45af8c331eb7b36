use chrono::{DateTime, Utc};

/// Elapsed wall-clock time between two instants in milliseconds, at
/// microsecond precision. Clock skew between the reported start and end can
/// make the interval negative; it is clamped to zero rather than stored.
pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_microseconds().unwrap_or(0).max(0) as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_never_negative() {
        let a = Utc::now();
        let b = a - chrono::Duration::seconds(1);
        assert_eq!(duration_ms(a, b), 0.0);
        assert_eq!(duration_ms(b, a), 1000.0);
    }

    #[test]
    fn sub_millisecond_precision_is_kept() {
        let a = Utc::now();
        let b = a + chrono::Duration::microseconds(1500);
        assert_eq!(duration_ms(a, b), 1.5);
    }
}
