//! Database utility functions

use chrono::{DateTime, TimeZone, Utc};

use crate::domain::errors::DatabaseError;

/// Convert a stored millisecond timestamp back to a datetime.
pub fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>, DatabaseError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| DatabaseError::InvalidKey(format!("timestamp out of range: {millis}")))
}

/// `LIKE` pattern matching everything that starts with `prefix`.
///
/// `%`, `_` and the escape character itself are escaped with `\`.
pub fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_millis_roundtrip() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(millis_to_datetime(now.timestamp_millis()).unwrap(), now);
    }

    #[test]
    fn test_like_prefix_escapes_wildcards() {
        assert_eq!(like_prefix("TST/MO"), "TST/MO%");
        assert_eq!(like_prefix("a_b%"), "a\\_b\\%%");
    }
}
