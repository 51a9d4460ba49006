use chrono::Utc;

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Storage columns are BIGINT; values past `i64::MAX` are clamped.
pub fn ms_to_i64(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_2020() {
        assert!(now_ms() > 1_577_836_800_000);
    }

    #[test]
    fn clamps_out_of_range_timestamps() {
        assert_eq!(ms_to_i64(u64::MAX), i64::MAX);
        assert_eq!(ms_to_i64(42), 42);
    }
}
