use chrono::{DateTime, Utc};

/// Nanoseconds since the epoch for a timestamp. Timestamps before the epoch
/// clamp to zero, timestamps past what fits in an `i64` (year 2262) clamp to
/// `i64::MAX`.
pub fn to_epoch_nanos(at: &DateTime<Utc>) -> u64 {
    match at.timestamp_nanos_opt() {
        Some(nanos) => nanos.max(0) as u64,
        None if at.timestamp() < 0 => 0,
        None => i64::MAX as u64,
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    #[test]
    fn test_to_epoch_nanos() {
        let at = Utc.timestamp_nanos(1_700_000_000_123_456_789);
        assert_eq!(to_epoch_nanos(&at), 1_700_000_000_123_456_789);

        let before_epoch = DateTime::<Utc>::UNIX_EPOCH - Duration::seconds(10);
        assert_eq!(to_epoch_nanos(&before_epoch), 0);

        let far_future = Utc.with_ymd_and_hms(3000, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(to_epoch_nanos(&far_future), i64::MAX as u64);
    }
}
