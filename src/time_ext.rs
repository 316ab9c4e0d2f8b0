use std::time::Duration as StdDuration;

use time::OffsetDateTime;

pub(crate) trait TimeDurationExt {
    /// Negative durations saturate at zero.
    fn to_std_duration(self) -> StdDuration;
}

impl TimeDurationExt for time::Duration {
    fn to_std_duration(self) -> StdDuration {
        match self.is_negative() {
            true => StdDuration::ZERO,
            false => StdDuration::try_from(self).unwrap_or(StdDuration::MAX),
        }
    }
}

pub(crate) trait OffsetDateTimeExt {
    fn unix_timestamp_millis(self) -> i64;

    fn from_unix_timestamp_millis(millis: i64) -> Option<OffsetDateTime>;
}

impl OffsetDateTimeExt for OffsetDateTime {
    fn unix_timestamp_millis(self) -> i64 {
        i64::try_from(self.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
    }

    fn from_unix_timestamp_millis(millis: i64) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
    }
}
