use std::time::Duration as StdDuration;
use time::OffsetDateTime;

pub(crate) trait TimeDurationExt {
    /// Negative durations saturate to zero.
    fn to_std_duration(self) -> StdDuration;
}

impl TimeDurationExt for time::Duration {
    fn to_std_duration(self) -> StdDuration {
        match self.is_negative() {
            true => StdDuration::ZERO,
            false => u64::try_from(self.whole_nanoseconds())
                .map_or(StdDuration::MAX, StdDuration::from_nanos),
        }
    }
}

/// Time elapsed since `since`. Zero if `since` lies in the future (clock skew between tabs).
pub(crate) fn elapsed_since(since: OffsetDateTime, now: OffsetDateTime) -> StdDuration {
    (now - since).to_std_duration()
}

pub(crate) fn to_epoch_millis(at: OffsetDateTime) -> i64 {
    i64::try_from(at.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

pub(crate) fn from_epoch_millis(millis: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

#[allow(clippy::cast_possible_truncation)]
fn truncate_millis(millis: f64) -> i64 {
    millis as i64
}

/// (De)serializes an `OffsetDateTime` as milliseconds since the unix epoch, the representation
/// produced by `Date.now()` in records written by the JavaScript client.
pub(crate) mod epoch_millis {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use time::OffsetDateTime;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(super::to_epoch_millis(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<OffsetDateTime, D::Error> {
        // Accept floats, `Number(...)` on the JS side does not guarantee an integer.
        let millis = f64::deserialize(d)?;
        super::from_epoch_millis(super::truncate_millis(millis))
            .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}")))
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer, de::Error};
        use time::OffsetDateTime;

        pub fn serialize<S: Serializer>(
            value: &Option<OffsetDateTime>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(at) => s.serialize_some(&super::super::to_epoch_millis(*at)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<OffsetDateTime>, D::Error> {
            match Option::<f64>::deserialize(d)? {
                Some(millis) => super::super::from_epoch_millis(super::super::truncate_millis(millis))
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {millis}"))),
                None => Ok(None),
            }
        }
    }
}
