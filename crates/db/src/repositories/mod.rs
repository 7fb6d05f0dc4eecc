use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use deedline_core::errors::StoreError;

pub mod grant;
pub mod property;

pub use grant::SqlGrantStore;
pub use property::SqlPropertyDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for StoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(source) => StoreError::Backend(source.to_string()),
            RepositoryError::Decode(message) => StoreError::Decode(message),
        }
    }
}

/// Fixed-width UTC text so that lexical order in SQL matches time order.
pub(crate) fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn decode_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

pub(crate) fn decode_optional_timestamp(
    column: &str,
    raw: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.map(|value| decode_timestamp(column, &value)).transpose()
}

pub(crate) fn decode_u32(column: &str, raw: i64) -> Result<u32, RepositoryError> {
    u32::try_from(raw)
        .map_err(|_| RepositoryError::Decode(format!("{column}: {raw} is out of range")))
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::{decode_timestamp, decode_u32, encode_timestamp, RepositoryError};

    #[test]
    fn timestamps_sort_lexically_in_time_order() {
        let earlier = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let later = earlier + chrono::Duration::milliseconds(1500);

        assert!(encode_timestamp(earlier) < encode_timestamp(later));
        assert_eq!(
            decode_timestamp("created_at", &encode_timestamp(earlier)).expect("decode"),
            earlier
        );
    }

    #[test]
    fn nanosecond_clock_readings_survive_storage() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap();
        let precise = base + chrono::Duration::nanoseconds(123_456_789);
        let next = precise + chrono::Duration::nanoseconds(1);

        let encoded = encode_timestamp(precise);
        assert_eq!(encoded, "2025-01-01T09:00:00.123456789Z");
        assert_eq!(encode_timestamp(base).len(), encoded.len());
        assert!(encoded < encode_timestamp(next));
        assert_eq!(decode_timestamp("access_expires_on", &encoded).expect("decode"), precise);
    }

    #[test]
    fn negative_counters_are_decode_errors() {
        assert!(matches!(decode_u32("download_count", -1), Err(RepositoryError::Decode(_))));
        assert_eq!(decode_u32("download_count", 3).expect("decode"), 3);
    }
}
