use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::error::{EventDbError, Result};

const NANOS_BAND: i64 = 1_000_000_000_000_000_000;
const MICROS_BAND: i64 = 1_000_000_000_000_000;
const MILLIS_BAND: i64 = 1_000_000_000_000;

/// Scales a bare number to nanoseconds by magnitude: values above 10^18 are
/// taken as nanos, above 10^15 as micros, above 10^12 as millis, anything
/// else as seconds.
pub fn num_to_unix_nano(value: i64) -> i64 {
    if value > NANOS_BAND {
        value
    } else if value > MICROS_BAND {
        value * 1_000
    } else if value > MILLIS_BAND {
        value * 1_000_000
    } else {
        value * 1_000_000_000
    }
}

pub fn nanos_to_datetime(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

pub fn to_nanos(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Parses the time formats the API accepts: integer and float epoch values
/// (scaled by magnitude), RFC3339 with or without sub-seconds, and a handful
/// of common date-time spellings.
pub fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(EventDbError::BadInput("missing time value".into()));
    }

    if let Ok(value) = raw.parse::<i64>() {
        return Ok(nanos_to_datetime(num_to_unix_nano(value)));
    }
    if let Ok(value) = raw.parse::<f64>() {
        return Ok(nanos_to_datetime(num_to_unix_nano(value as i64)));
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ts));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S %z") {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ts));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)));
    }

    Err(EventDbError::BadInput(format!("unparseable time: {raw}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_magnitude_bands() {
        assert_eq!(num_to_unix_nano(1_685_577_600), 1_685_577_600_000_000_000);
        assert_eq!(
            num_to_unix_nano(1_685_577_600_000),
            1_685_577_600_000_000_000
        );
        assert_eq!(
            num_to_unix_nano(1_685_577_600_000_000),
            1_685_577_600_000_000_000
        );
        assert_eq!(
            num_to_unix_nano(1_685_577_600_000_000_000),
            1_685_577_600_000_000_000
        );
    }

    #[test]
    fn parses_epoch_strings() {
        let expected = nanos_to_datetime(1_685_577_600_000_000_000);
        assert_eq!(parse_time("1685577600").unwrap(), expected);
        assert_eq!(parse_time("1685577600000").unwrap(), expected);
        assert_eq!(parse_time("1685577600.0").unwrap(), expected);
    }

    #[test]
    fn parses_rfc3339_variants() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_time("2023-06-01T00:00:00Z").unwrap(), expected);
        assert_eq!(parse_time("2023-06-01T00:00:00.000Z").unwrap(), expected);
        assert_eq!(parse_time("2023-06-01T02:00:00+02:00").unwrap(), expected);
    }

    #[test]
    fn parses_plain_date_time_spellings() {
        let expected = Utc.with_ymd_and_hms(2023, 6, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_time("2023-06-01T12:30:00").unwrap(), expected);
        assert_eq!(parse_time("2023-06-01 12:30:00").unwrap(), expected);
        assert_eq!(parse_time("2023-06-01 14:30:00 +0200").unwrap(), expected);
        assert_eq!(
            parse_time("2023-06-01").unwrap(),
            Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_time("").is_err());
        assert!(parse_time("not a time").is_err());
    }
}
