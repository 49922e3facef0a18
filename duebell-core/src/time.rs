//! Time utilities: due-date decoding for the encodings task stores emit.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{ReminderError, Result};

/// A due date as it arrives from the task store, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DueDateValue {
    /// Epoch milliseconds.
    Millis(i64),
    /// Firestore-style timestamp object.
    Timestamp { seconds: i64, nanoseconds: u32 },
    /// RFC 3339, or local "YYYY-MM-DD HH:MM".
    Text(String),
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse()
        .map_err(|_| ReminderError::InvalidTimezone(name.to_string()))
}

/// Decode a raw due date. Local wall times are read in `tz`.
pub fn parse_due_date(value: &DueDateValue, tz: Tz) -> Result<DateTime<Utc>> {
    match value {
        DueDateValue::Millis(ms) => {
            DateTime::from_timestamp_millis(*ms).ok_or_else(|| ReminderError::InvalidDate {
                value: ms.to_string(),
                reason: "epoch millis out of range".to_string(),
            })
        }
        DueDateValue::Timestamp {
            seconds,
            nanoseconds,
        } => DateTime::from_timestamp(*seconds, *nanoseconds).ok_or_else(|| {
            ReminderError::InvalidDate {
                value: format!("{seconds}s+{nanoseconds}ns"),
                reason: "timestamp out of range".to_string(),
            }
        }),
        DueDateValue::Text(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Ok(dt.with_timezone(&Utc));
            }
            parse_local_deadline_to_utc(s, tz)
        }
    }
}

/// Parse a deadline like "2026-02-20 23:59" in `tz`, returning UTC.
pub fn parse_local_deadline_to_utc(local: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let ndt = NaiveDateTime::parse_from_str(local, "%Y-%m-%d %H:%M").map_err(|e| {
        ReminderError::InvalidDate {
            value: local.to_string(),
            reason: e.to_string(),
        }
    })?;

    let local_dt = tz
        .from_local_datetime(&ndt)
        .single()
        .ok_or_else(|| ReminderError::InvalidDate {
            value: local.to_string(),
            reason: format!("ambiguous or invalid local time in {tz} (DST?)"),
        })?;

    Ok(local_dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chicago() -> Tz {
        parse_timezone("America/Chicago").unwrap()
    }

    #[test]
    fn test_parse_chicago_deadline() {
        // Feb is CST (UTC-6)
        let utc = parse_local_deadline_to_utc("2026-02-20 23:59", chicago()).unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-02-21T05:59:00+00:00");
    }

    #[test]
    fn rfc3339_wins_over_local_parsing() {
        let v = DueDateValue::Text("2026-03-01T12:00:00+02:00".to_string());
        let utc = parse_due_date(&v, chicago()).unwrap();
        assert_eq!(utc.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }

    #[test]
    fn firestore_timestamp_and_millis_agree() {
        let a = parse_due_date(
            &DueDateValue::Timestamp {
                seconds: 1_767_225_600,
                nanoseconds: 0,
            },
            chicago(),
        )
        .unwrap();
        let b = parse_due_date(&DueDateValue::Millis(1_767_225_600_000), chicago()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dst_gap_is_rejected() {
        // 2026-03-08 02:30 does not exist in Chicago.
        let err = parse_local_deadline_to_utc("2026-03-08 02:30", chicago()).unwrap_err();
        assert!(matches!(err, ReminderError::InvalidDate { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = parse_due_date(&DueDateValue::Text("next tuesday".into()), chicago()).unwrap_err();
        assert!(err.to_string().contains("next tuesday"));
    }

    #[test]
    fn unknown_timezone() {
        assert!(matches!(
            parse_timezone("Mars/Olympus"),
            Err(ReminderError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn untagged_decoding() {
        let v: DueDateValue = serde_json::from_str(r#"{"seconds": 10, "nanoseconds": 5}"#).unwrap();
        assert_eq!(
            v,
            DueDateValue::Timestamp {
                seconds: 10,
                nanoseconds: 5
            }
        );
        let v: DueDateValue = serde_json::from_str("1700000000000").unwrap();
        assert_eq!(v, DueDateValue::Millis(1_700_000_000_000));
    }
}
