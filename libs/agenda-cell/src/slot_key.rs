// libs/agenda-cell/src/slot_key.rs
//
// Slot keys are "DD_HHMM" strings. Fixed-width padding makes lexicographic
// order identical to chronological order within one month.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::SchedulingError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SlotKey(String);

impl SlotKey {
    pub fn encode(day: u32, hour: u32, minute: u32) -> Result<Self, SchedulingError> {
        if !(1..=31).contains(&day) {
            return Err(SchedulingError::Validation(format!("Day {} is outside 1..31", day)));
        }
        if hour > 23 || minute > 59 {
            return Err(SchedulingError::Validation(format!(
                "Time {:02}:{:02} is not a valid 24h time",
                hour, minute
            )));
        }
        Ok(Self(format!("{:02}_{:02}{:02}", day, hour, minute)))
    }

    pub fn from_time(day: u32, time: NaiveTime) -> Result<Self, SchedulingError> {
        Self::encode(day, time.hour(), time.minute())
    }

    pub fn from_datetime(at: NaiveDateTime) -> Result<Self, SchedulingError> {
        Self::from_time(at.day(), at.time())
    }

    pub fn parse(raw: &str) -> Result<Self, SchedulingError> {
        let invalid = || SchedulingError::Validation(format!("'{}' is not a DD_HHMM slot key", raw));

        let bytes = raw.as_bytes();
        if !raw.is_ascii() || bytes.len() != 7 || bytes[2] != b'_' {
            return Err(invalid());
        }
        let digits = |s: &str| -> Result<u32, SchedulingError> {
            if !s.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            s.parse().map_err(|_| invalid())
        };

        let day = digits(&raw[0..2])?;
        let hour = digits(&raw[3..5])?;
        let minute = digits(&raw[5..7])?;
        Self::encode(day, hour, minute)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn day(&self) -> u32 {
        self.0[0..2].parse().unwrap_or_default()
    }

    pub fn time(&self) -> NaiveTime {
        let hour = self.0[3..5].parse().unwrap_or_default();
        let minute = self.0[5..7].parse().unwrap_or_default();
        NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
    }

    /// Combine with the partition's year/month. `None` when the day does not
    /// exist in that month (e.g. "31_0900" in April).
    pub fn to_datetime(&self, year: i32, month: u32) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(year, month, self.day()).map(|date| date.and_time(self.time()))
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SlotKey {
    type Err = SchedulingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SlotKey {
    type Error = SchedulingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SlotKey> for String {
    fn from(key: SlotKey) -> Self {
        key.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_with_zero_padding() {
        assert_eq!(SlotKey::encode(5, 9, 0).unwrap().as_str(), "05_0900");
        assert_eq!(SlotKey::encode(31, 23, 59).unwrap().as_str(), "31_2359");
    }

    #[test]
    fn rejects_out_of_range_components() {
        assert!(SlotKey::encode(0, 9, 0).is_err());
        assert!(SlotKey::encode(32, 9, 0).is_err());
        assert!(SlotKey::encode(1, 24, 0).is_err());
        assert!(SlotKey::encode(1, 9, 60).is_err());
    }

    #[test]
    fn parse_is_inverse_of_encode() {
        let key = SlotKey::parse("12_1430").unwrap();
        assert_eq!(key.day(), 12);
        assert_eq!(key.time(), NaiveTime::from_hms_opt(14, 30, 0).unwrap());
        assert_eq!(SlotKey::from_time(12, key.time()).unwrap(), key);
    }

    #[test]
    fn parse_rejects_malformed_keys() {
        for raw in ["5_0900", "05-0900", "05_900", "ab_0900", "05_09000", "05_0é0", "00_0900", "05_2500", "é5_0900"] {
            assert!(SlotKey::parse(raw).is_err(), "{} should be rejected", raw);
        }
    }

    #[test]
    fn ordering_matches_chronology() {
        let mut keys = vec![
            SlotKey::encode(10, 8, 0).unwrap(),
            SlotKey::encode(2, 17, 30).unwrap(),
            SlotKey::encode(2, 9, 5).unwrap(),
            SlotKey::encode(10, 7, 59).unwrap(),
        ];
        keys.sort();
        let instants: Vec<_> = keys.iter().map(|k| k.to_datetime(2025, 3).unwrap()).collect();
        let mut sorted = instants.clone();
        sorted.sort();
        assert_eq!(instants, sorted);
    }

    #[test]
    fn to_datetime_rejects_days_missing_from_month() {
        let key = SlotKey::encode(31, 9, 0).unwrap();
        assert!(key.to_datetime(2025, 4).is_none());
        assert_eq!(
            key.to_datetime(2025, 5).unwrap(),
            NaiveDate::from_ymd_opt(2025, 5, 31).unwrap().and_hms_opt(9, 0, 0).unwrap()
        );
    }

    #[test]
    fn serde_uses_plain_string() {
        let key = SlotKey::encode(3, 10, 15).unwrap();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"03_1015\"");
        let back: SlotKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
        assert!(serde_json::from_str::<SlotKey>("\"bad\"").is_err());
    }
}
