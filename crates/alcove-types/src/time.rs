use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

const MINUTES_PER_DAY: i32 = 24 * 60;

/// A wall-clock minute of the day in `HH:MM` form.
///
/// Delivery times are stored in UTC at minute granularity; a digest fires
/// when the current UTC time, truncated to the minute, matches exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeliveryTime {
    hour: u8,
    minute: u8,
}

impl DeliveryTime {
    pub fn new(hour: u8, minute: u8) -> Result<Self, ParseDeliveryTimeError> {
        if hour > 23 || minute > 59 {
            return Err(ParseDeliveryTimeError);
        }
        Ok(Self { hour, minute })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }

    /// The current minute of `dt`, seconds and below discarded.
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
        }
    }

    fn from_day_minutes(total: i32) -> Self {
        let wrapped = total.rem_euclid(MINUTES_PER_DAY);
        Self {
            hour: (wrapped / 60) as u8,
            minute: (wrapped % 60) as u8,
        }
    }
}

impl fmt::Display for DeliveryTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for DeliveryTime {
    type Err = ParseDeliveryTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s.split_once(':').ok_or(ParseDeliveryTimeError)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(ParseDeliveryTimeError);
        }
        let hour: u8 = h.parse().map_err(|_| ParseDeliveryTimeError)?;
        let minute: u8 = m.parse().map_err(|_| ParseDeliveryTimeError)?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for DeliveryTime {
    type Error = ParseDeliveryTimeError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DeliveryTime> for String {
    fn from(t: DeliveryTime) -> Self {
        t.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("delivery time must be HH:MM with hour 00-23 and minute 00-59")]
pub struct ParseDeliveryTimeError;

/// Convert a local wall-clock time to UTC.
///
/// `offset_minutes` follows the JavaScript `getTimezoneOffset` convention:
/// minutes to ADD to local time to reach UTC, so UTC+7 is -420 and UTC-5 is
/// +300. Valid offsets span [-720, 840] (UTC+12 through UTC-14).
pub fn local_to_utc(hour: u8, minute: u8, offset_minutes: i32) -> DeliveryTime {
    DeliveryTime::from_day_minutes(hour as i32 * 60 + minute as i32 + offset_minutes)
}

/// Convert a UTC delivery time back to local wall-clock `(hour, minute)`.
pub fn utc_to_local(time: DeliveryTime, offset_minutes: i32) -> (u8, u8) {
    let local =
        DeliveryTime::from_day_minutes(time.hour as i32 * 60 + time.minute as i32 - offset_minutes);
    (local.hour, local.minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parse_and_display() {
        let t: DeliveryTime = "08:05".parse().unwrap();
        assert_eq!(t.hour(), 8);
        assert_eq!(t.minute(), 5);
        assert_eq!(t.to_string(), "08:05");

        assert!("8:05".parse::<DeliveryTime>().is_err());
        assert!("24:00".parse::<DeliveryTime>().is_err());
        assert!("12:60".parse::<DeliveryTime>().is_err());
        assert!("1205".parse::<DeliveryTime>().is_err());
    }

    #[test]
    fn from_datetime_truncates_to_minute() {
        let dt = Utc.with_ymd_and_hms(2025, 3, 14, 8, 0, 59).unwrap();
        assert_eq!(DeliveryTime::from_datetime(&dt), "08:00".parse().unwrap());
    }

    #[test]
    fn local_to_utc_wraps_midnight() {
        // 01:30 local at UTC+7 (offset -420) is 18:30 UTC the previous day
        assert_eq!(local_to_utc(1, 30, -420).to_string(), "18:30");
        // 23:00 local at UTC-5 (offset +300) is 04:00 UTC the next day
        assert_eq!(local_to_utc(23, 0, 300).to_string(), "04:00");
        // Offset zero is the identity
        assert_eq!(local_to_utc(12, 34, 0).to_string(), "12:34");
    }

    #[test]
    fn round_trip_across_all_offsets() {
        let samples = [(0u8, 0u8), (0, 1), (8, 0), (12, 30), (23, 59)];
        for offset in -720..=840 {
            for (h, m) in samples {
                let t = DeliveryTime::new(h, m).unwrap();
                let (lh, lm) = utc_to_local(t, offset);
                assert_eq!(
                    local_to_utc(lh, lm, offset),
                    t,
                    "round trip failed for {t} at offset {offset}"
                );
            }
        }
    }

    #[test]
    fn round_trip_across_all_minutes_of_the_day() {
        for offset in [-720, -420, -1, 0, 59, 300, 545, 840] {
            for minutes in 0..MINUTES_PER_DAY {
                let t = DeliveryTime::from_day_minutes(minutes);
                let (lh, lm) = utc_to_local(t, offset);
                assert_eq!(local_to_utc(lh, lm, offset), t);
            }
        }
    }
}
