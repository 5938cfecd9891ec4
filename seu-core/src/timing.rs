//! High-resolution sleep and timestamp formatting (spec §4.H).

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Round-trippable local timestamp, formatted `YYYY-MM-DD HH:MM:SS.ffffff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Timestamp(DateTime<Local>);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Local::now())
    }

    pub fn from_ymd_hms_micros(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
        micros: u32,
    ) -> Self {
        let naive = chrono::NaiveDate::from_ymd(year, month, day)
            .and_hms_micro(hour, min, sec, micros);
        Timestamp(Local.from_local_datetime(&naive).unwrap())
    }

    pub fn format(&self) -> String {
        self.0.format(FORMAT).to_string()
    }

    pub fn parse(s: &str) -> Result<Self, chrono::ParseError> {
        let naive = NaiveDateTime::parse_from_str(s, FORMAT)?;
        Ok(Timestamp(Local.from_local_datetime(&naive).unwrap()))
    }

    /// `<board>_<benchmark>_<YYYY-MM-DD_HH-MM>` suffix (spec §6 file naming).
    pub fn campaign_file_suffix(&self) -> String {
        self.0.format("%Y-%m-%d_%H-%M").to_string()
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> String {
        ts.format()
    }
}

impl std::convert::TryFrom<String> for Timestamp {
    type Error = chrono::ParseError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        Timestamp::parse(&s)
    }
}

/// Sleeps for the given duration with microsecond-level accuracy.
///
/// Plain `thread::sleep` drifts by single-digit milliseconds on most
/// schedulers, which is large relative to the 1ms-10s injection windows
/// this campaign samples from. We busy-wait the final slice.
pub fn precise_sleep(duration: Duration) {
    const SPIN_THRESHOLD: Duration = Duration::from_millis(2);
    let start = Instant::now();
    if duration > SPIN_THRESHOLD {
        thread::sleep(duration - SPIN_THRESHOLD);
    }
    while start.elapsed() < duration {
        thread::yield_now();
    }
}

/// `cycles_elapsed = end - begin`, saturating (timer can wrap on real
/// hardware timers but not in our simulated ones; saturate defensively).
pub fn cycles_elapsed(begin: u64, end: u64) -> u64 {
    end.saturating_sub(begin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trips() {
        let ts = Timestamp::from_ymd_hms_micros(2023, 11, 2, 13, 45, 9, 123456);
        let formatted = ts.format();
        let parsed = Timestamp::parse(&formatted).unwrap();
        assert_eq!(parsed.format(), formatted);
    }

    #[test]
    fn cycles_elapsed_saturates() {
        assert_eq!(cycles_elapsed(100, 50), 0);
        assert_eq!(cycles_elapsed(50, 100), 50);
    }

    #[test]
    fn precise_sleep_is_not_shorter_than_requested() {
        let d = Duration::from_millis(5);
        let start = Instant::now();
        precise_sleep(d);
        assert!(start.elapsed() >= d);
    }
}
