//! GPS-disciplined wall-clock timestamps.
//!
//! [`TriggerTimestamp`] mirrors the `CURRENT_TIME`/`DOWNLOAD_TIME` packet
//! payload byte-for-byte (see `timer::protocol`) so parsing is a direct
//! field read, with [`TriggerTimestamp::normalize`] carrying any
//! out-of-range field (most commonly a `milliseconds` rollover) up through
//! the calendar fields.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};

/// An absolute wall-clock instant as reported by the GPS timer board.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub milliseconds: u16,
    /// Whether the GPS was disciplined (locked) when this instant was captured.
    pub locked: bool,
    /// Exposure-mode-unit progress counter; zero on a trigger event, meaningful
    /// only when streamed as "current time".
    pub exposure_progress: u16,
}

impl TriggerTimestamp {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        year: u16,
        month: u8,
        day: u8,
        hours: u8,
        minutes: u8,
        seconds: u8,
        milliseconds: u16,
        locked: bool,
        exposure_progress: u16,
    ) -> Self {
        let mut ts = Self {
            year,
            month,
            day,
            hours,
            minutes,
            seconds,
            milliseconds,
            locked,
            exposure_progress,
        };
        ts.normalize();
        ts
    }

    /// Carries overflow from milliseconds up through year so every field
    /// lies within its calendar range.
    pub fn normalize(&mut self) {
        let mut carry = self.milliseconds / 1000;
        self.milliseconds %= 1000;

        let mut seconds = self.seconds as u32 + carry;
        carry = seconds / 60;
        seconds %= 60;
        self.seconds = seconds as u8;

        let mut minutes = self.minutes as u32 + carry;
        carry = minutes / 60;
        minutes %= 60;
        self.minutes = minutes as u8;

        let mut hours = self.hours as u32 + carry;
        carry = hours / 24;
        hours %= 24;
        self.hours = hours as u8;

        // Roll days (and therefore months/years) via chrono's calendar math
        // rather than hand-rolled month-length tables.
        if carry > 0 || self.day == 0 {
            let base = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, 1)
                .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date"));
            let date = base + chrono::Duration::days(self.day as i64 - 1 + carry as i64);
            self.year = date.year() as u16;
            self.month = date.month() as u8;
            self.day = date.day() as u8;
        }
    }

    /// Converts to a UTC instant. The GPS timer reports local-to-the-observatory
    /// wall clock fields that this crate treats as already-UTC for arithmetic
    /// purposes (the original hardware reports UTC directly).
    pub fn to_datetime(&self) -> DateTime<Utc> {
        let date = NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)
            .unwrap_or_else(|| NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date"));
        let time = NaiveTime::from_hms_milli_opt(
            self.hours as u32,
            self.minutes as u32,
            self.seconds as u32,
            self.milliseconds as u32,
        )
        .unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).expect("valid midnight"));
        let naive = NaiveDateTime::new(date, time);
        Utc.from_utc_datetime(&naive)
    }

    pub fn from_datetime(dt: DateTime<Utc>, locked: bool, exposure_progress: u16) -> Self {
        Self::new(
            dt.year() as u16,
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            (dt.timestamp_subsec_millis()) as u16,
            locked,
            exposure_progress,
        )
    }

    /// Formats the time-of-day as `HH:MM:SS.sss` or `HH:MM:SS` depending on
    /// whether millisecond precision is required (MILLISECONDS trigger mode).
    pub fn format_time(&self, milliseconds_precision: bool) -> String {
        if milliseconds_precision {
            format!(
                "{:02}:{:02}:{:02}.{:03}",
                self.hours, self.minutes, self.seconds, self.milliseconds
            )
        } else {
            format!("{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
        }
    }

    pub fn format_date(&self) -> String {
        format!("{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }

    /// Returns a new timestamp shifted by the given signed number of
    /// milliseconds, used by `normalize_trigger` backend offsets.
    pub fn shifted_by_millis(&self, delta_ms: i64) -> Self {
        let dt = self.to_datetime() + chrono::Duration::milliseconds(delta_ms);
        Self::from_datetime(dt, self.locked, self.exposure_progress)
    }
}
