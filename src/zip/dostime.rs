//! MS-DOS packed timestamps.
//!
//! The packed form is a `u32` with the date in the high half and the time in
//! the low half:
//!
//! ```text
//! date: yyyyyyy mmmm ddddd   (years since 1980, month 1-12, day 1-31)
//! time: hhhhh mmmmmm sssss   (hour, minute, seconds / 2)
//! ```

use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, Timelike};

use crate::error::{ZipError, ZipResult};

const MIN_YEAR: i32 = 1980;
const MAX_YEAR: i32 = 2030;

/// Timestamp reported for the "no date" values 0 and 0xFFFF.
pub fn default_date_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1995, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default()
}

/// Decode a packed DOS date/time.
///
/// Writers in the wild store all sorts of impossible values here, so rather
/// than rejecting them the fields are nudged into range: overflowing seconds,
/// minutes and hours carry into the next field, a 1980 date with a zero month
/// or day becomes January 1st, and anything still invalid is clamped into
/// 1980-2030 with the day capped at 28.
pub fn packed_to_date_time(packed: u32) -> ZipResult<NaiveDateTime> {
    if packed == 0 || packed == 0xFFFF {
        return Ok(default_date_time());
    }

    let timepart = packed & 0xFFFF;
    let datepart = packed >> 16;

    let mut second = (timepart & 0b0000000000011111) << 1;
    let mut minute = (timepart & 0b0000011111100000) >> 5;
    let mut hour = (timepart & 0b1111100000000000) >> 11;
    let mut day = datepart & 0b0000000000011111;
    let month = (datepart & 0b0000000111100000) >> 5;
    let year = MIN_YEAR + ((datepart & 0b1111111000000000) >> 9) as i32;

    if second >= 60 {
        minute += 1;
        second = 0;
    }
    if minute >= 60 {
        hour += 1;
        minute = 0;
    }
    if hour >= 24 {
        day += 1;
        hour = 0;
    }

    if year <= MAX_YEAR {
        if let Some(dt) = build(year, month, day, hour, minute, second) {
            return Ok(dt);
        }
    }

    if year == MIN_YEAR && (month == 0 || day == 0) {
        if let Some(dt) = build(year, 1, 1, hour, minute, second) {
            return Ok(dt);
        }
        if let Some(dt) = build(year, 1, 1, 0, 0, 0) {
            return Ok(dt);
        }
    }

    build(
        year.clamp(MIN_YEAR, MAX_YEAR),
        month.clamp(1, 12),
        day.clamp(1, 28),
        hour.min(23),
        minute.min(59),
        second.min(59),
    )
    .ok_or_else(|| ZipError::format(0, format!("unrepresentable DOS timestamp {packed:#010x}")))
}

fn build(
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
}

/// Encode a wall-clock timestamp. Seconds are truncated to an even value and
/// every field is masked to its bit width, so out-of-range years wrap.
pub fn date_time_to_packed(dt: NaiveDateTime) -> u32 {
    let years = (dt.year() - MIN_YEAR) as u32;
    let datepart = (dt.day() & 0x1F) | ((dt.month() & 0xF) << 5) | ((years & 0x7F) << 9);
    let timepart =
        ((dt.second() / 2) & 0x1F) | ((dt.minute() & 0x3F) << 5) | ((dt.hour() & 0x1F) << 11);
    (datepart << 16) | timepart
}

/// The current local time in packed form.
pub fn packed_now() -> u32 {
    date_time_to_packed(Local::now().naive_local())
}

pub fn packed_from_system_time(time: SystemTime) -> u32 {
    date_time_to_packed(DateTime::<Local>::from(time).naive_local())
}
