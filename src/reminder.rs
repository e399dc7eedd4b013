use chrono::{DateTime, FixedOffset, Local, LocalResult, NaiveDate, NaiveTime, Offset, TimeZone};

use crate::errors::TaskError;

/// Source of "now" for fire-time validation and timer delays.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        let now = Local::now();
        now.with_timezone(&now.offset().fix())
    }
}

/// Parses a strict `HH:MM` wall-clock time.
pub fn parse_time_of_day(value: &str) -> Result<NaiveTime, TaskError> {
    let trimmed = value.trim();
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map_err(|_| TaskError::InvalidInput(format!("expected HH:MM, got `{trimmed}`")))
}

pub fn format_time_of_day(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Resolves `date` at `time` in the local time zone, seconds zeroed.
pub fn fire_time(date: NaiveDate, time: NaiveTime) -> Result<DateTime<FixedOffset>, TaskError> {
    fire_time_in(date, time, &Local)
}

pub fn fire_time_in<Tz: TimeZone>(
    date: NaiveDate,
    time: NaiveTime,
    tz: &Tz,
) -> Result<DateTime<FixedOffset>, TaskError> {
    let naive = date.and_time(time);
    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(at) => at,
        // Clocks fall back: take the first occurrence.
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            return Err(TaskError::InvalidInput(format!(
                "{} does not exist on {date} in this time zone",
                format_time_of_day(time)
            )))
        }
    };
    Ok(resolved.with_timezone(&resolved.offset().fix()))
}
