use std::convert::TryInto;
use std::time::SystemTime;

use time::{PrimitiveDateTime, UtcOffset};

/// Decodes a packed DOS date and time.  Returns `None` if the fields do not
/// name a real calendar date and time of day.
pub fn datetime_from_bits(date: u16, time: u16) -> Option<PrimitiveDateTime> {
    let year = (date >> 9) as i32 + 1980;
    let month = (((date >> 5) & 0xf) as u8).try_into().ok()?;
    let day = (date & 0x1f) as u8;
    let date = time::Date::from_calendar_date(year, month, day).ok()?;

    let hour = (time >> 11) as u8;
    let minute = ((time >> 5) & 0x3f) as u8;
    let second = 2 * (time & 0x1f) as u8;
    let time = time::Time::from_hms(hour, minute, second).ok()?;

    Some(PrimitiveDateTime::new(date, time))
}

/// Converts a packed DOS date and time, taken as local time, to a
/// `SystemTime`.  Falls back to UTC when the local offset is unknown.
pub fn system_time_from_bits(date: u16, time: u16) -> Option<SystemTime> {
    let datetime = datetime_from_bits(date, time)?;
    let offset = UtcOffset::local_offset_at(datetime.assume_utc())
        .unwrap_or(UtcOffset::UTC);
    Some(datetime.assume_offset(offset).into())
}
