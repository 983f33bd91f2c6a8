//! CMOS real-time clock and timezones
//!
//! Snapshots all 128 CMOS registers through the index/data port pair and
//! decodes the BCD clock fields. The timezone is loaded from
//! `A:/ETC/TIMEZONE` at boot; recognized names are `UTC`, `Europe/Berlin`
//! and `America/New_York`. Berlin applies the European DST rule on the
//! actual last Sundays of March and October (02:00/03:00 switch);
//! New York keeps a fixed -4 offset.

use core::sync::atomic::{AtomicI32, Ordering};

use crate::fs::vfs::OpenMode;

/// Path consulted for the timezone name.
pub const TIMEZONE_FILE: &str = "A:/ETC/TIMEZONE";

const CMOS_INDEX_PORT: u16 = 0x70;
const CMOS_DATA_PORT: u16 = 0x71;

/// Calendar date as decoded from CMOS. `weekday` is 1-based with Sunday
/// as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcDate {
    pub weekday: u8,
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcTime {
    pub hour: i32,
    pub minute: i32,
    pub second: i32,
}

/// Two-digit BCD to decimal.
pub fn bcd_to_decimal(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}

/// Decode the time registers (0: seconds, 2: minutes, 4: hours).
pub fn decode_time(values: &[u8; 128]) -> RtcTime {
    RtcTime {
        hour: bcd_to_decimal(values[4]) as i32,
        minute: bcd_to_decimal(values[2]) as i32,
        second: bcd_to_decimal(values[0]) as i32,
    }
}

/// Decode the date registers (6: weekday, 7: day, 8: month, 9: year,
/// 32: century).
pub fn decode_date(values: &[u8; 128]) -> RtcDate {
    let century = bcd_to_decimal(values[32]) as u16;
    let year = bcd_to_decimal(values[9]) as u16;
    RtcDate {
        weekday: bcd_to_decimal(values[6]),
        day: bcd_to_decimal(values[7]),
        month: bcd_to_decimal(values[8]),
        year: century * 100 + year,
    }
}

/// Snapshot all 128 CMOS registers.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn read_cmos() -> [u8; 128] {
    use crate::arch::x86::port::{inb, io_wait, outb};

    let mut values = [0u8; 128];
    for (index, value) in values.iter_mut().enumerate() {
        // SAFETY: the CMOS index/data protocol; short delay between
        // select and read.
        unsafe {
            outb(CMOS_INDEX_PORT, index as u8);
            io_wait();
            *value = inb(CMOS_DATA_PORT);
        }
    }
    values
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub fn read_cmos() -> [u8; 128] {
    [0; 128]
}

/// Supported timezones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timezone {
    Utc,
    EuropeBerlin,
    AmericaNewYork,
}

impl Timezone {
    /// Parse the name as written in the timezone file.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "UTC" => Some(Timezone::Utc),
            "Europe/Berlin" => Some(Timezone::EuropeBerlin),
            "America/New_York" => Some(Timezone::AmericaNewYork),
            _ => None,
        }
    }

    /// UTC offset in hours at the given local date/time.
    pub fn offset_hours(self, date: RtcDate, hour: i32) -> i32 {
        match self {
            Timezone::Utc => 0,
            Timezone::EuropeBerlin => {
                if is_summer_europe(date, hour) {
                    2
                } else {
                    1
                }
            }
            Timezone::AmericaNewYork => -4,
        }
    }
}

/// Date of this month's last Sunday, derived from any known
/// (day, weekday) pair; both March and October have 31 days.
fn last_sunday(day: u8, weekday: u8) -> u8 {
    // Next Sunday on or after `day` (weekday 1 == Sunday).
    let mut sunday = day + (8 - weekday) % 7;
    if sunday > 31 {
        sunday -= 7;
    }
    while sunday + 7 <= 31 {
        sunday += 7;
    }
    sunday
}

/// European DST: active from the last Sunday of March 02:00 to the last
/// Sunday of October 03:00.
pub fn is_summer_europe(date: RtcDate, hour: i32) -> bool {
    match date.month {
        4..=9 => true,
        3 => {
            let switch = last_sunday(date.day, date.weekday);
            date.day > switch || (date.day == switch && hour >= 2)
        }
        10 => {
            let switch = last_sunday(date.day, date.weekday);
            date.day < switch || (date.day == switch && hour < 3)
        }
        _ => false,
    }
}

/// Active timezone offset in hours, set once at boot.
static TIMEZONE_OFFSET: AtomicI32 = AtomicI32::new(0);

/// Read the timezone file and latch the offset. Missing or malformed
/// files leave the default UTC offset.
pub fn load_timezone(vfs: &mut crate::fs::Vfs) {
    let Ok(fd) = vfs.open(TIMEZONE_FILE, OpenMode::Read) else {
        log::warn!("rtc: no {}, defaulting to UTC+0", TIMEZONE_FILE);
        return;
    };
    let mut buffer = [0u8; 32];
    let read = vfs.read(fd, &mut buffer).unwrap_or(0);
    let _ = vfs.close(fd);
    let Some(name) = parse_timezone_name(&buffer[..read]) else {
        log::warn!("rtc: unreadable timezone name, defaulting to UTC+0");
        return;
    };
    let Some(zone) = Timezone::parse(name) else {
        log::warn!("rtc: unknown timezone '{}', defaulting to UTC+0", name);
        return;
    };
    let values = read_cmos();
    let offset = zone.offset_hours(decode_date(&values), decode_time(&values).hour);
    TIMEZONE_OFFSET.store(offset, Ordering::Release);
    log::info!("rtc: timezone '{}' -> UTC{:+}", name, offset);
}

/// First line of the timezone file, trimmed at whitespace.
pub fn parse_timezone_name(raw: &[u8]) -> Option<&str> {
    let end = raw
        .iter()
        .position(|byte| matches!(byte, b'\n' | b'\r' | b' ' | 0))
        .unwrap_or(raw.len());
    let name = core::str::from_utf8(&raw[..end]).ok()?;
    (!name.is_empty()).then_some(name)
}

/// Weekday names, indexed by the 1-based CMOS weekday.
pub const DAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Month names, 1-based.
pub const MONTHS: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Log the boot date and local time.
pub fn log_boot_time() {
    let date = today();
    let time = now();
    let weekday = DAYS
        .get(date.weekday.wrapping_sub(1) as usize)
        .copied()
        .unwrap_or("?");
    let month = MONTHS
        .get(date.month.wrapping_sub(1) as usize)
        .copied()
        .unwrap_or("?");
    log::info!(
        "rtc: booted {} {} {} {} at {:02}:{:02}:{:02}",
        weekday,
        date.day,
        month,
        date.year,
        time.hour,
        time.minute,
        time.second
    );
}

/// Local wall-clock time: CMOS time plus the latched timezone offset.
pub fn now() -> RtcTime {
    let values = read_cmos();
    let mut time = decode_time(&values);
    time.hour += TIMEZONE_OFFSET.load(Ordering::Acquire);
    time
}

/// Current calendar date from CMOS.
pub fn today() -> RtcDate {
    decode_date(&read_cmos())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bcd_decoding() {
        assert_eq!(bcd_to_decimal(0x00), 0);
        assert_eq!(bcd_to_decimal(0x42), 42);
        assert_eq!(bcd_to_decimal(0x59), 59);
    }

    #[test]
    fn cmos_register_decode() {
        let mut values = [0u8; 128];
        values[0] = 0x30; // seconds
        values[2] = 0x45; // minutes
        values[4] = 0x13; // hours
        values[6] = 0x01; // Sunday
        values[7] = 0x27;
        values[8] = 0x07;
        values[9] = 0x25;
        values[32] = 0x20;
        assert_eq!(
            decode_time(&values),
            RtcTime {
                hour: 13,
                minute: 45,
                second: 30
            }
        );
        assert_eq!(
            decode_date(&values),
            RtcDate {
                weekday: 1,
                day: 27,
                month: 7,
                year: 2025
            }
        );
    }

    #[test]
    fn timezone_names_parse() {
        assert_eq!(Timezone::parse("UTC"), Some(Timezone::Utc));
        assert_eq!(Timezone::parse("Europe/Berlin"), Some(Timezone::EuropeBerlin));
        assert_eq!(
            Timezone::parse("America/New_York"),
            Some(Timezone::AmericaNewYork)
        );
        assert_eq!(Timezone::parse("Mars/Olympus"), None);
    }

    #[test]
    fn timezone_file_content_is_trimmed() {
        assert_eq!(parse_timezone_name(b"Europe/Berlin\n"), Some("Europe/Berlin"));
        assert_eq!(parse_timezone_name(b"UTC \n"), Some("UTC"));
        assert_eq!(parse_timezone_name(b"UTC\0\0\0"), Some("UTC"));
        assert_eq!(parse_timezone_name(b"\n"), None);
    }

    fn date(weekday: u8, day: u8, month: u8) -> RtcDate {
        RtcDate {
            weekday,
            day,
            month,
            year: 2025,
        }
    }

    #[test]
    fn european_dst_switches_on_the_last_march_sunday() {
        // 2025: the last Sunday of March is the 30th.
        assert!(!is_summer_europe(date(7, 29, 3), 23)); // Saturday before
        assert!(!is_summer_europe(date(1, 30, 3), 1)); // switch day, 01:00
        assert!(is_summer_europe(date(1, 30, 3), 2)); // switch day, 02:00
        assert!(is_summer_europe(date(2, 31, 3), 0)); // Monday after
    }

    #[test]
    fn european_dst_ends_on_the_last_october_sunday() {
        // 2025: the last Sunday of October is the 26th.
        assert!(is_summer_europe(date(7, 25, 10), 12)); // Saturday before
        assert!(is_summer_europe(date(1, 26, 10), 2)); // switch day, 02:00
        assert!(!is_summer_europe(date(1, 26, 10), 3)); // switch day, 03:00
        assert!(!is_summer_europe(date(2, 27, 10), 12)); // Monday after
    }

    #[test]
    fn name_tables_line_up_with_cmos_numbering() {
        assert_eq!(DAYS[0], "Sunday");
        assert_eq!(DAYS[6], "Saturday");
        assert_eq!(MONTHS[0], "January");
        assert_eq!(MONTHS[11], "December");
        // CMOS weekday 1 == Sunday.
        assert_eq!(DAYS[(1u8.wrapping_sub(1)) as usize], "Sunday");
    }

    #[test]
    fn midsummer_and_midwinter_are_unambiguous() {
        assert!(is_summer_europe(date(3, 15, 7), 12));
        assert!(!is_summer_europe(date(3, 15, 1), 12));
        assert_eq!(Timezone::EuropeBerlin.offset_hours(date(3, 15, 7), 12), 2);
        assert_eq!(Timezone::EuropeBerlin.offset_hours(date(3, 15, 1), 12), 1);
        assert_eq!(Timezone::AmericaNewYork.offset_hours(date(3, 15, 7), 12), -4);
        assert_eq!(Timezone::Utc.offset_hours(date(3, 15, 7), 12), 0);
    }
}
