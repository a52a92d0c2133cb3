//! Binary time formats (IEC 60870-5-4 / 101 7.2.6).
//!
//! ```text
//! CP16Time2a: milliseconds (0..59999)                      2 bytes
//! CP24Time2a: CP16 + minute(6) | SU-less | IV              3 bytes
//! CP32Time2a: CP24 + hour(5) | SU                          4 bytes
//! CP56Time2a: CP32 + day(5) | dow(3), month(4), year(7)    7 bytes
//! ```

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{Iec60870Error, Result};

fn check_len(bytes: &[u8], len: usize, name: &str) -> Result<()> {
    if bytes.len() < len {
        return Err(Iec60870Error::invalid_asdu(format!("{} too short", name)));
    }
    Ok(())
}

/// CP16Time2a: elapsed time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cp16Time2a(pub u16);

impl Cp16Time2a {
    /// Encoded size in bytes.
    pub const SIZE: usize = 2;

    /// Create from milliseconds (clamped to 59999).
    pub fn new(milliseconds: u16) -> Self {
        Self(milliseconds.min(59_999))
    }

    /// Elapsed milliseconds.
    pub fn milliseconds(&self) -> u16 {
        self.0
    }

    /// Parse from 2 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE, "CP16Time2a")?;
        Ok(Self(u16::from_le_bytes([bytes[0], bytes[1]])))
    }

    /// Encode to 2 bytes.
    pub fn to_bytes(&self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

/// CP24Time2a: millisecond and minute of the hour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cp24Time2a {
    /// Milliseconds (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Substituted time (bit 6 of the minute byte)
    pub substituted: bool,
    /// Invalid flag
    pub invalid: bool,
}

impl Cp24Time2a {
    /// Encoded size in bytes.
    pub const SIZE: usize = 3;

    /// Take the minute-of-hour part of a timestamp.
    pub fn from_datetime(time: &DateTime<Utc>) -> Self {
        Self {
            milliseconds: (time.second() * 1000 + time.timestamp_subsec_millis().min(999)) as u16,
            minutes: time.minute() as u8,
            substituted: false,
            invalid: false,
        }
    }

    /// Parse from 3 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE, "CP24Time2a")?;
        Ok(Self {
            milliseconds: u16::from_le_bytes([bytes[0], bytes[1]]),
            minutes: bytes[2] & 0x3F,
            substituted: (bytes[2] & 0x40) != 0,
            invalid: (bytes[2] & 0x80) != 0,
        })
    }

    /// Encode to 3 bytes.
    pub fn to_bytes(&self) -> [u8; 3] {
        let ms = self.milliseconds.to_le_bytes();
        [ms[0], ms[1], self.minute_byte()]
    }

    fn minute_byte(&self) -> u8 {
        (self.minutes & 0x3F)
            | if self.substituted { 0x40 } else { 0 }
            | if self.invalid { 0x80 } else { 0 }
    }
}

/// CP32Time2a: CP24Time2a plus hour and summer time flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cp32Time2a {
    /// Milliseconds (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Substituted time
    pub substituted: bool,
    /// Invalid flag
    pub invalid: bool,
    /// Summer time flag
    pub summer_time: bool,
}

impl Cp32Time2a {
    /// Encoded size in bytes.
    pub const SIZE: usize = 4;

    /// Take the time-of-day part of a timestamp.
    pub fn from_datetime(time: &DateTime<Utc>) -> Self {
        let short = Cp24Time2a::from_datetime(time);
        Self {
            milliseconds: short.milliseconds,
            minutes: short.minutes,
            hours: time.hour() as u8,
            ..Default::default()
        }
    }

    /// Parse from 4 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE, "CP32Time2a")?;
        let short = Cp24Time2a::from_bytes(bytes)?;
        Ok(Self {
            milliseconds: short.milliseconds,
            minutes: short.minutes,
            hours: bytes[3] & 0x1F,
            substituted: short.substituted,
            invalid: short.invalid,
            summer_time: (bytes[3] & 0x80) != 0,
        })
    }

    /// Encode to 4 bytes.
    pub fn to_bytes(&self) -> [u8; 4] {
        let short = Cp24Time2a {
            milliseconds: self.milliseconds,
            minutes: self.minutes,
            substituted: self.substituted,
            invalid: self.invalid,
        }
        .to_bytes();
        [
            short[0],
            short[1],
            short[2],
            (self.hours & 0x1F) | if self.summer_time { 0x80 } else { 0 },
        ]
    }
}

/// CP56Time2a timestamp (7 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Cp56Time2a {
    /// Milliseconds (0-59999)
    pub milliseconds: u16,
    /// Minutes (0-59)
    pub minutes: u8,
    /// Hours (0-23)
    pub hours: u8,
    /// Day of month (1-31)
    pub day: u8,
    /// Day of week (1-7, 1=Monday, 0=not used)
    pub day_of_week: u8,
    /// Month (1-12)
    pub month: u8,
    /// Year (0-99, years since 2000)
    pub year: u8,
    /// Substituted time
    pub substituted: bool,
    /// Invalid flag
    pub invalid: bool,
    /// Summer time flag
    pub summer_time: bool,
}

impl Cp56Time2a {
    /// Encoded size in bytes.
    pub const SIZE: usize = 7;

    /// Current UTC time.
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    /// Convert from a UTC timestamp. Years outside 2000..=2099 wrap modulo 100.
    pub fn from_datetime(time: &DateTime<Utc>) -> Self {
        let tod = Cp32Time2a::from_datetime(time);
        Self {
            milliseconds: tod.milliseconds,
            minutes: tod.minutes,
            hours: tod.hours,
            day: time.day() as u8,
            day_of_week: time.weekday().number_from_monday() as u8,
            month: time.month() as u8,
            year: (time.year().rem_euclid(100)) as u8,
            substituted: false,
            invalid: false,
            summer_time: false,
        }
    }

    /// Convert to a UTC timestamp (year interpreted as 2000 + year).
    ///
    /// Returns `None` when the fields do not form a valid calendar date.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        let date = NaiveDate::from_ymd_opt(
            2000 + i32::from(self.year),
            u32::from(self.month),
            u32::from(self.day),
        )?;
        let naive = date.and_hms_milli_opt(
            u32::from(self.hours),
            u32::from(self.minutes),
            u32::from(self.milliseconds / 1000),
            u32::from(self.milliseconds % 1000),
        )?;
        Utc.from_local_datetime(&naive).single()
    }

    /// Parse from 7 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, Self::SIZE, "CP56Time2a")?;
        let tod = Cp32Time2a::from_bytes(bytes)?;
        Ok(Self {
            milliseconds: tod.milliseconds,
            minutes: tod.minutes,
            hours: tod.hours,
            day: bytes[4] & 0x1F,
            day_of_week: (bytes[4] >> 5) & 0x07,
            month: bytes[5] & 0x0F,
            year: bytes[6] & 0x7F,
            substituted: tod.substituted,
            invalid: tod.invalid,
            summer_time: tod.summer_time,
        })
    }

    /// Encode to 7 bytes.
    pub fn to_bytes(&self) -> [u8; 7] {
        let tod = Cp32Time2a {
            milliseconds: self.milliseconds,
            minutes: self.minutes,
            hours: self.hours,
            substituted: self.substituted,
            invalid: self.invalid,
            summer_time: self.summer_time,
        }
        .to_bytes();
        [
            tod[0],
            tod[1],
            tod[2],
            tod[3],
            (self.day & 0x1F) | ((self.day_of_week & 0x07) << 5),
            self.month & 0x0F,
            self.year & 0x7F,
        ]
    }
}

impl From<DateTime<Utc>> for Cp56Time2a {
    fn from(time: DateTime<Utc>) -> Self {
        Self::from_datetime(&time)
    }
}

impl std::fmt::Display for Cp56Time2a {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}-{:02}-{:02} {:02}:{:02}:{:02}.{:03}",
            self.year,
            self.month,
            self.day,
            self.hours,
            self.minutes,
            self.milliseconds / 1000,
            self.milliseconds % 1000
        )?;
        if self.invalid {
            f.write_str(" IV")?;
        }
        if self.summer_time {
            f.write_str(" SU")?;
        }
        Ok(())
    }
}
