use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Coarse severity bucket a line's level token maps to. `Other` covers
/// anything unrecognized; an unrecognized level never makes a line
/// malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Debug,
    Other,
}

impl LogLevel {
    pub const COUNT: usize = 5;

    pub fn index(self) -> usize {
        match self {
            LogLevel::Info => 0,
            LogLevel::Warn => 1,
            LogLevel::Error => 2,
            LogLevel::Debug => 3,
            LogLevel::Other => 4,
        }
    }

    pub fn from_index(i: usize) -> LogLevel {
        match i {
            0 => LogLevel::Info,
            1 => LogLevel::Warn,
            2 => LogLevel::Error,
            3 => LogLevel::Debug,
            _ => LogLevel::Other,
        }
    }
}

/// A successfully tokenized line. All spans borrow from the input buffer;
/// nothing here allocates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message_key: &'a [u8],
    pub latency_ms: Option<i32>,
}

/// Tokenizes one already-terminator-stripped line. Returns `None` only when
/// the timestamp field fails strict ISO-8601 validation; a missing level or
/// message is never malformed.
pub fn parse_line(line: &[u8]) -> Option<ParsedLine<'_>> {
    let mut fields = line.splitn(3, |&b| b == b' ');
    let ts_bytes = fields.next().unwrap_or(b"");
    let level_bytes = fields.next().unwrap_or(b"");
    let rest = fields.next().unwrap_or(b"");

    let timestamp = parse_timestamp(ts_bytes)?;
    let level = parse_level(level_bytes);
    let message_key = first_token(rest);
    let latency_ms = parse_latency(rest);

    Some(ParsedLine {
        timestamp,
        level,
        message_key,
        latency_ms,
    })
}

fn parse_digits(b: &[u8]) -> Option<u32> {
    if b.is_empty() {
        return None;
    }
    let mut v: u32 = 0;
    for &c in b {
        if !c.is_ascii_digit() {
            return None;
        }
        v = v * 10 + (c - b'0') as u32;
    }
    Some(v)
}

/// Parses `YYYY-MM-DDTHH:MM:SS(.fraction)?(Z|+HH:MM|-HH:MM)`, truncating any
/// fraction to its first three digits (padding short fractions with
/// trailing zeros) and converting the result to UTC.
fn parse_timestamp(b: &[u8]) -> Option<DateTime<Utc>> {
    if b.len() < 20 {
        return None;
    }
    if b[4] != b'-' || b[7] != b'-' || b[10] != b'T' || b[13] != b':' || b[16] != b':' {
        return None;
    }
    let year = parse_digits(&b[0..4])? as i32;
    let month = parse_digits(&b[5..7])?;
    let day = parse_digits(&b[8..10])?;
    let hour = parse_digits(&b[11..13])?;
    let minute = parse_digits(&b[14..16])?;
    let second = parse_digits(&b[17..19])?;

    let mut idx = 19;
    let mut millis: u32 = 0;
    if idx < b.len() && b[idx] == b'.' {
        idx += 1;
        let frac_start = idx;
        while idx < b.len() && b[idx].is_ascii_digit() {
            idx += 1;
        }
        if idx == frac_start {
            return None;
        }
        let frac = &b[frac_start..idx];
        let take = frac.len().min(3);
        let mut ms = 0u32;
        for &d in &frac[..take] {
            ms = ms * 10 + (d - b'0') as u32;
        }
        for _ in take..3 {
            ms *= 10;
        }
        millis = ms;
    }

    if idx >= b.len() {
        return None;
    }
    let offset = match b[idx] {
        b'Z' | b'z' => {
            idx += 1;
            FixedOffset::east_opt(0)?
        }
        sign @ (b'+' | b'-') => {
            idx += 1;
            if idx + 5 > b.len() || b[idx + 2] != b':' {
                return None;
            }
            let oh = parse_digits(&b[idx..idx + 2])? as i32;
            let om = parse_digits(&b[idx + 3..idx + 5])? as i32;
            idx += 5;
            let total = oh * 3600 + om * 60;
            let signed = if sign == b'-' { -total } else { total };
            FixedOffset::east_opt(signed)?
        }
        _ => return None,
    };

    if idx != b.len() {
        return None;
    }

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_milli_opt(hour, minute, second, millis)?;
    let naive = NaiveDateTime::new(date, time);
    let local = offset.from_local_datetime(&naive).single()?;
    Some(local.with_timezone(&Utc))
}

fn parse_level(b: &[u8]) -> LogLevel {
    if b.eq_ignore_ascii_case(b"INFO") {
        LogLevel::Info
    } else if b.eq_ignore_ascii_case(b"WARN") {
        LogLevel::Warn
    } else if b.eq_ignore_ascii_case(b"ERROR") {
        LogLevel::Error
    } else if b.eq_ignore_ascii_case(b"DEBUG") {
        LogLevel::Debug
    } else {
        LogLevel::Other
    }
}

fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn first_token(rest: &[u8]) -> &[u8] {
    let mut start = 0;
    while start < rest.len() && is_space(rest[start]) {
        start += 1;
    }
    let mut end = start;
    while end < rest.len() && !is_space(rest[end]) {
        end += 1;
    }
    &rest[start..end]
}

fn parse_latency(rest: &[u8]) -> Option<i32> {
    const NEEDLE: &[u8] = b"latency_ms=";
    if rest.len() < NEEDLE.len() {
        return None;
    }
    let mut i = 0;
    while i + NEEDLE.len() <= rest.len() {
        if &rest[i..i + NEEDLE.len()] == NEEDLE {
            let digits_start = i + NEEDLE.len();
            let mut j = digits_start;
            while j < rest.len() && rest[j].is_ascii_digit() {
                j += 1;
            }
            if j > digits_start {
                let mut v: i64 = 0;
                for &d in &rest[digits_start..j] {
                    v = (v * 10 + (d - b'0') as i64).min(i32::MAX as i64);
                }
                return Some(v as i32);
            }
        }
        i += 1;
    }
    None
}
