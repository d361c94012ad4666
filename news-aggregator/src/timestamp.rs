//! Timestamp handling for repository fields.
//!
//! The repository emits `yyyy-MM-ddTHH:mm[:ss][.fffffffff](Z|±HH:MM)`. Creation
//! timestamps are additionally normalized into the reference timezone by
//! rendering them as `yyyy-MM-dd HH:mm:ssXXX` and parsing that text back, which
//! drops sub-second precision. Readers see that rendering, so keep it exact.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike};
use chrono_tz::Tz;

const REFERENCE_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TimestampError(String);

type Parsed<T> = std::result::Result<T, TimestampError>;

// chrono's `%z`/`%#z` also accept `+0300` and optional colons, which the
// repository never emits and we must reject, so the layout is tokenized by hand.
struct Cursor<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.input.as_bytes().get(self.pos).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: u8) -> Parsed<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(TimestampError(format!(
                "expected '{}' at position {}",
                expected as char, self.pos
            )))
        }
    }

    fn digits(&mut self, count: usize, what: &str) -> Parsed<u32> {
        let mut value = 0u32;
        for _ in 0..count {
            match self.peek() {
                Some(b) if b.is_ascii_digit() => {
                    value = value * 10 + u32::from(b - b'0');
                    self.pos += 1;
                }
                _ => {
                    return Err(TimestampError(format!(
                        "expected {} digits for {} at position {}",
                        count, what, self.pos
                    )))
                }
            }
        }
        Ok(value)
    }

    /// Up to nine fraction digits, scaled to nanoseconds.
    fn fraction(&mut self) -> u32 {
        let mut nanos = 0u32;
        let mut read = 0u32;
        while read < 9 {
            match self.peek() {
                Some(b) if b.is_ascii_digit() => {
                    nanos = nanos * 10 + u32::from(b - b'0');
                    self.pos += 1;
                    read += 1;
                }
                _ => break,
            }
        }
        nanos * 10u32.pow(9 - read)
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }
}

/// Parses `Z` or `±HH:MM`. The whole input must be consumed.
fn parse_offset(text: &str) -> Parsed<FixedOffset> {
    if text == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(|| TimestampError("invalid offset".to_string()));
    }

    let mut cursor = Cursor::new(text);
    let sign = match cursor.peek() {
        Some(b'+') => 1,
        Some(b'-') => -1,
        _ => return Err(TimestampError(format!("missing UTC offset in '{}'", text))),
    };
    cursor.pos += 1;
    let hours = cursor.digits(2, "offset hours")?;
    cursor.expect(b':')?;
    let minutes = cursor.digits(2, "offset minutes")?;
    if !cursor.rest().is_empty() {
        return Err(TimestampError(format!("unexpected trailing input '{}'", cursor.rest())));
    }
    if hours > 18 || minutes > 59 {
        return Err(TimestampError(format!("offset out of range: '{}'", text)));
    }

    let seconds = sign * (hours as i32 * 3600 + minutes as i32 * 60);
    FixedOffset::east_opt(seconds).ok_or_else(|| TimestampError(format!("offset out of range: '{}'", text)))
}

fn render_offset(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    if seconds == 0 {
        return "Z".to_string();
    }
    let sign = if seconds < 0 { '-' } else { '+' };
    let abs = seconds.abs();
    format!("{}{:02}:{:02}", sign, abs / 3600, (abs % 3600) / 60)
}

fn attach_offset(naive: NaiveDateTime, offset: FixedOffset) -> Parsed<DateTime<FixedOffset>> {
    naive
        .and_local_timezone(offset)
        .single()
        .ok_or_else(|| TimestampError(format!("cannot place {} at offset {}", naive, offset)))
}

/// Parse the repository's flexible timestamp format, keeping the authored offset.
pub fn parse_flex(input: &str) -> Parsed<DateTime<FixedOffset>> {
    let mut cursor = Cursor::new(input);

    let year = cursor.digits(4, "year")?;
    cursor.expect(b'-')?;
    let month = cursor.digits(2, "month")?;
    cursor.expect(b'-')?;
    let day = cursor.digits(2, "day")?;
    cursor.expect(b'T')?;
    let hour = cursor.digits(2, "hour")?;
    cursor.expect(b':')?;
    let minute = cursor.digits(2, "minute")?;

    let second = if cursor.eat(b':') {
        cursor.digits(2, "second")?
    } else {
        0
    };
    let nanos = if cursor.eat(b'.') { cursor.fraction() } else { 0 };

    let offset = parse_offset(cursor.rest())?;

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| TimestampError(format!("invalid calendar date in '{}'", input)))?;
    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, nanos)
        .ok_or_else(|| TimestampError(format!("invalid time of day in '{}'", input)))?;

    attach_offset(NaiveDateTime::new(date, time), offset)
}

/// Render in the flexible format: seconds always, the fraction only when
/// non-zero with trailing zeros trimmed, `Z` for a zero offset.
pub fn render_flex(instant: DateTime<FixedOffset>) -> String {
    let mut out = instant.format("%Y-%m-%dT%H:%M:%S").to_string();
    let nanos = instant.nanosecond() % 1_000_000_000;
    if nanos != 0 {
        let fraction = format!("{:09}", nanos);
        out.push('.');
        out.push_str(fraction.trim_end_matches('0'));
    }
    out.push_str(&render_offset(*instant.offset()));
    out
}

/// `yyyy-MM-dd HH:mm:ssXXX`
pub fn render_reference(instant: DateTime<FixedOffset>) -> String {
    format!(
        "{}{}",
        instant.format(REFERENCE_LAYOUT),
        render_offset(*instant.offset())
    )
}

pub fn parse_reference(input: &str) -> Parsed<DateTime<FixedOffset>> {
    let (body, offset_text) = match input.strip_suffix('Z') {
        Some(body) => (body, "Z"),
        None if input.len() >= 6 && input.is_char_boundary(input.len() - 6) => {
            input.split_at(input.len() - 6)
        }
        None => return Err(TimestampError(format!("missing UTC offset in '{}'", input))),
    };
    let offset = parse_offset(offset_text)?;
    let naive = NaiveDateTime::parse_from_str(body, REFERENCE_LAYOUT)
        .map_err(|e| TimestampError(format!("'{}': {}", input, e)))?;
    attach_offset(naive, offset)
}

/// Move `instant` into the reference timezone through its canonical text form.
pub fn normalize_to_zone(instant: DateTime<FixedOffset>, zone: Tz) -> Parsed<DateTime<FixedOffset>> {
    let local = instant.with_timezone(&zone);
    let fixed = local.with_timezone(&local.offset().fix());
    parse_reference(&render_reference(fixed))
}
