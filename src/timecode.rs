//! Time-code parsing and formatting for slice marks.
//!
//! Marks use the ffmpeg duration spelling: `SS`, `MM:SS` or `HH:MM:SS`, each with an optional
//! fractional-second suffix. Resolution is one millisecond; extra fractional digits are
//! truncated, missing ones are zero-padded.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::SliceError;

const MILLIS_PER_SECOND: u64 = 1_000;
const MILLIS_PER_MINUTE: u64 = 60 * MILLIS_PER_SECOND;
const MILLIS_PER_HOUR: u64 = 60 * MILLIS_PER_MINUTE;
const FRACTION_DIGITS: usize = 3;

/// A non-negative offset into the source media with millisecond resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeMark {
    millis: u64,
}

impl TimeMark {
    pub const ZERO: Self = Self { millis: 0 };

    pub const fn from_millis(millis: u64) -> Self {
        Self { millis }
    }

    pub const fn as_millis(self) -> u64 {
        self.millis
    }

    pub fn hours(self) -> u64 {
        self.millis / MILLIS_PER_HOUR
    }

    pub fn minutes(self) -> u64 {
        (self.millis % MILLIS_PER_HOUR) / MILLIS_PER_MINUTE
    }

    pub fn seconds(self) -> u64 {
        (self.millis % MILLIS_PER_MINUTE) / MILLIS_PER_SECOND
    }

    pub fn subsec_millis(self) -> u64 {
        self.millis % MILLIS_PER_SECOND
    }

    pub fn is_zero(self) -> bool {
        self.millis == 0
    }

    /// `self - earlier`, or `None` when `earlier` is later than `self`.
    pub fn checked_sub(self, earlier: Self) -> Option<Self> {
        self.millis.checked_sub(earlier.millis).map(Self::from_millis)
    }

    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.millis)
    }
}

impl From<Duration> for TimeMark {
    /// Sub-millisecond precision is truncated.
    fn from(duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        Self::from_millis(millis)
    }
}

/// Parses a user-supplied mark such as `"5.325"`, `"1:05"` or `"01:02:03.4"`.
pub fn parse(text: &str) -> Result<TimeMark, SliceError> {
    let trimmed = text.trim();
    let invalid = |reason: &'static str| SliceError::InvalidTimeFormat {
        input: text.to_owned(),
        reason,
    };

    if trimmed.is_empty() {
        return Err(invalid("empty time mark"));
    }

    let fields = trimmed.split(':').collect::<Vec<_>>();
    let (hours, minutes, seconds) = match fields.as_slice() {
        [seconds] => ("0", "0", *seconds),
        [minutes, seconds] => ("0", *minutes, *seconds),
        [hours, minutes, seconds] => (*hours, *minutes, *seconds),
        _ => return Err(invalid("expected at most 3 colon-separated fields")),
    };

    let hours = parse_whole(hours).ok_or_else(|| invalid("hours must be a whole number"))?;
    let minutes = parse_whole(minutes).ok_or_else(|| invalid("minutes must be a whole number"))?;
    let (seconds, millis) = parse_seconds(seconds).ok_or_else(|| {
        invalid("seconds must be a number with an optional fractional part")
    })?;

    hours
        .checked_mul(MILLIS_PER_HOUR)
        .and_then(|total| total.checked_add(minutes.checked_mul(MILLIS_PER_MINUTE)?))
        .and_then(|total| total.checked_add(seconds.checked_mul(MILLIS_PER_SECOND)?))
        .and_then(|total| total.checked_add(millis))
        .map(TimeMark::from_millis)
        .ok_or_else(|| invalid("time mark is too large"))
}

/// Renders `HH:MM:SS`, with a `.mmm` suffix only when the millisecond part is non-zero.
pub fn format(mark: TimeMark) -> String {
    let mut text = format!(
        "{:02}:{:02}:{:02}",
        mark.hours(),
        mark.minutes(),
        mark.seconds()
    );
    if mark.subsec_millis() != 0 {
        text.push_str(&format!(".{:03}", mark.subsec_millis()));
    }
    text
}

fn parse_whole(field: &str) -> Option<u64> {
    if field.is_empty() || !field.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

fn parse_seconds(field: &str) -> Option<(u64, u64)> {
    let (whole, fraction) = match field.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (field, ""),
    };
    let whole = parse_whole(whole)?;
    if !fraction.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }

    let mut digits = fraction
        .chars()
        .take(FRACTION_DIGITS)
        .collect::<String>();
    while digits.len() < FRACTION_DIGITS {
        digits.push('0');
    }
    Some((whole, digits.parse().ok()?))
}

impl FromStr for TimeMark {
    type Err = SliceError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        parse(text)
    }
}

impl fmt::Display for TimeMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format(*self))
    }
}

impl Serialize for TimeMark {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(*self))
    }
}
