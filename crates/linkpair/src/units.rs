//! Human-readable unit parsing for shaping parameters.
//!
//! Every parser returns `Ok(None)` when the field is not configured,
//! `Ok(Some(value))` when it is, and an error when the text is malformed
//! or out of range.
//!
//! ```ignore
//! use linkpair::units::{Delay, Percentage, Rate};
//!
//! assert_eq!(Rate::from("100 mbps").parse()?, Some(800_000_000));
//! assert_eq!(Delay::from("1.5ms").parse()?, Some(1500));
//! assert_eq!(Percentage(0.0).parse()?, None);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Magnitude suffixes, in rank order.
const MAGNITUDES: [char; 4] = ['k', 'm', 'g', 't'];

/// A bandwidth such as `"100mbit"`, `"10 MBps"` or `"1gibit"`.
///
/// Parses to bits per second. A `bps` suffix reads the value as bytes per
/// second and multiplies by 8.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rate(pub String);

impl Rate {
    /// Parse to bits per second.
    pub fn parse(&self) -> Result<Option<u64>> {
        let mut rate = self.0.trim().to_lowercase();
        if rate.is_empty() {
            return Ok(None);
        }

        let mut multiplier: u64 = 1;
        if let Some(stripped) = rate.strip_suffix("bit") {
            rate = stripped.to_string();
        } else if let Some(stripped) = rate.strip_suffix("bps") {
            rate = stripped.to_string();
            multiplier = 8;
        }

        let mut base: u64 = 1000;
        if let Some(stripped) = rate.strip_suffix('i') {
            rate = stripped.to_string();
            base = 1024;
        }

        if let Some(rank) = MAGNITUDES.iter().position(|&m| rate.ends_with(m)) {
            rate.pop();
            multiplier = (0..=rank)
                .try_fold(multiplier, |acc, _| acc.checked_mul(base))
                .ok_or_else(|| {
                    Error::validation("rate", format!("'{}' overflows 64 bits", self.0))
                })?;
        }

        let value: u64 = rate
            .trim()
            .parse()
            .map_err(|e| Error::validation("rate", format!("'{}': {}", self.0, e)))?;

        value
            .checked_mul(multiplier)
            .map(Some)
            .ok_or_else(|| Error::validation("rate", format!("'{}' overflows 64 bits", self.0)))
    }
}

impl From<&str> for Rate {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A duration such as `"300ms"`, `"1.5s"` or `"1h30m"`.
///
/// Valid units are `ns`, `us` (or `µs`), `ms`, `s`, `m` and `h`. Parses to
/// whole microseconds.
///
/// Durations longer than `u32::MAX` microseconds (about 71 minutes) saturate
/// at `u32::MAX` instead of wrapping around.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delay(pub String);

impl Delay {
    /// Parse to microseconds. Values above `u32::MAX` microseconds saturate.
    pub fn parse(&self) -> Result<Option<u32>> {
        let text = self.0.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (negative, nanos) = parse_duration_nanos(text)
            .map_err(|reason| Error::validation("duration", format!("'{}': {}", self.0, reason)))?;
        if negative && nanos > 0 {
            return Err(Error::validation("duration", format!("'{}' is negative", self.0)));
        }

        let micros = nanos / 1_000;
        Ok(Some(u32::try_from(micros).unwrap_or(u32::MAX)))
    }
}

impl From<&str> for Delay {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Parse `[-+]?(<decimal><unit>)+` or a bare `0` into a sign and nanoseconds.
fn parse_duration_nanos(text: &str) -> std::result::Result<(bool, u128), &'static str> {
    let (negative, mut rest) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };

    if rest == "0" {
        return Ok((negative, 0));
    }
    if rest.is_empty() {
        return Err("missing value");
    }

    let mut total: u128 = 0;
    while !rest.is_empty() {
        let int_end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        let int_part = &rest[..int_end];
        rest = &rest[int_end..];

        let mut frac_part = "";
        if let Some(after_dot) = rest.strip_prefix('.') {
            let frac_end = after_dot
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after_dot.len());
            frac_part = &after_dot[..frac_end];
            rest = &after_dot[frac_end..];
        }
        if int_part.is_empty() && frac_part.is_empty() {
            return Err("expected a number");
        }

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let unit = match &rest[..unit_end] {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            "" => return Err("missing unit"),
            _ => return Err("unknown unit"),
        };
        rest = &rest[unit_end..];

        let whole: u128 = if int_part.is_empty() {
            0
        } else {
            int_part.parse().map_err(|_| "value out of range")?
        };
        total = whole
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or("value out of range")?;

        // Digits past 1e-18 cannot change a nanosecond count.
        let frac_digits = &frac_part[..frac_part.len().min(18)];
        if !frac_digits.is_empty() {
            let numerator: u128 = frac_digits.parse().map_err(|_| "value out of range")?;
            let scale = 10u128.pow(frac_digits.len() as u32);
            total = total
                .checked_add(numerator * unit / scale)
                .ok_or("value out of range")?;
        }
    }

    Ok((negative, total))
}

/// A percentage in `(0, 100]`. Zero means "not configured".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Percentage(pub f32);

impl Percentage {
    /// Validate and pass the value through.
    ///
    /// An exact `0.0` is indistinguishable from "unset" and yields `None`.
    pub fn parse(&self) -> Result<Option<f32>> {
        let value = self.0;
        if value == 0.0 {
            return Ok(None);
        }
        if value.is_nan() || value < 0.0 || value > 100.0 {
            return Err(Error::validation(
                "percentage",
                format!("{} is not within (0, 100]", value),
            ));
        }
        Ok(Some(value))
    }
}

impl From<f32> for Percentage {
    fn from(value: f32) -> Self {
        Self(value)
    }
}
