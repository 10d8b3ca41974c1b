//! Resource quantity algebra: parse/compare/add/subtract quantities
//! written in SI (`k`, `M`, `G`, `T`, `P`, `E`, `m`) or binary
//! (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`) suffix notation, e.g. `100`,
//! `2.5`, `10Gi`, `500m`.
//!
//! Internally a quantity is stored as an `i128` count of milli-units
//! (`value * 1000`), which lets every suffix in the grammar resolve to
//! an exact integer scale factor and keeps all arithmetic exact and
//! overflow-checked.

use std::fmt;
use std::ops::{Add, Sub};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuantityError {
    #[error("empty quantity string")]
    Empty,
    #[error("invalid numeric value: {0}")]
    InvalidNumber(String),
    #[error("unknown suffix: {0}")]
    UnknownSuffix(String),
    #[error("quantity overflow")]
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Quantity(i128);

impl Quantity {
    pub const ZERO: Quantity = Quantity(0);

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// `max(0, self - other)`.
    pub fn saturating_sub(self, other: Quantity) -> Quantity {
        Quantity((self.0 - other.0).max(0))
    }

    pub fn checked_add(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_add(other.0).map(Quantity)
    }

    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        self.0.checked_sub(other.0).map(Quantity)
    }

    pub fn parse(s: &str) -> Result<Quantity, QuantityError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(QuantityError::Empty);
        }
        let (num_part, suffix) = split_suffix(s);
        let (numerator, denom_pow10) = parse_decimal(num_part)?;
        let milli = match suffix {
            "" => combine(numerator, denom_pow10, 3, 0)?,
            "m" => combine(numerator, denom_pow10, 0, 0)?,
            "k" | "K" => combine(numerator, denom_pow10, 6, 0)?,
            "M" => combine(numerator, denom_pow10, 9, 0)?,
            "G" => combine(numerator, denom_pow10, 12, 0)?,
            "T" => combine(numerator, denom_pow10, 15, 0)?,
            "P" => combine(numerator, denom_pow10, 18, 0)?,
            "E" => combine(numerator, denom_pow10, 21, 0)?,
            "Ki" => combine(numerator, denom_pow10, 3, 10)?,
            "Mi" => combine(numerator, denom_pow10, 3, 20)?,
            "Gi" => combine(numerator, denom_pow10, 3, 30)?,
            "Ti" => combine(numerator, denom_pow10, 3, 40)?,
            "Pi" => combine(numerator, denom_pow10, 3, 50)?,
            "Ei" => combine(numerator, denom_pow10, 3, 60)?,
            other => return Err(QuantityError::UnknownSuffix(other.to_string())),
        };
        Ok(Quantity(milli))
    }

    /// Quantity from a raw count of whole units (no fractional milli part).
    pub fn from_units(units: i64) -> Quantity {
        Quantity(units as i128 * 1000)
    }

    /// Scales by an integer count, e.g. a per-pod request times a pod count.
    pub fn scale(self, count: i64) -> Quantity {
        Quantity(self.0 * count as i128)
    }
}

/// `value / 10^denom_pow10 * 10^decimal_exp * 2^binary_bits`, rounded to
/// the nearest milli-unit.
fn combine(
    numerator: i128,
    denom_pow10: u32,
    decimal_exp: i32,
    binary_bits: u32,
) -> Result<i128, QuantityError> {
    let scaled = numerator
        .checked_mul(2i128.checked_pow(binary_bits).ok_or(QuantityError::Overflow)?)
        .ok_or(QuantityError::Overflow)?;
    let net = decimal_exp - denom_pow10 as i32;
    if net >= 0 {
        let factor = 10i128.checked_pow(net as u32).ok_or(QuantityError::Overflow)?;
        scaled.checked_mul(factor).ok_or(QuantityError::Overflow)
    } else {
        let divisor = 10i128
            .checked_pow((-net) as u32)
            .ok_or(QuantityError::Overflow)?;
        Ok(round_div(scaled, divisor))
    }
}

/// Rounds to the nearest integer (ties away from zero in the direction of
/// `+inf`). `divisor` is always a positive power of ten here.
fn round_div(numerator: i128, divisor: i128) -> i128 {
    let q = numerator.div_euclid(divisor);
    let r = numerator.rem_euclid(divisor);
    if r * 2 >= divisor { q + 1 } else { q }
}

fn parse_decimal(s: &str) -> Result<(i128, u32), QuantityError> {
    let (sign, s) = match s.strip_prefix('-') {
        Some(rest) => (-1i128, rest),
        None => (1i128, s.strip_prefix('+').unwrap_or(s)),
    };
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(QuantityError::InvalidNumber(s.to_string()));
    }
    let mut parts = s.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");
    if parts.next().is_some() {
        return Err(QuantityError::InvalidNumber(s.to_string()));
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(QuantityError::InvalidNumber(s.to_string()));
    }
    let int_val: i128 = if int_part.is_empty() {
        0
    } else {
        int_part
            .parse()
            .map_err(|_| QuantityError::InvalidNumber(s.to_string()))?
    };
    let frac_val: i128 = if frac_part.is_empty() {
        0
    } else {
        frac_part
            .parse()
            .map_err(|_| QuantityError::InvalidNumber(s.to_string()))?
    };
    let scale = frac_part.len() as u32;
    let numerator = int_val
        .checked_mul(10i128.checked_pow(scale).ok_or(QuantityError::Overflow)?)
        .ok_or(QuantityError::Overflow)?
        + frac_val;
    Ok((sign * numerator, scale))
}

const SUFFIXES: &[&str] = &[
    "Ki", "Mi", "Gi", "Ti", "Pi", "Ei", "m", "k", "K", "M", "G", "T", "P", "E",
];

fn split_suffix(s: &str) -> (&str, &str) {
    for suf in SUFFIXES {
        if let Some(stripped) = s.strip_suffix(suf) {
            return (stripped, suf);
        }
    }
    (s, "")
}

impl FromStr for Quantity {
    type Err = QuantityError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quantity::parse(s)
    }
}

impl Add for Quantity {
    type Output = Quantity;
    fn add(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 + rhs.0)
    }
}

impl Sub for Quantity {
    type Output = Quantity;
    fn sub(self, rhs: Quantity) -> Quantity {
        Quantity(self.0 - rhs.0)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / 1000;
        let rem = (self.0 % 1000).abs();
        if rem == 0 {
            write!(f, "{whole}")
        } else {
            let mut frac = format!("{rem:03}");
            while frac.ends_with('0') {
                frac.pop();
            }
            write!(f, "{whole}.{frac}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_integer() {
        assert_eq!(Quantity::parse("100").unwrap(), Quantity::from_units(100));
    }

    #[test]
    fn parses_decimal() {
        assert_eq!(Quantity::parse("2.5").unwrap(), Quantity(2500));
    }

    #[test]
    fn parses_milli_suffix() {
        assert_eq!(Quantity::parse("500m").unwrap(), Quantity(500));
        assert_eq!(Quantity::parse("1000m").unwrap(), Quantity::from_units(1));
    }

    #[test]
    fn parses_binary_suffix() {
        let ten_gi = Quantity::parse("10Gi").unwrap();
        assert_eq!(ten_gi, Quantity::from_units(10 * 1024 * 1024 * 1024));
    }

    #[test]
    fn parses_si_suffix() {
        assert_eq!(Quantity::parse("1k").unwrap(), Quantity::from_units(1000));
        assert_eq!(Quantity::parse("1M").unwrap(), Quantity::from_units(1_000_000));
    }

    #[test]
    fn rejects_unknown_suffix() {
        assert!(Quantity::parse("5Q").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(Quantity::parse("abc").is_err());
        assert!(Quantity::parse("").is_err());
    }

    #[test]
    fn ordering_and_arithmetic() {
        let a = Quantity::parse("2").unwrap();
        let b = Quantity::parse("500m").unwrap();
        assert!(a > b);
        assert_eq!(a + b, Quantity::parse("2.5").unwrap());
        assert_eq!(a.saturating_sub(Quantity::parse("5").unwrap()), Quantity::ZERO);
    }

    #[test]
    fn display_roundtrip() {
        assert_eq!(Quantity::parse("2.5").unwrap().to_string(), "2.5");
        assert_eq!(Quantity::parse("5").unwrap().to_string(), "5");
    }
}
