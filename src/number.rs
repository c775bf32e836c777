// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use core::cmp::Ordering;
use core::fmt::{self, Debug, Display, Formatter};
use core::str::FromStr;
use std::rc::Rc;

use anyhow::{bail, Error, Result};
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// An arbitrary-precision decimal number.
///
/// Numeric literals are preserved as their decimal text end-to-end to avoid
/// precision loss; conversion to binary floating point happens only when a
/// caller explicitly requires it. Equality and ordering compare the
/// canonicalized decimal form, so `1.50`, `1.5`, and `15e-1` are equal.
#[derive(Clone)]
pub struct Number {
    text: Rc<str>,
}

/// The canonical form of a number: sign, normalized significant digits
/// (no leading or trailing zeros), and the base-10 exponent such that the
/// value is `sign * 0.digits * 10^exp`.
struct Canonical {
    sign: i8,
    digits: String,
    exp: i64,
}

impl Number {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// True if the number has no fractional part.
    pub fn is_integer(&self) -> bool {
        let c = self.canonical();
        c.sign == 0 || c.exp >= c.digits.len() as i64
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.to_biguint().and_then(|(sign, n)| match sign {
            -1 => None,
            _ => n.to_u64(),
        })
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.to_biguint().and_then(|(sign, n)| {
            let v = n.to_i64()?;
            Some(if sign < 0 { -v } else { v })
        })
    }

    pub fn to_usize(&self) -> Option<usize> {
        self.to_u64().and_then(|v| usize::try_from(v).ok())
    }

    /// Converts to binary floating point. Lossy for values that cannot be
    /// represented exactly.
    pub fn to_f64(&self) -> f64 {
        self.text.parse().unwrap_or(f64::NAN)
    }

    fn to_biguint(&self) -> Option<(i8, BigUint)> {
        let c = self.canonical();
        if c.sign == 0 {
            return Some((0, BigUint::from(0u32)));
        }
        let zeros = c.exp.checked_sub(c.digits.len() as i64)?;
        if !(0..=4096).contains(&zeros) {
            return None;
        }
        let mut n = BigUint::parse_bytes(c.digits.as_bytes(), 10)?;
        n *= BigUint::from(10u32).pow(zeros as u32);
        Some((c.sign, n))
    }

    fn canonical(&self) -> Canonical {
        let s = self.text.as_ref();
        let (sign, s) = match s.as_bytes().first() {
            Some(b'-') => (-1i8, &s[1..]),
            Some(b'+') => (1, &s[1..]),
            _ => (1, s),
        };

        let (mantissa, exp10) = match s.find(['e', 'E']) {
            Some(i) => (&s[..i], s[i + 1..].parse::<i64>().unwrap_or(0)),
            None => (s, 0),
        };

        let (int_part, frac_part) = match mantissa.find('.') {
            Some(i) => (&mantissa[..i], &mantissa[i + 1..]),
            None => (mantissa, ""),
        };

        let mut digits = String::with_capacity(int_part.len() + frac_part.len());
        digits.push_str(int_part);
        digits.push_str(frac_part);

        let mut exp = int_part.len() as i64 + exp10;

        // Normalize: strip leading zeros (adjusting the exponent) and
        // trailing zeros.
        let lead = digits.len() - digits.trim_start_matches('0').len();
        digits.drain(..lead);
        exp -= lead as i64;
        digits.truncate(digits.trim_end_matches('0').len());

        if digits.is_empty() {
            return Canonical {
                sign: 0,
                digits,
                exp: 0,
            };
        }
        Canonical { sign, digits, exp }
    }
}

impl FromStr for Number {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !is_valid_number(s) {
            bail!("invalid number literal `{s}`");
        }
        Ok(Self { text: s.into() })
    }
}

/// Validates the JSON number grammar, with an optional leading `+` for YAML
/// compatibility.
pub(crate) fn is_valid_number(s: &str) -> bool {
    let s = s.strip_prefix(['-', '+']).unwrap_or(s);
    if s.is_empty() {
        return false;
    }
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let (int_part, frac_part) = match mantissa.find('.') {
        Some(i) => (&mantissa[..i], Some(&mantissa[i + 1..])),
        None => (mantissa, None),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if let Some(frac) = frac_part {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    if let Some(exp) = exponent {
        let exp = exp.strip_prefix(['-', '+']).unwrap_or(exp);
        if exp.is_empty() || !exp.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    true
}

impl From<u64> for Number {
    fn from(n: u64) -> Self {
        Self {
            text: n.to_string().into(),
        }
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Self {
            text: n.to_string().into(),
        }
    }
}

impl From<usize> for Number {
    fn from(n: usize) -> Self {
        Self {
            text: n.to_string().into(),
        }
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Number {}

impl PartialOrd for Number {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Number {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.canonical(), other.canonical());
        if a.sign != b.sign {
            return a.sign.cmp(&b.sign);
        }
        if a.sign == 0 {
            return Ordering::Equal;
        }
        // Same nonzero sign: a larger exponent means a larger magnitude;
        // with equal exponents the normalized digit strings compare as
        // fractions.
        let magnitude = a.exp.cmp(&b.exp).then_with(|| a.digits.cmp(&b.digits));
        if a.sign < 0 {
            magnitude.reverse()
        } else {
            magnitude
        }
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Number {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::Error;
        let n = serde_json::Number::from_str(&self.text).map_err(S::Error::custom)?;
        n.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Number {
    fn deserialize<D>(deserializer: D) -> Result<Number, D::Error>
    where
        D: Deserializer<'de>,
    {
        let n = serde_json::Number::deserialize(deserializer)?;
        Number::from_str(&n.to_string()).map_err(de::Error::custom)
    }
}
