// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Value coercion rules from JSON value kinds to column categories
//!
//! Every rule is a pure function over one JSON value, so the widening
//! matrix can be checked without a batch or a parser.

use chrono::NaiveDateTime;
use serde_json::{Number, Value};
use snafu::{ensure, OptionExt, ResultExt};

use crate::schema::TypeCategory;
use crate::{error, Result};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Dynamic kind of one JSON value as seen by the conversion rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Null,
    Boolean,
    /// Integral number that fits `i64`
    Integer,
    /// Number written with a fraction or exponent, or beyond `i64`
    DecimalLiteral,
    String,
    Array,
    Object,
}

impl SourceKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => SourceKind::Null,
            Value::Bool(_) => SourceKind::Boolean,
            Value::Number(n) if n.is_i64() => SourceKind::Integer,
            Value::Number(_) => SourceKind::DecimalLiteral,
            Value::String(_) => SourceKind::String,
            Value::Array(_) => SourceKind::Array,
            Value::Object(_) => SourceKind::Object,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SourceKind::Null => "null",
            SourceKind::Boolean => "boolean",
            SourceKind::Integer => "integer",
            SourceKind::DecimalLiteral => "decimal number",
            SourceKind::String => "string",
            SourceKind::Array => "array",
            SourceKind::Object => "object",
        }
    }
}

/// The widening matrix: whether a value of `source` kind may be stored
/// in a column of `target` category. Null is handled before this check.
pub fn is_accepted(source: SourceKind, target: TypeCategory) -> bool {
    use SourceKind as S;
    use TypeCategory as T;

    match target {
        T::Boolean => source == S::Boolean,
        T::Byte | T::Short | T::Int | T::Long => {
            matches!(source, S::Integer | S::DecimalLiteral)
        }
        T::Float | T::Double => matches!(source, S::Integer | S::DecimalLiteral),
        T::String | T::Char | T::Varchar | T::Decimal | T::Timestamp | T::Binary => {
            source == S::String
        }
        T::Struct | T::Map => source == S::Object,
        T::List => source == S::Array,
    }
}

/// Fail unless the matrix accepts `value` for `target`
pub fn check_accepted(value: &Value, target: TypeCategory) -> Result<()> {
    let source = SourceKind::of(value);
    ensure!(
        is_accepted(source, target),
        error::TypeMismatchSnafu {
            expected: target.name(),
            actual: source.name(),
        }
    );
    Ok(())
}

pub fn to_bool(value: &Value) -> Result<bool> {
    check_accepted(value, TypeCategory::Boolean)?;
    Ok(value.as_bool().unwrap_or_default())
}

/// Integer column rule: integers pass through, decimal literals truncate
/// toward zero, then the result is cast to the column width.
pub fn to_long(value: &Value, category: TypeCategory) -> Result<i64> {
    check_accepted(value, category)?;
    let Value::Number(n) = value else {
        return mismatch(category, value);
    };
    let wide = match n.as_i64() {
        Some(v) => v,
        None => truncate_number(n).context(error::TypeMismatchSnafu {
            expected: category.name(),
            actual: "out of range number",
        })?,
    };
    Ok(match category {
        TypeCategory::Byte => wide as i8 as i64,
        TypeCategory::Short => wide as i16 as i64,
        TypeCategory::Int => wide as i32 as i64,
        _ => wide,
    })
}

fn truncate_number(n: &Number) -> Option<i64> {
    let f = n.as_f64()?.trunc();
    // i64::MAX rounds up to 2^63 as f64, so the upper bound is exclusive
    (f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64).then_some(f as i64)
}

/// Floating column rule: every JSON number widens to `f64`; float columns
/// round through `f32`.
pub fn to_double(value: &Value, category: TypeCategory) -> Result<f64> {
    check_accepted(value, category)?;
    let wide = value.as_f64().unwrap_or_default();
    Ok(match category {
        TypeCategory::Float => wide as f32 as f64,
        _ => wide,
    })
}

pub fn to_str(value: &Value, category: TypeCategory) -> Result<&str> {
    check_accepted(value, category)?;
    match value.as_str() {
        Some(s) => Ok(s),
        None => mismatch(category, value),
    }
}

/// Parse a timestamp after normalizing `T`/`Z` separators to spaces.
/// The text is read as UTC.
pub fn parse_timestamp(text: &str) -> Result<NaiveDateTime> {
    let normalized = text.replace(['T', 'Z'], " ");
    NaiveDateTime::parse_from_str(normalized.trim(), TIMESTAMP_FORMAT)
        .context(error::InvalidTimestampSnafu { text })
}

/// Decode an even-length hex string pairwise into bytes
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    hex::decode(text).context(error::InvalidBinarySnafu { text })
}

/// Parse a decimal literal into an unscaled value at `scale`, rounding
/// half-up. Returns `Ok(None)` when the rounded value needs more than
/// `precision` digits.
pub fn parse_decimal(text: &str, precision: u8, scale: u8) -> Result<Option<i128>> {
    let s = text.trim();
    let (negative, s) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (mantissa, exponent) = match s.find(['e', 'E']) {
        Some(i) => (
            &s[..i],
            s[i + 1..]
                .parse::<i32>()
                .ok()
                .context(error::InvalidDecimalSnafu { literal: text })?,
        ),
        None => (s, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    ensure!(
        !(int_part.is_empty() && frac_part.is_empty())
            && int_part
                .bytes()
                .chain(frac_part.bytes())
                .all(|b| b.is_ascii_digit()),
        error::InvalidDecimalSnafu { literal: text }
    );

    let joined = format!("{int_part}{frac_part}");
    let digits = joined.trim_start_matches('0');
    let precision_digits = i64::from(precision);
    let shift = i64::from(scale) - (frac_part.len() as i64 - i64::from(exponent));

    let magnitude = if digits.is_empty() {
        0
    } else if shift >= 0 {
        if digits.len() as i64 + shift > precision_digits {
            return Ok(None);
        }
        parse_digits(digits, text)? * 10i128.pow(shift as u32)
    } else {
        let drop = usize::try_from(-shift).unwrap_or(usize::MAX);
        if drop > digits.len() {
            0
        } else {
            let (kept, dropped) = digits.split_at(digits.len() - drop);
            if kept.len() as i64 > precision_digits {
                return Ok(None);
            }
            let kept = if kept.is_empty() {
                0
            } else {
                parse_digits(kept, text)?
            };
            let round_up = dropped.as_bytes().first().is_some_and(|d| *d >= b'5');
            kept + i128::from(round_up)
        }
    };

    if magnitude >= 10i128.pow(u32::from(precision)) {
        return Ok(None);
    }
    Ok(Some(if negative { -magnitude } else { magnitude }))
}

fn parse_digits(digits: &str, literal: &str) -> Result<i128> {
    digits
        .parse::<i128>()
        .ok()
        .context(error::InvalidDecimalSnafu { literal })
}

/// Render an unscaled decimal with `scale` fractional digits
pub fn format_decimal(unscaled: i128, scale: u8) -> String {
    let sign = if unscaled < 0 { "-" } else { "" };
    let digits = unscaled.unsigned_abs().to_string();
    let scale = usize::from(scale);
    if scale == 0 {
        return format!("{sign}{digits}");
    }
    let padded = if digits.len() <= scale {
        format!("{}{digits}", "0".repeat(scale + 1 - digits.len()))
    } else {
        digits
    };
    let (int_part, frac_part) = padded.split_at(padded.len() - scale);
    format!("{sign}{int_part}.{frac_part}")
}

fn mismatch<T>(category: TypeCategory, value: &Value) -> Result<T> {
    error::TypeMismatchSnafu {
        expected: category.name(),
        actual: SourceKind::of(value).name(),
    }
    .fail()
}
