//! Parsing and rendering of integer monetary amounts.
//!
//! Command payloads cross a JSON boundary, so amounts arrive in whatever
//! shape the caller produced: native integers, big integers, floats that may
//! or may not be whole, and free-text strings. [`parse_amount`] funnels all
//! of them into a canonical `i64` or rejects them with a taxonomy error
//! naming the offending input.

use crate::error::{LedgerError, Result};

/// An amount-shaped value of unknown provenance.
#[derive(Debug, Clone, PartialEq)]
pub enum RawAmount {
    /// A native ledger integer.
    Int(i64),
    /// A big integer that may exceed the ledger range.
    Big(i128),
    /// A float; accepted only when finite and integral.
    Float(f64),
    /// Free text, e.g. a command argument.
    Text(String),
    /// An untyped JSON value from a command payload.
    Json(serde_json::Value),
}

impl From<i64> for RawAmount {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i128> for RawAmount {
    fn from(value: i128) -> Self {
        Self::Big(value)
    }
}

impl From<f64> for RawAmount {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for RawAmount {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for RawAmount {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<serde_json::Value> for RawAmount {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Parse a value of unknown shape into a canonical integer amount.
///
/// `label` names the input in error messages ("bet", "amount", ...).
///
/// # Errors
///
/// - [`LedgerError::InvalidAmount`] for non-integers and non-numeric text
/// - [`LedgerError::AmountOutOfRange`] for magnitudes outside `i64`
pub fn parse_amount(raw: impl Into<RawAmount>, label: &str) -> Result<i64> {
    match raw.into() {
        RawAmount::Int(value) => Ok(value),
        RawAmount::Big(value) => ensure_range(value, label),
        RawAmount::Float(value) => parse_float(value, label),
        RawAmount::Text(value) => parse_text(&value, label),
        RawAmount::Json(value) => parse_json(value, label),
    }
}

/// Like [`parse_amount`], but additionally rejects values ≤ 0.
///
/// # Errors
///
/// As [`parse_amount`], plus [`LedgerError::AmountNotPositive`].
pub fn parse_positive_amount(raw: impl Into<RawAmount>, label: &str) -> Result<i64> {
    let amount = parse_amount(raw, label)?;
    if amount <= 0 {
        return Err(LedgerError::AmountNotPositive {
            label: label.to_string(),
        });
    }
    Ok(amount)
}

/// Check a wide integer against the ledger's representable range.
///
/// # Errors
///
/// [`LedgerError::AmountOutOfRange`] when the value does not fit `i64`.
pub fn ensure_range(value: i128, label: &str) -> Result<i64> {
    i64::try_from(value).map_err(|_| LedgerError::AmountOutOfRange {
        label: label.to_string(),
    })
}

fn parse_float(value: f64, label: &str) -> Result<i64> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(LedgerError::InvalidAmount {
            label: label.to_string(),
        });
    }
    // Float-to-int casts saturate, so out-of-range magnitudes land on the
    // i128 bounds and fail the range check.
    #[allow(clippy::cast_possible_truncation)]
    let wide = value as i128;
    ensure_range(wide, label)
}

fn parse_text(value: &str, label: &str) -> Result<i64> {
    let trimmed = value.trim();
    trimmed
        .parse::<i128>()
        .map_err(|_| LedgerError::InvalidAmount {
            label: label.to_string(),
        })
        .and_then(|parsed| ensure_range(parsed, label))
}

fn parse_json(value: serde_json::Value, label: &str) -> Result<i64> {
    match value {
        serde_json::Value::Number(number) => {
            if let Some(int) = number.as_i64() {
                Ok(int)
            } else if let Some(uint) = number.as_u64() {
                ensure_range(i128::from(uint), label)
            } else if let Some(float) = number.as_f64() {
                parse_float(float, label)
            } else {
                Err(LedgerError::InvalidAmount {
                    label: label.to_string(),
                })
            }
        }
        serde_json::Value::String(text) => parse_text(&text, label),
        _ => Err(LedgerError::InvalidAmount {
            label: label.to_string(),
        }),
    }
}

/// Render an amount for display, grouping thousands with commas.
#[must_use]
pub fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        grouped.push('-');
    }
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
