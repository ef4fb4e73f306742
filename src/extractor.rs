//! Value Extractor
//!
//! Pulls numeric tokens out of raw statement text and buckets them by
//! position only:
//! - first third / middle third / last third of the filtered sequence
//! - every value, in order of appearance
//!
//! No semantic classification happens here. Interpretation layers may label
//! figures however they like, but the numbers used for verification come
//! from this positional scan alone.

use crate::error::AuditError;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

lazy_static! {
    /// Digits with optional grouping/decimal separators, optionally
    /// wrapped in parentheses or led by a minus sign
    static ref AMOUNT_TOKEN: Regex = Regex::new(r"\(?-?\d[\d.,]*\)?").unwrap();
}

/// Positional buckets over the filtered, order-preserving value sequence
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueBuckets {
    pub first_third: Vec<Decimal>,
    pub middle_third: Vec<Decimal>,
    pub last_third: Vec<Decimal>,
    pub all: Vec<Decimal>,
}

impl ValueBuckets {
    /// Slice a value sequence into thirds.
    ///
    /// Up to 3 values the first bucket holds everything; the middle and last
    /// buckets stay empty until there are more than 6 values.
    pub fn from_values(values: Vec<Decimal>) -> Self {
        let n = values.len();

        let first_third = if n > 3 {
            values[..n / 3].to_vec()
        } else {
            values.clone()
        };

        let (middle_third, last_third) = if n > 6 {
            (
                values[n / 3..2 * n / 3].to_vec(),
                values[2 * n / 3..].to_vec(),
            )
        } else {
            (Vec::new(), Vec::new())
        };

        Self {
            first_third,
            middle_third,
            last_third,
            all: values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}

/// Scans statement text for material amounts
#[derive(Debug, Clone)]
pub struct ValueExtractor {
    materiality_floor: Decimal,
}

impl ValueExtractor {
    pub fn new(materiality_floor: Decimal) -> Self {
        Self { materiality_floor }
    }

    pub fn materiality_floor(&self) -> Decimal {
        self.materiality_floor
    }

    /// Extract and bucket every material amount in `text`
    pub fn extract(&self, text: &str) -> ValueBuckets {
        ValueBuckets::from_values(self.scan(text))
    }

    /// All material amounts in order of appearance.
    ///
    /// Tokens that fail to parse are skipped; values whose magnitude is at or
    /// below the materiality floor (years, ratios, note numbers) are dropped.
    pub fn scan(&self, text: &str) -> Vec<Decimal> {
        AMOUNT_TOKEN
            .find_iter(text)
            .filter_map(|m| parse_amount(amount_token(text, &m)).ok())
            .filter(|value| value.abs() > self.materiality_floor)
            .collect()
    }
}

impl Default for ValueExtractor {
    fn default() -> Self {
        Self::new(Decimal::from(1000))
    }
}

/// Parse a statement amount into an exact decimal.
///
/// Accepts `1,234,567`, `1.234.567`, `1,234.56`, `1.234,56`, `-1234` and
/// the accounting negative `(1,234)`. A lone `.` is a decimal point; lone
/// commas are grouping separators. Grouped digits must read as thousands
/// (1-3 leading digits, then groups of exactly 3), so dates such as
/// `31.12.2023` are rejected.
pub fn parse_amount(raw: &str) -> Result<Decimal> {
    let invalid = || AuditError::InvalidAmount(raw.to_string());

    let mut token = raw.trim();
    let mut negative = false;

    if token.starts_with('(') && token.ends_with(')') && token.len() > 2 {
        negative = true;
        token = &token[1..token.len() - 1];
    }
    token = token.trim_start_matches('(').trim_end_matches(')');
    token = token.trim_end_matches(['.', ',']);

    if let Some(rest) = token.strip_prefix('-') {
        negative = !negative;
        token = rest;
    }

    if token.is_empty() || !token.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let cleaned = normalize_separators(token).ok_or_else(invalid)?;
    let value = Decimal::from_str(&cleaned).map_err(|_| invalid())?;

    Ok(if negative { -value } else { value })
}

/// A hyphen directly after a digit is a range dash (`2022-2023`), not a sign
fn amount_token<'t>(text: &'t str, m: &regex::Match<'t>) -> &'t str {
    let token = m.as_str();
    let after_digit = text.as_bytes()[..m.start()]
        .last()
        .map_or(false, |b| b.is_ascii_digit());

    match token.strip_prefix('-') {
        Some(rest) if after_digit => rest,
        _ => token,
    }
}

/// Plain `digits[.digits]` form of a token, or `None` when its separators
/// do not read as thousands grouping
fn normalize_separators(token: &str) -> Option<String> {
    let last_dot = token.rfind('.');
    let last_comma = token.rfind(',');

    // (grouping separator, decimal separator position)
    let (grouping, decimal) = match (last_dot, last_comma) {
        // Both present: the later one is the decimal separator
        (Some(dot), Some(comma)) if dot > comma => (Some(','), Some(dot)),
        (Some(_), Some(comma)) => (Some('.'), Some(comma)),
        (None, Some(_)) => (Some(','), None),
        (Some(_), None) if token.matches('.').count() > 1 => (Some('.'), None),
        (Some(dot), None) => (None, Some(dot)),
        (None, None) => (None, None),
    };

    let (integer, fraction) = match decimal {
        Some(at) => (&token[..at], Some(&token[at + 1..])),
        None => (token, None),
    };

    let digits = match grouping {
        Some(separator) => ungroup(integer, separator)?,
        None => integer.to_string(),
    };

    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(&digits) {
        return None;
    }

    match fraction {
        Some(f) if !all_digits(f) => None,
        Some(f) => Some(format!("{}.{}", digits, f)),
        None => Some(digits),
    }
}

fn ungroup(integer: &str, separator: char) -> Option<String> {
    let groups: Vec<&str> = integer.split(separator).collect();
    let (first, rest) = groups.split_first()?;

    let thousands = (1..=3).contains(&first.len()) && rest.iter().all(|g| g.len() == 3);
    thousands.then(|| groups.concat())
}
