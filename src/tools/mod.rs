//! Arithmetic Engine
//!
//! The calculation tools every replica must route its numbers through.
//! All arithmetic runs on 96-bit `Decimal` (28 significant digits); values are
//! narrowed to `f64` only when a figure leaves the core for comparison or
//! reporting.
//!
//! Every call appends exactly one `LogEntry`, success or failure. A failed
//! call is tagged `precision = error` and carries the error text; it is never
//! an `Err`.

use crate::error::OperationError;
use crate::models::{LogEntry, OperationKind, Precision};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Tolerance below which the balance equation holds (one cent)
const BALANCE_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Tolerance below which a footing is accurate (one unit)
const FOOTING_TOLERANCE: Decimal = Decimal::ONE;

/// Common view over engine results
pub trait Calculation {
    fn precision(&self) -> Precision;
    fn error(&self) -> Option<&str>;

    /// High precision and no error
    fn is_valid(&self) -> bool {
        self.precision() == Precision::High && self.error().is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SumResult {
    pub result: Decimal,
    pub components: Vec<Decimal>,
    pub component_count: usize,
    pub precision: Precision,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubtractResult {
    pub result: Decimal,
    pub minuend: Decimal,
    pub subtrahend: Decimal,
    pub precision: Precision,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PercentageResult {
    pub percentage: Decimal,
    pub part: Decimal,
    pub total: Decimal,
    pub precision: Precision,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceCheckResult {
    pub assets: Decimal,
    pub liabilities: Decimal,
    pub equity: Decimal,
    pub liabilities_plus_equity: Decimal,
    pub difference: Decimal,
    pub is_balanced: bool,
    pub precision: Precision,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FootingResult {
    pub reported_total: Decimal,
    pub calculated_total: Decimal,
    pub difference: Decimal,
    pub is_accurate: bool,
    pub component_count: usize,
    pub precision: Precision,
    pub error: Option<String>,
}

macro_rules! impl_calculation {
    ($($ty:ty),*) => {
        $(
            impl Calculation for $ty {
                fn precision(&self) -> Precision {
                    self.precision
                }

                fn error(&self) -> Option<&str> {
                    self.error.as_deref()
                }
            }
        )*
    };
}

impl_calculation!(
    SumResult,
    SubtractResult,
    PercentageResult,
    BalanceCheckResult,
    FootingResult
);

/// Fixed-precision calculator with an append-only audit trail.
///
/// One instance per replica run; never shared.
#[derive(Debug, Default)]
pub struct ArithmeticEngine {
    log: Vec<LogEntry>,
}

impl ArithmeticEngine {
    pub fn new() -> Self {
        Self { log: Vec::new() }
    }

    pub fn sum(&mut self, values: &[Decimal], description: &str) -> SumResult {
        let inputs = json!({ "values": values });

        let result = match checked_sum(values) {
            Ok(total) => SumResult {
                result: total,
                components: values.to_vec(),
                component_count: values.len(),
                precision: Precision::High,
                error: None,
            },
            Err(e) => SumResult {
                result: Decimal::ZERO,
                components: Vec::new(),
                component_count: 0,
                precision: Precision::Error,
                error: Some(e.to_string()),
            },
        };

        self.record(
            OperationKind::Sum,
            inputs,
            &result,
            Some(result.result),
            description,
        );
        result
    }

    pub fn subtract(
        &mut self,
        minuend: Decimal,
        subtrahend: Decimal,
        description: &str,
    ) -> SubtractResult {
        let inputs = json!({ "minuend": minuend, "subtrahend": subtrahend });

        let (value, precision, error) = match minuend.checked_sub(subtrahend) {
            Some(v) => (v, Precision::High, None),
            None => (
                Decimal::ZERO,
                Precision::Error,
                Some(OperationError::Overflow("subtract").to_string()),
            ),
        };

        let result = SubtractResult {
            result: value,
            minuend,
            subtrahend,
            precision,
            error,
        };

        self.record(
            OperationKind::Subtract,
            inputs,
            &result,
            Some(result.result),
            description,
        );
        result
    }

    /// `part / total * 100`; a zero `total` yields an error-tagged result
    pub fn percentage(&mut self, part: Decimal, total: Decimal, description: &str) -> PercentageResult {
        let inputs = json!({ "part": part, "total": total });

        let computed = if total.is_zero() {
            Err(OperationError::DivisionByZero)
        } else {
            part.checked_div(total)
                .and_then(|ratio| ratio.checked_mul(Decimal::ONE_HUNDRED))
                .ok_or(OperationError::Overflow("percentage"))
        };

        let result = match computed {
            Ok(percentage) => PercentageResult {
                percentage,
                part,
                total,
                precision: Precision::High,
                error: None,
            },
            Err(e) => PercentageResult {
                percentage: Decimal::ZERO,
                part,
                total,
                precision: Precision::Error,
                error: Some(e.to_string()),
            },
        };

        self.record(
            OperationKind::Percentage,
            inputs,
            &result,
            Some(result.percentage),
            description,
        );
        result
    }

    /// Assets = Liabilities + Equity, within one cent
    pub fn balance_check(
        &mut self,
        assets: Decimal,
        liabilities: Decimal,
        equity: Decimal,
    ) -> BalanceCheckResult {
        let inputs = json!({
            "assets": assets,
            "liabilities": liabilities,
            "equity": equity,
        });

        let computed = liabilities
            .checked_add(equity)
            .and_then(|rhs| assets.checked_sub(rhs).map(|diff| (rhs, diff)));

        let result = match computed {
            Some((liabilities_plus_equity, difference)) => BalanceCheckResult {
                assets,
                liabilities,
                equity,
                liabilities_plus_equity,
                difference,
                is_balanced: difference.abs() < BALANCE_TOLERANCE,
                precision: Precision::High,
                error: None,
            },
            None => BalanceCheckResult {
                assets,
                liabilities,
                equity,
                liabilities_plus_equity: Decimal::ZERO,
                difference: Decimal::ZERO,
                is_balanced: false,
                precision: Precision::Error,
                error: Some(OperationError::Overflow("balance check").to_string()),
            },
        };

        self.record(
            OperationKind::BalanceCheck,
            inputs,
            &result,
            Some(result.difference),
            "Balance sheet equation verification",
        );
        result
    }

    /// Compare a reported total with the sum of its components, within one unit
    pub fn footing_validate(
        &mut self,
        reported_total: Decimal,
        components: &[Decimal],
        description: &str,
    ) -> FootingResult {
        let inputs = json!({
            "reported_total": reported_total,
            "components": components,
        });

        let computed = checked_sum(components).and_then(|total| {
            total
                .checked_sub(reported_total)
                .map(|diff| (total, diff))
                .ok_or(OperationError::Overflow("footing"))
        });

        let result = match computed {
            Ok((calculated_total, difference)) => FootingResult {
                reported_total,
                calculated_total,
                difference,
                is_accurate: difference.abs() < FOOTING_TOLERANCE,
                component_count: components.len(),
                precision: Precision::High,
                error: None,
            },
            Err(e) => FootingResult {
                reported_total,
                calculated_total: Decimal::ZERO,
                difference: Decimal::ZERO,
                is_accurate: false,
                component_count: components.len(),
                precision: Precision::Error,
                error: Some(e.to_string()),
            },
        };

        self.record(
            OperationKind::FootingValidate,
            inputs,
            &result,
            Some(result.difference),
            description,
        );
        result
    }

    /// Audit trail of this run so far
    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Hand the audit trail to the caller, leaving the engine empty
    pub fn take_log(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.log)
    }

    /// Empty the audit trail (start of every run)
    pub fn reset(&mut self) {
        self.log.clear();
    }

    fn record<C: Calculation>(
        &mut self,
        operation: OperationKind,
        inputs: serde_json::Value,
        outcome: &C,
        value: Option<Decimal>,
        description: &str,
    ) {
        let (result, error) = match outcome.error() {
            Some(e) => (None, Some(e.to_string())),
            None => (value, None),
        };

        debug!(
            operation = %operation,
            valid = outcome.is_valid(),
            description = %description,
            "Engine call recorded"
        );

        self.log.push(LogEntry {
            operation,
            inputs,
            result,
            error,
            description: description.to_string(),
        });
    }
}

fn checked_sum(values: &[Decimal]) -> Result<Decimal, OperationError> {
    values.iter().try_fold(Decimal::ZERO, |acc, v| {
        acc.checked_add(*v).ok_or(OperationError::Overflow("sum"))
    })
}

/// Narrow an engine value to the externally reported numeric type
pub fn narrow(value: Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}
