//! Core data models for the audit consensus core

use crate::error::AuditError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of one replica within an attempt ("replica-1", "replica-2", ...)
pub type ReplicaId = String;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StatementType {
    BalanceSheet,
    IncomeStatement,
    CashFlow,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum OperationKind {
    Sum,
    Subtract,
    Percentage,
    BalanceCheck,
    FootingValidate,
}

/// Precision tag carried by every engine result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    High,
    Error,
}

//
// ================= Plan =================
//

/// Parameters bound to an operation at plan time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum OperationParams {
    Sum {
        values: Vec<Decimal>,
    },
    Subtract {
        minuend: Decimal,
        subtrahend: Decimal,
    },
    Percentage {
        part: Decimal,
        total: Decimal,
    },
    BalanceCheck {
        assets: Decimal,
        liabilities: Decimal,
        equity: Decimal,
    },
    FootingValidate {
        reported_total: Decimal,
        components: Vec<Decimal>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    pub params: OperationParams,
    /// Dot-separated path in the result tree
    pub target_path: String,
    pub description: String,
}

impl Operation {
    pub fn new(params: OperationParams, target_path: &str, description: &str) -> Self {
        Self {
            params,
            target_path: target_path.to_string(),
            description: description.to_string(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self.params {
            OperationParams::Sum { .. } => OperationKind::Sum,
            OperationParams::Subtract { .. } => OperationKind::Subtract,
            OperationParams::Percentage { .. } => OperationKind::Percentage,
            OperationParams::BalanceCheck { .. } => OperationKind::BalanceCheck,
            OperationParams::FootingValidate { .. } => OperationKind::FootingValidate,
        }
    }
}

/// Ordered, immutable list of required operations for one statement
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Plan {
    statement_type: StatementType,
    operations: Vec<Operation>,
}

impl Plan {
    pub fn new(statement_type: StatementType, operations: Vec<Operation>) -> Self {
        Self {
            statement_type,
            operations,
        }
    }

    pub fn statement_type(&self) -> StatementType {
        self.statement_type
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// SHA-256 over the canonical JSON form of the plan
    pub fn fingerprint(&self) -> String {
        crate::audit::compute_fingerprint(self)
    }
}

//
// ================= Audit Trail =================
//

/// One arithmetic call as recorded by the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    pub operation: OperationKind,
    pub inputs: serde_json::Value,
    pub result: Option<Decimal>,
    pub error: Option<String>,
    pub description: String,
}

//
// ================= Retry Log =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    /// A replica's log count differs from the plan length
    ToolUsageInconsistent,
    /// A replica attached text claiming an out-of-engine computation
    ForbiddenPhrase,
    /// Replicas diverged although they ran one identical plan
    UnexpectedDisagreement,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt index
    pub attempt: u32,
    pub reason: ReasonCode,
    pub plan_fingerprint: String,
    pub diagnostic: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl fmt::Display for StatementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementType::BalanceSheet => "balance-sheet",
            StatementType::IncomeStatement => "income-statement",
            StatementType::CashFlow => "cash-flow",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for StatementType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "balance-sheet" => Ok(StatementType::BalanceSheet),
            "income-statement" => Ok(StatementType::IncomeStatement),
            "cash-flow" => Ok(StatementType::CashFlow),
            other => Err(AuditError::InvalidStatementType(other.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Sum => "sum",
            OperationKind::Subtract => "subtract",
            OperationKind::Percentage => "percentage",
            OperationKind::BalanceCheck => "balance-check",
            OperationKind::FootingValidate => "footing-validate",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCode::ToolUsageInconsistent => "tool-usage-inconsistent",
            ReasonCode::ForbiddenPhrase => "forbidden-phrase",
            ReasonCode::UnexpectedDisagreement => "unexpected-disagreement",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_type_parsing() {
        assert_eq!(
            "balance-sheet".parse::<StatementType>().unwrap(),
            StatementType::BalanceSheet
        );
        assert_eq!(
            "Income_Statement".parse::<StatementType>().unwrap(),
            StatementType::IncomeStatement
        );
        assert_eq!(
            " cash-flow ".parse::<StatementType>().unwrap(),
            StatementType::CashFlow
        );
        assert!("equity-changes".parse::<StatementType>().is_err());
    }

    #[test]
    fn test_operation_kind_follows_params() {
        let op = Operation::new(
            OperationParams::Subtract {
                minuend: Decimal::from(10),
                subtrahend: Decimal::from(4),
            },
            "income.net_income",
            "Net income",
        );
        assert_eq!(op.kind(), OperationKind::Subtract);
        assert_eq!(op.kind().to_string(), "subtract");
    }
}
