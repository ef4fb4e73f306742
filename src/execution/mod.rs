//! Plan Executor
//!
//! Runs a plan's operations through the arithmetic engine in order and
//! writes each outcome at the operation's target path. A failed operation
//! becomes an error leaf; execution always continues with the next one.

use crate::models::{Operation, OperationParams, Plan};
use crate::result_tree::{Leaf, LeafStatus, ResultTree, ENGINE_SOURCE};
use crate::tools::{ArithmeticEngine, Calculation};
use rust_decimal::Decimal;
use tracing::{debug, warn};

/// Executes plans deterministically against a caller-owned engine
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanExecutor;

impl PlanExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Execute every operation of `plan`, one engine call each.
    ///
    /// The returned tree may contain error leaves; that is a normal outcome.
    pub fn execute(&self, plan: &Plan, engine: &mut ArithmeticEngine) -> ResultTree {
        let mut tree = ResultTree::new();

        debug!(
            statement_type = %plan.statement_type(),
            operations = plan.len(),
            "Starting plan execution"
        );

        for (index, op) in plan.operations().iter().enumerate() {
            let leaf = run_operation(op, engine);

            if leaf.is_error() {
                warn!(
                    step = index + 1,
                    operation = %op.kind(),
                    target = %op.target_path,
                    error = leaf.error.as_deref().unwrap_or_default(),
                    "Operation failed, recording error leaf"
                );
            }

            if let Err(e) = tree.insert(&op.target_path, leaf) {
                warn!(
                    step = index + 1,
                    target = %op.target_path,
                    error = %e,
                    "Could not place operation result, its path stays empty"
                );
            }
        }

        debug!(
            leaves = tree.leaf_count(),
            log_entries = engine.log_len(),
            "Plan execution completed"
        );

        tree
    }
}

fn run_operation(op: &Operation, engine: &mut ArithmeticEngine) -> Leaf {
    match &op.params {
        OperationParams::Sum { values } => {
            let r = engine.sum(values, &op.description);
            build_leaf(op, &r, r.result, r.result, Decimal::ZERO, None)
        }
        OperationParams::Subtract {
            minuend,
            subtrahend,
        } => {
            let r = engine.subtract(*minuend, *subtrahend, &op.description);
            build_leaf(op, &r, r.result, r.result, Decimal::ZERO, None)
        }
        OperationParams::Percentage { part, total } => {
            let r = engine.percentage(*part, *total, &op.description);
            build_leaf(op, &r, r.percentage, r.percentage, Decimal::ZERO, None)
        }
        OperationParams::BalanceCheck {
            assets,
            liabilities,
            equity,
        } => {
            let r = engine.balance_check(*assets, *liabilities, *equity);
            build_leaf(
                op,
                &r,
                r.assets,
                r.liabilities_plus_equity,
                r.difference,
                Some(r.is_balanced),
            )
        }
        OperationParams::FootingValidate {
            reported_total,
            components,
        } => {
            let r = engine.footing_validate(*reported_total, components, &op.description);
            build_leaf(
                op,
                &r,
                r.reported_total,
                r.calculated_total,
                r.difference,
                Some(r.is_accurate),
            )
        }
    }
}

fn build_leaf<C: Calculation>(
    op: &Operation,
    outcome: &C,
    recorded: Decimal,
    computed: Decimal,
    difference: Decimal,
    check: Option<bool>,
) -> Leaf {
    match outcome.error() {
        None => Leaf {
            recorded: Some(recorded),
            computed: Some(computed),
            difference: Some(difference),
            check,
            status: LeafStatus::Ok,
            source: ENGINE_SOURCE.to_string(),
            operation: op.kind(),
            description: op.description.clone(),
            error: None,
            annotation: None,
        },
        Some(e) => Leaf {
            recorded: None,
            computed: None,
            difference: None,
            check: None,
            status: LeafStatus::Error,
            source: ENGINE_SOURCE.to_string(),
            operation: op.kind(),
            description: op.description.clone(),
            error: Some(e.to_string()),
            annotation: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OperationKind, StatementType};
    use crate::planner::{build_plan, paths};
    use crate::extractor::ValueBuckets;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn test_execute_balance_sheet_plan() {
        let buckets =
            ValueBuckets::from_values(vec![dec(28_793_225), dec(5_591_163), dec(23_202_062)]);
        let plan = build_plan(StatementType::BalanceSheet, &buckets);

        let mut engine = ArithmeticEngine::new();
        let tree = PlanExecutor::new().execute(&plan, &mut engine);

        assert_eq!(engine.log_len(), plan.len());
        assert_eq!(tree.leaf_count(), plan.len());

        let balancing = tree.get(paths::BALANCING).unwrap();
        assert_eq!(balancing.check, Some(true));
        assert_eq!(balancing.difference, Some(Decimal::ZERO));
        assert_eq!(balancing.recorded, Some(dec(28_793_225)));
        assert_eq!(balancing.computed, Some(dec(28_793_225)));

        let footing = tree.get(paths::ASSET_FOOTING).unwrap();
        assert_eq!(footing.check, Some(true));

        let total = tree.get(paths::TOTAL_ASSETS).unwrap();
        assert_eq!(total.recorded, Some(dec(57_586_450)));
        assert_eq!(total.source, ENGINE_SOURCE);
    }

    #[test]
    fn test_failed_operation_does_not_abort() {
        let plan = Plan::new(
            StatementType::IncomeStatement,
            vec![
                Operation::new(
                    OperationParams::Percentage {
                        part: dec(100),
                        total: Decimal::ZERO,
                    },
                    paths::COST_TO_REVENUE,
                    "Calculate cost to revenue ratio",
                ),
                Operation::new(
                    OperationParams::Subtract {
                        minuend: dec(900_000),
                        subtrahend: dec(400_000),
                    },
                    paths::NET_INCOME,
                    "Calculate net income",
                ),
            ],
        );

        let mut engine = ArithmeticEngine::new();
        let tree = PlanExecutor::new().execute(&plan, &mut engine);

        // Both calls are logged, the failure included
        assert_eq!(engine.log_len(), 2);

        let ratio = tree.get(paths::COST_TO_REVENUE).unwrap();
        assert!(ratio.is_error());
        assert_eq!(ratio.operation, OperationKind::Percentage);
        assert!(ratio.recorded.is_none());

        let net = tree.get(paths::NET_INCOME).unwrap();
        assert_eq!(net.status, LeafStatus::Ok);
        assert_eq!(net.computed, Some(dec(500_000)));
    }

    #[test]
    fn test_empty_plan_yields_empty_tree() {
        let plan = build_plan(StatementType::CashFlow, &ValueBuckets::default());
        let mut engine = ArithmeticEngine::new();
        let tree = PlanExecutor::new().execute(&plan, &mut engine);

        assert!(tree.is_empty());
        assert_eq!(engine.log_len(), 0);
    }
}
