//! Plan Builder
//!
//! Turns (statement type, extracted buckets) into the ordered list of
//! operations every replica must run. Recipes read fixed slices of the
//! buckets and nothing else, so identical input always yields an identical
//! plan. Operations without enough input values are left out, which
//! shortens the plan.

use crate::extractor::{ValueBuckets, ValueExtractor};
use crate::models::{Operation, OperationParams, Plan, StatementType};
use rust_decimal::Decimal;
use tracing::debug;

/// Canonical target paths written by the recipes
pub mod paths {
    pub const CURRENT_ASSETS: &str = "assets.current_assets";
    pub const FIXED_ASSETS: &str = "assets.fixed_assets";
    pub const TOTAL_ASSETS: &str = "assets.total_assets";
    pub const ASSET_FOOTING: &str = "footing.assets";
    pub const BALANCING: &str = "balancing";

    pub const TOTAL_REVENUE: &str = "income.total_revenue";
    pub const TOTAL_EXPENSES: &str = "income.total_expenses";
    pub const NET_INCOME: &str = "income.net_income";
    pub const COST_TO_REVENUE: &str = "ratios.cost_to_revenue";

    pub const OPERATING_CASH_FLOW: &str = "cash_flow.operating";
    pub const NET_CASH_FLOW: &str = "cash_flow.net";
}

/// Most values taken from a third-bucket for a subtotal
const MAX_BUCKET_ITEMS: usize = 5;

/// Most values summed into total assets
const MAX_TOTAL_ITEMS: usize = 10;

/// Builds plans from raw statement text
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    extractor: ValueExtractor,
}

impl PlanBuilder {
    pub fn new(extractor: ValueExtractor) -> Self {
        Self { extractor }
    }

    /// Extract values from `text` and build the plan for `statement_type`
    pub fn build(&self, text: &str, statement_type: StatementType) -> Plan {
        let buckets = self.extractor.extract(text);
        let plan = build_plan(statement_type, &buckets);

        debug!(
            statement_type = %statement_type,
            extracted = buckets.all.len(),
            operations = plan.len(),
            "Plan built"
        );

        plan
    }
}

/// Pure recipe dispatch on already-extracted buckets
pub fn build_plan(statement_type: StatementType, buckets: &ValueBuckets) -> Plan {
    let operations = match statement_type {
        StatementType::BalanceSheet => balance_sheet_recipe(buckets),
        StatementType::IncomeStatement => income_statement_recipe(buckets),
        StatementType::CashFlow => cash_flow_recipe(buckets),
    };

    Plan::new(statement_type, operations)
}

fn balance_sheet_recipe(buckets: &ValueBuckets) -> Vec<Operation> {
    let all = &buckets.all;
    let mut ops = Vec::new();

    if !buckets.first_third.is_empty() {
        ops.push(Operation::new(
            OperationParams::Sum {
                values: head(&buckets.first_third, MAX_BUCKET_ITEMS),
            },
            paths::CURRENT_ASSETS,
            "Calculate total current assets",
        ));
    }

    if !buckets.middle_third.is_empty() {
        ops.push(Operation::new(
            OperationParams::Sum {
                values: head(&buckets.middle_third, MAX_BUCKET_ITEMS),
            },
            paths::FIXED_ASSETS,
            "Calculate total fixed assets",
        ));
    }

    if all.len() >= 2 {
        ops.push(Operation::new(
            OperationParams::Sum {
                values: head(all, MAX_TOTAL_ITEMS),
            },
            paths::TOTAL_ASSETS,
            "Calculate total assets",
        ));
    }

    if all.len() >= 3 {
        ops.push(Operation::new(
            OperationParams::FootingValidate {
                reported_total: all[0],
                components: window(all, 1, 6),
            },
            paths::ASSET_FOOTING,
            "Validate asset footing",
        ));

        // First, middle and last value stand in for assets, liabilities, equity
        ops.push(Operation::new(
            OperationParams::BalanceCheck {
                assets: all[0],
                liabilities: all[all.len() / 2],
                equity: all[all.len() - 1],
            },
            paths::BALANCING,
            "Verify balance sheet equation",
        ));
    }

    ops
}

fn income_statement_recipe(buckets: &ValueBuckets) -> Vec<Operation> {
    let all = &buckets.all;
    let mut ops = Vec::new();

    if all.len() >= 2 {
        ops.push(Operation::new(
            OperationParams::Sum {
                values: head(all, 3),
            },
            paths::TOTAL_REVENUE,
            "Calculate total revenue",
        ));
    }

    if all.len() >= 4 {
        ops.push(Operation::new(
            OperationParams::Sum {
                values: window(all, 2, 7),
            },
            paths::TOTAL_EXPENSES,
            "Calculate total expenses",
        ));
    }

    if all.len() >= 2 {
        ops.push(Operation::new(
            OperationParams::Subtract {
                minuend: all[0],
                subtrahend: all[1],
            },
            paths::NET_INCOME,
            "Calculate net income",
        ));

        ops.push(Operation::new(
            OperationParams::Percentage {
                part: all[1],
                total: all[0],
            },
            paths::COST_TO_REVENUE,
            "Calculate cost to revenue ratio",
        ));
    }

    ops
}

fn cash_flow_recipe(buckets: &ValueBuckets) -> Vec<Operation> {
    let all = &buckets.all;
    let mut ops = Vec::new();

    if all.len() >= 3 {
        ops.push(Operation::new(
            OperationParams::Sum {
                values: head(all, 4),
            },
            paths::OPERATING_CASH_FLOW,
            "Calculate operating cash flow",
        ));
    }

    if all.len() >= 6 {
        ops.push(Operation::new(
            OperationParams::Sum {
                values: head(all, 6),
            },
            paths::NET_CASH_FLOW,
            "Calculate net cash flow",
        ));
    }

    ops
}

fn head(values: &[Decimal], n: usize) -> Vec<Decimal> {
    values[..n.min(values.len())].to_vec()
}

fn window(values: &[Decimal], start: usize, end: usize) -> Vec<Decimal> {
    let end = end.min(values.len());
    if start >= end {
        return Vec::new();
    }
    values[start..end].to_vec()
}
