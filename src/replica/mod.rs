//! Replica strategies and the Replica Runner
//!
//! A replica is one independent execution of a shared plan. The runner owns
//! a fresh arithmetic engine per run, hands it to the strategy, then checks
//! the strategy's output against the engine's own audit trail.

use crate::execution::PlanExecutor;
use crate::models::{LogEntry, Plan, ReplicaId};
use crate::result_tree::ResultTree;
use crate::tools::ArithmeticEngine;
use crate::verification::{UsageValidator, UsageVerdict};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Confidence declared by a replica whose usage checks pass
pub const VALID_CONFIDENCE: f64 = 95.0;

/// Confidence declared by a replica that failed usage checks
pub const INVALID_CONFIDENCE: f64 = 10.0;

/// One computation backend (deterministic, LLM-driven, ...).
///
/// Every number must come from calls on `engine`. A strategy may annotate
/// leaves afterwards but must not change their values.
#[async_trait]
pub trait ReplicaStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn compute(&self, plan: &Plan, engine: &mut ArithmeticEngine) -> ResultTree;

    /// Confidence this replica declares for its result
    fn confidence(&self, verdict: &UsageVerdict) -> f64 {
        if verdict.valid {
            VALID_CONFIDENCE
        } else {
            INVALID_CONFIDENCE
        }
    }
}

/// Runs the plan straight through the executor
pub struct DeterministicReplica;

#[async_trait]
impl ReplicaStrategy for DeterministicReplica {
    fn name(&self) -> &str {
        "deterministic"
    }

    async fn compute(&self, plan: &Plan, engine: &mut ArithmeticEngine) -> ResultTree {
        PlanExecutor::new().execute(plan, engine)
    }
}

/// Everything one replica produced in one attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaReport {
    pub replica_id: ReplicaId,
    pub strategy: String,
    pub tree: ResultTree,
    pub log_count: usize,
    pub audit_trail: Vec<LogEntry>,
    pub verdict: UsageVerdict,
    pub confidence: f64,
    pub elapsed_ms: u64,
}

impl ReplicaReport {
    pub fn is_valid(&self) -> bool {
        self.verdict.valid
    }

    pub fn metrics(&self) -> ReplicaMetrics {
        ReplicaMetrics {
            replica_id: self.replica_id.clone(),
            strategy: self.strategy.clone(),
            valid: self.verdict.valid,
            tool_usage_count: self.log_count,
            confidence: self.confidence,
            elapsed_ms: self.elapsed_ms,
        }
    }

    fn aborted(replica_id: &str, strategy: &str, message: &str) -> Self {
        Self {
            replica_id: replica_id.to_string(),
            strategy: strategy.to_string(),
            tree: ResultTree::new(),
            log_count: 0,
            audit_trail: Vec::new(),
            verdict: UsageVerdict::aborted(message),
            confidence: 0.0,
            elapsed_ms: 0,
        }
    }
}

/// Per-replica figures for reporting layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaMetrics {
    pub replica_id: ReplicaId,
    pub strategy: String,
    pub valid: bool,
    pub tool_usage_count: usize,
    pub confidence: f64,
    pub elapsed_ms: u64,
}

/// Couples one strategy to a fresh engine per run
#[derive(Clone)]
pub struct ReplicaRunner {
    id: ReplicaId,
    strategy: Arc<dyn ReplicaStrategy>,
    validator: Arc<UsageValidator>,
}

impl ReplicaRunner {
    pub fn new(
        id: impl Into<ReplicaId>,
        strategy: Arc<dyn ReplicaStrategy>,
        validator: Arc<UsageValidator>,
    ) -> Self {
        Self {
            id: id.into(),
            strategy,
            validator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Execute `plan` once and validate how it was computed
    pub async fn run(&self, plan: &Plan) -> ReplicaReport {
        let start = Instant::now();

        let mut engine = ArithmeticEngine::new();
        engine.reset();

        let tree = self.strategy.compute(plan, &mut engine).await;
        let audit_trail = engine.take_log();
        let verdict = self.validator.validate(&tree, audit_trail.len(), plan);
        let confidence = self.strategy.confidence(&verdict);
        let elapsed_ms = start.elapsed().as_millis() as u64;

        debug!(
            replica_id = %self.id,
            strategy = self.strategy.name(),
            log_count = audit_trail.len(),
            valid = verdict.valid,
            elapsed_ms,
            "Replica run finished"
        );

        ReplicaReport {
            replica_id: self.id.clone(),
            strategy: self.strategy.name().to_string(),
            tree,
            log_count: audit_trail.len(),
            audit_trail,
            verdict,
            confidence,
            elapsed_ms,
        }
    }
}

/// Run every replica against the shared plan in parallel.
///
/// Reports come back in runner order. A replica whose task panics yields an
/// aborted, invalid report instead of failing the whole attempt.
pub async fn run_replicas(runners: &[ReplicaRunner], plan: Arc<Plan>) -> Vec<ReplicaReport> {
    let handles: Vec<_> = runners
        .iter()
        .map(|runner| {
            let runner = runner.clone();
            let plan = Arc::clone(&plan);
            tokio::spawn(async move { runner.run(&plan).await })
        })
        .collect();

    let mut reports = Vec::with_capacity(runners.len());
    for (runner, handle) in runners.iter().zip(handles) {
        match handle.await {
            Ok(report) => reports.push(report),
            Err(e) => {
                warn!(replica_id = %runner.id, error = %e, "Replica task aborted");
                reports.push(ReplicaReport::aborted(
                    &runner.id,
                    runner.strategy.name(),
                    &e.to_string(),
                ));
            }
        }
    }

    reports
}

/// `count` runners named replica-1..replica-N sharing one strategy
pub fn uniform_runners(
    count: usize,
    strategy: Arc<dyn ReplicaStrategy>,
    validator: Arc<UsageValidator>,
) -> Vec<ReplicaRunner> {
    (1..=count)
        .map(|i| {
            ReplicaRunner::new(
                format!("replica-{}", i),
                Arc::clone(&strategy),
                Arc::clone(&validator),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::ValueBuckets;
    use crate::models::{Operation, OperationParams, StatementType};
    use crate::planner::build_plan;
    use crate::verification::{create_default_usage_validator, UsageViolation};
    use rust_decimal::Decimal;

    fn sample_plan() -> Plan {
        let values = [1_250_000, 830_500, 415_250, 3_900_000, 120_000, 6_515_750, 610_000]
            .iter()
            .map(|v| Decimal::from(*v))
            .collect();
        build_plan(StatementType::BalanceSheet, &ValueBuckets::from_values(values))
    }

    /// Runs the plan but drops the last operation
    struct SkippingReplica;

    #[async_trait]
    impl ReplicaStrategy for SkippingReplica {
        fn name(&self) -> &str {
            "skipping"
        }

        async fn compute(&self, plan: &Plan, engine: &mut ArithmeticEngine) -> ResultTree {
            let trimmed = Plan::new(
                plan.statement_type(),
                plan.operations()[..plan.len() - 1].to_vec(),
            );
            PlanExecutor::new().execute(&trimmed, engine)
        }
    }

    struct PanickingReplica;

    #[async_trait]
    impl ReplicaStrategy for PanickingReplica {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn compute(&self, _plan: &Plan, _engine: &mut ArithmeticEngine) -> ResultTree {
            panic!("backend crashed");
        }
    }

    #[tokio::test]
    async fn test_deterministic_replica_is_valid() {
        let plan = sample_plan();
        let runner = ReplicaRunner::new(
            "replica-1",
            Arc::new(DeterministicReplica),
            Arc::new(create_default_usage_validator()),
        );

        let report = runner.run(&plan).await;
        assert!(report.is_valid());
        assert_eq!(report.log_count, plan.len());
        assert_eq!(report.audit_trail.len(), plan.len());
        assert_eq!(report.confidence, VALID_CONFIDENCE);
        assert_eq!(report.metrics().tool_usage_count, plan.len());
    }

    #[tokio::test]
    async fn test_replicas_are_isolated_and_identical() {
        let plan = Arc::new(sample_plan());
        let runners = uniform_runners(
            3,
            Arc::new(DeterministicReplica),
            Arc::new(create_default_usage_validator()),
        );

        let reports = run_replicas(&runners, Arc::clone(&plan)).await;
        assert_eq!(reports.len(), 3);

        for report in &reports {
            // No entries leak between replicas
            assert_eq!(report.log_count, plan.len());
            assert_eq!(report.tree, reports[0].tree);
        }
        assert_eq!(reports[2].replica_id, "replica-3");
    }

    #[tokio::test]
    async fn test_skipping_replica_fails_count() {
        let plan = sample_plan();
        let runner = ReplicaRunner::new(
            "replica-1",
            Arc::new(SkippingReplica),
            Arc::new(create_default_usage_validator()),
        );

        let report = runner.run(&plan).await;
        assert!(!report.is_valid());
        assert_eq!(
            report.verdict.violations,
            vec![
                UsageViolation::CountMismatch {
                    expected: plan.len(),
                    actual: plan.len() - 1,
                },
                UsageViolation::MissingResult {
                    path: "balancing".to_string(),
                },
            ]
        );
        assert_eq!(report.confidence, INVALID_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_unplaceable_result_fails_usage() {
        // The second target runs through the first one's leaf
        let plan = Plan::new(
            StatementType::BalanceSheet,
            vec![
                Operation::new(
                    OperationParams::Sum {
                        values: vec![Decimal::from(2_000), Decimal::from(3_000)],
                    },
                    "assets",
                    "Calculate total assets",
                ),
                Operation::new(
                    OperationParams::Sum {
                        values: vec![Decimal::from(2_000)],
                    },
                    "assets.current_assets",
                    "Calculate total current assets",
                ),
            ],
        );
        let runner = ReplicaRunner::new(
            "replica-1",
            Arc::new(DeterministicReplica),
            Arc::new(create_default_usage_validator()),
        );

        let report = runner.run(&plan).await;

        // Both engine calls happened, only one result landed
        assert_eq!(report.log_count, 2);
        assert_eq!(report.tree.leaf_count(), 1);
        assert!(!report.is_valid());
        assert_eq!(
            report.verdict.violations,
            vec![UsageViolation::MissingResult {
                path: "assets.current_assets".to_string(),
            }]
        );
        assert_eq!(report.confidence, INVALID_CONFIDENCE);
    }

    #[tokio::test]
    async fn test_panicking_replica_becomes_aborted_report() {
        let plan = Arc::new(sample_plan());
        let validator = Arc::new(create_default_usage_validator());
        let runners = vec![
            ReplicaRunner::new("replica-1", Arc::new(DeterministicReplica), Arc::clone(&validator)),
            ReplicaRunner::new("replica-2", Arc::new(PanickingReplica), validator),
        ];

        let reports = run_replicas(&runners, plan).await;
        assert!(reports[0].is_valid());
        assert!(!reports[1].is_valid());
        assert!(matches!(
            reports[1].verdict.violations[0],
            UsageViolation::ReplicaAborted { .. }
        ));
    }
}
