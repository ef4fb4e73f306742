//! Retry Controller - drives the audit loop for one statement
//!
//! PLANNING → EXECUTING → USAGE CHECK → CONSENSUS CHECK → DONE | RETRY | FAILED
//!
//! Every attempt rebuilds the plan, runs all replicas against it, then checks
//! tool usage before consensus. Attempts are strictly sequential.

use crate::config::{AuditConfig, ToleranceProfile};
use crate::consensus::{ConsensusOutcome, ConsensusValidator};
use crate::error::AuditError;
use crate::extractor::ValueExtractor;
use crate::models::{AttemptRecord, Plan, ReasonCode, ReplicaId, StatementType};
use crate::planner::PlanBuilder;
use crate::replica::{
    run_replicas, uniform_runners, ReplicaMetrics, ReplicaReport, ReplicaRunner, ReplicaStrategy,
};
use crate::result_tree::ResultTree;
use crate::verification::{create_default_usage_validator, UsageViolation};
use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Final status of one statement audit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuditStatus {
    Verified,
    /// Attempts exhausted; the tree is a best-effort fallback
    Unverified,
}

/// What the controller hands back, success or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditOutcome {
    pub statement_type: StatementType,
    pub status: AuditStatus,
    pub tree: ResultTree,
    pub chosen_replica: Option<ReplicaId>,
    pub profile: ToleranceProfile,
    pub attempts: Vec<AttemptRecord>,
    pub attempts_made: u32,
    pub replica_metrics: Vec<ReplicaMetrics>,
    pub plan_len: usize,
    pub plan_fingerprint: String,
}

impl AuditOutcome {
    pub fn is_verified(&self) -> bool {
        self.status == AuditStatus::Verified
    }

    /// Number of failed attempts
    pub fn retries(&self) -> usize {
        self.attempts.len()
    }
}

enum AttemptState {
    Planning,
    Executing(Arc<Plan>),
    UsageCheck(Arc<Plan>, Vec<ReplicaReport>),
    ConsensusCheck(Arc<Plan>, Vec<ReplicaReport>),
    Done(Arc<Plan>, Vec<ReplicaReport>, ConsensusOutcome),
    Retry,
    Failed(Arc<Plan>, Vec<ReplicaReport>),
}

impl AttemptState {
    fn name(&self) -> &'static str {
        match self {
            AttemptState::Planning => "planning",
            AttemptState::Executing(_) => "executing",
            AttemptState::UsageCheck(..) => "usage-check",
            AttemptState::ConsensusCheck(..) => "consensus-check",
            AttemptState::Done(..) => "done",
            AttemptState::Retry => "retry",
            AttemptState::Failed(..) => "failed",
        }
    }
}

impl fmt::Display for AttemptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bounded re-attempts of plan → replicas → usage → consensus
pub struct RetryController {
    builder: PlanBuilder,
    runners: Vec<ReplicaRunner>,
    consensus: ConsensusValidator,
    max_attempts: u32,
    backoff: Duration,
}

impl RetryController {
    /// `config.replica_count` replicas all running `strategy`
    pub fn new(config: &AuditConfig, strategy: Arc<dyn ReplicaStrategy>) -> Result<Self> {
        let validator = Arc::new(create_default_usage_validator());
        let runners = uniform_runners(config.replica_count, strategy, validator);
        Self::with_runners(config, runners)
    }

    /// Explicit runner set; `config.replica_count` is ignored
    pub fn with_runners(config: &AuditConfig, runners: Vec<ReplicaRunner>) -> Result<Self> {
        config.validate()?;

        if runners.is_empty() {
            return Err(AuditError::ConfigError(
                "at least one replica runner is required".to_string(),
            ));
        }

        for (i, runner) in runners.iter().enumerate() {
            if runners[..i].iter().any(|other| other.id() == runner.id()) {
                return Err(AuditError::ConfigError(format!(
                    "duplicate replica id '{}'",
                    runner.id()
                )));
            }
        }

        Ok(Self {
            builder: PlanBuilder::new(ValueExtractor::new(config.materiality_floor)),
            runners,
            consensus: ConsensusValidator::new(config.tolerance),
            max_attempts: config.max_attempts,
            backoff: config.backoff,
        })
    }

    pub fn replica_count(&self) -> usize {
        self.runners.len()
    }

    /// Audit one statement. Never fails: exhaustion yields an unverified outcome.
    pub async fn run(&self, text: &str, statement_type: StatementType) -> AuditOutcome {
        let mut attempt: u32 = 0;
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut fingerprint = String::new();
        let mut state = AttemptState::Planning;

        info!(
            statement_type = %statement_type,
            replicas = self.runners.len(),
            max_attempts = self.max_attempts,
            "Retry controller: starting audit"
        );

        loop {
            debug!(attempt, state = %state, "Retry controller transition");

            state = match state {
                // === PLAN ===
                AttemptState::Planning => {
                    attempt += 1;
                    let plan = self.builder.build(text, statement_type);
                    let current = plan.fingerprint();

                    if !fingerprint.is_empty() && fingerprint != current {
                        warn!(
                            attempt,
                            previous = %fingerprint,
                            current = %current,
                            "Rebuilt plan differs from previous attempt"
                        );
                    }
                    fingerprint = current;

                    info!(
                        attempt,
                        operations = plan.len(),
                        fingerprint = %fingerprint,
                        "Plan built"
                    );

                    AttemptState::Executing(Arc::new(plan))
                }

                // === EXECUTE ===
                AttemptState::Executing(plan) => {
                    let reports = run_replicas(&self.runners, Arc::clone(&plan)).await;
                    AttemptState::UsageCheck(plan, reports)
                }

                // === VERIFY USAGE ===
                AttemptState::UsageCheck(plan, reports) => {
                    if reports.iter().all(|r| r.is_valid()) {
                        AttemptState::ConsensusCheck(plan, reports)
                    } else {
                        let reason = usage_reason(&reports);
                        warn!(
                            attempt,
                            reason = %reason,
                            invalid = reports.iter().filter(|r| !r.is_valid()).count(),
                            "Usage check failed"
                        );

                        attempts.push(AttemptRecord {
                            attempt,
                            reason,
                            plan_fingerprint: fingerprint.clone(),
                            diagnostic: usage_diagnostic(&plan, &reports),
                            recorded_at: Utc::now(),
                        });

                        self.after_failure(attempt, plan, reports)
                    }
                }

                // === VERIFY CONSENSUS ===
                AttemptState::ConsensusCheck(plan, reports) => {
                    let outcome = self.consensus.validate(&reports);

                    if outcome.agreed {
                        AttemptState::Done(plan, reports, outcome)
                    } else {
                        // Identical plan, deterministic engine: divergence is a defect
                        warn!(
                            attempt,
                            discrepancies = outcome.discrepancies.len(),
                            failing = ?outcome.failing_replicas,
                            "Replicas disagree despite an identical plan"
                        );

                        attempts.push(AttemptRecord {
                            attempt,
                            reason: ReasonCode::UnexpectedDisagreement,
                            plan_fingerprint: fingerprint.clone(),
                            diagnostic: json!({
                                "discrepancies": outcome.discrepancies,
                                "failing_replicas": outcome.failing_replicas,
                                "confidence": outcome.confidence,
                            }),
                            recorded_at: Utc::now(),
                        });

                        self.after_failure(attempt, plan, reports)
                    }
                }

                // === REPLAN ===
                AttemptState::Retry => {
                    if !self.backoff.is_zero() {
                        debug!(backoff_ms = self.backoff.as_millis() as u64, "Backing off");
                        tokio::time::sleep(self.backoff).await;
                    }
                    AttemptState::Planning
                }

                // === COMPLETE ===
                AttemptState::Done(plan, reports, outcome) => {
                    info!(
                        attempt,
                        retries = attempts.len(),
                        chosen = outcome.chosen_replica.as_deref().unwrap_or_default(),
                        "Audit verified"
                    );

                    return AuditOutcome {
                        statement_type,
                        status: AuditStatus::Verified,
                        tree: outcome.agreed_tree.unwrap_or_default(),
                        chosen_replica: outcome.chosen_replica,
                        profile: self.consensus.profile(),
                        attempts,
                        attempts_made: attempt,
                        replica_metrics: reports.iter().map(ReplicaReport::metrics).collect(),
                        plan_len: plan.len(),
                        plan_fingerprint: fingerprint,
                    };
                }

                AttemptState::Failed(plan, reports) => {
                    warn!(
                        attempts = attempt,
                        "Attempts exhausted, falling back to first replica"
                    );

                    let replica_metrics = reports.iter().map(ReplicaReport::metrics).collect();
                    let first = reports.into_iter().next();

                    return AuditOutcome {
                        statement_type,
                        status: AuditStatus::Unverified,
                        chosen_replica: first.as_ref().map(|r| r.replica_id.clone()),
                        tree: first.map(|r| r.tree).unwrap_or_default(),
                        profile: self.consensus.profile(),
                        attempts,
                        attempts_made: attempt,
                        replica_metrics,
                        plan_len: plan.len(),
                        plan_fingerprint: fingerprint,
                    };
                }
            };
        }
    }

    fn after_failure(
        &self,
        attempt: u32,
        plan: Arc<Plan>,
        reports: Vec<ReplicaReport>,
    ) -> AttemptState {
        if attempt < self.max_attempts {
            AttemptState::Retry
        } else {
            AttemptState::Failed(plan, reports)
        }
    }
}

/// Count problems outrank phrase problems
fn usage_reason(reports: &[ReplicaReport]) -> ReasonCode {
    let only_phrases = reports
        .iter()
        .flat_map(|r| r.verdict.violations.iter())
        .all(|v| matches!(v, UsageViolation::ForbiddenPhrase { .. }));

    if only_phrases {
        ReasonCode::ForbiddenPhrase
    } else {
        ReasonCode::ToolUsageInconsistent
    }
}

fn usage_diagnostic(plan: &Plan, reports: &[ReplicaReport]) -> Value {
    let replicas: Vec<Value> = reports
        .iter()
        .map(|r| {
            json!({
                "replica_id": r.replica_id,
                "log_count": r.log_count,
                "valid": r.is_valid(),
                "violations": r.verdict.violations,
            })
        })
        .collect();

    json!({
        "expected_operations": plan.len(),
        "replicas": replicas,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::PlanExecutor;
    use crate::planner::paths;
    use crate::replica::DeterministicReplica;
    use crate::tools::ArithmeticEngine;
    use async_trait::async_trait;

    const THREE_VALUE_SHEET: &str = "\
        Total assets                 28,793,225\n\
        Total liabilities             5,591,163\n\
        Shareholders' equity         23,202,062\n";

    /// Leaves the last operation out of the engine
    struct SkippingReplica;

    #[async_trait]
    impl ReplicaStrategy for SkippingReplica {
        fn name(&self) -> &str {
            "skipping"
        }

        async fn compute(&self, plan: &Plan, engine: &mut ArithmeticEngine) -> ResultTree {
            let keep = plan.len().saturating_sub(1);
            let trimmed = Plan::new(plan.statement_type(), plan.operations()[..keep].to_vec());
            PlanExecutor::new().execute(&trimmed, engine)
        }
    }

    /// Executes faithfully, then claims a manual computation in an annotation
    struct BoastingReplica;

    #[async_trait]
    impl ReplicaStrategy for BoastingReplica {
        fn name(&self) -> &str {
            "boasting"
        }

        async fn compute(&self, plan: &Plan, engine: &mut ArithmeticEngine) -> ResultTree {
            let mut tree = PlanExecutor::new().execute(plan, engine);
            let _ = tree.annotate(paths::BALANCING, "I calculated this myself");
            tree
        }
    }

    #[tokio::test]
    async fn test_deterministic_audit_is_verified() {
        let controller =
            RetryController::new(&AuditConfig::default(), Arc::new(DeterministicReplica)).unwrap();

        let outcome = controller
            .run(THREE_VALUE_SHEET, StatementType::BalanceSheet)
            .await;

        assert!(outcome.is_verified());
        assert_eq!(outcome.retries(), 0);
        assert_eq!(outcome.attempts_made, 1);
        assert_eq!(outcome.plan_len, 4);
        assert_eq!(outcome.replica_metrics.len(), 3);
        assert_eq!(outcome.chosen_replica.as_deref(), Some("replica-1"));
        assert_eq!(outcome.profile, ToleranceProfile::strict());

        let balancing = outcome.tree.get(paths::BALANCING).unwrap();
        assert_eq!(balancing.check, Some(true));
    }

    #[tokio::test]
    async fn test_count_mismatch_exhausts_attempts() {
        let controller =
            RetryController::new(&AuditConfig::default(), Arc::new(SkippingReplica)).unwrap();

        let outcome = controller
            .run(THREE_VALUE_SHEET, StatementType::BalanceSheet)
            .await;

        assert_eq!(outcome.status, AuditStatus::Unverified);
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(outcome.attempts_made, 3);
        for (i, record) in outcome.attempts.iter().enumerate() {
            assert_eq!(record.attempt, i as u32 + 1);
            assert_eq!(record.reason, ReasonCode::ToolUsageInconsistent);
            assert_eq!(record.plan_fingerprint, outcome.plan_fingerprint);
            assert_eq!(record.diagnostic["expected_operations"], 4);
            assert_eq!(record.diagnostic["replicas"][0]["log_count"], 3);
        }

        // Best effort: the first replica's partial tree
        assert_eq!(outcome.chosen_replica.as_deref(), Some("replica-1"));
        assert_eq!(outcome.tree.leaf_count(), 3);
        assert!(outcome.tree.get(paths::BALANCING).is_none());
    }

    #[tokio::test]
    async fn test_forbidden_phrase_reason() {
        let config = AuditConfig {
            max_attempts: 1,
            ..AuditConfig::default()
        };
        let controller = RetryController::new(&config, Arc::new(BoastingReplica)).unwrap();

        let outcome = controller
            .run(THREE_VALUE_SHEET, StatementType::BalanceSheet)
            .await;

        assert!(!outcome.is_verified());
        assert_eq!(outcome.attempts.len(), 1);
        assert_eq!(outcome.attempts[0].reason, ReasonCode::ForbiddenPhrase);
    }

    #[tokio::test]
    async fn test_empty_statement_agrees_trivially() {
        let controller =
            RetryController::new(&AuditConfig::default(), Arc::new(DeterministicReplica)).unwrap();

        let outcome = controller
            .run("No figures were disclosed.", StatementType::CashFlow)
            .await;

        assert!(outcome.is_verified());
        assert_eq!(outcome.plan_len, 0);
        assert!(outcome.tree.is_empty());
    }

    #[test]
    fn test_rejects_bad_runner_sets() {
        let validator = Arc::new(create_default_usage_validator());
        let config = AuditConfig::default();

        assert!(RetryController::with_runners(&config, Vec::new()).is_err());

        let duplicated = vec![
            ReplicaRunner::new("a", Arc::new(DeterministicReplica), Arc::clone(&validator)),
            ReplicaRunner::new("a", Arc::new(DeterministicReplica), validator),
        ];
        assert!(RetryController::with_runners(&config, duplicated).is_err());

        let zero = AuditConfig {
            max_attempts: 0,
            ..AuditConfig::default()
        };
        assert!(RetryController::new(&zero, Arc::new(DeterministicReplica)).is_err());
    }
}
