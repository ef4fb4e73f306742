//! Usage Validator
//!
//! Rules-based check that a replica really routed its numbers through the
//! arithmetic engine:
//! - the engine's log holds exactly one entry per plan operation
//! - every planned target path holds a leaf in the result tree
//! - no textual field of the result tree claims a manual computation

use crate::models::Plan;
use crate::result_tree::ResultTree;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Phrases that indicate a figure was computed outside the engine
pub const FORBIDDEN_PHRASES: &[&str] = &[
    "calculated manually",
    "computed by hand",
    "manual calculation",
    "i calculated",
    "my calculation",
];

/// Structured reason a replica failed usage validation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum UsageViolation {
    CountMismatch { expected: usize, actual: usize },
    ForbiddenPhrase { phrase: String, path: String },
    /// A planned operation left no leaf at its target path
    MissingResult { path: String },
    /// The replica never returned a result (its task panicked)
    ReplicaAborted { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageVerdict {
    pub valid: bool,
    pub violations: Vec<UsageViolation>,
}

impl UsageVerdict {
    pub fn aborted(message: &str) -> Self {
        Self {
            valid: false,
            violations: vec![UsageViolation::ReplicaAborted {
                message: message.to_string(),
            }],
        }
    }

    pub fn has_count_mismatch(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, UsageViolation::CountMismatch { .. }))
    }

    pub fn has_forbidden_phrase(&self) -> bool {
        self.violations
            .iter()
            .any(|v| matches!(v, UsageViolation::ForbiddenPhrase { .. }))
    }
}

/// What a rule gets to look at
pub struct UsageContext<'a> {
    pub tree: &'a ResultTree,
    pub log_count: usize,
    pub plan: &'a Plan,
}

/// Trait for usage rules
pub trait UsageRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn check(&self, context: &UsageContext<'_>) -> Vec<UsageViolation>;
}

/// Validator that applies every rule and collects violations
pub struct UsageValidator {
    rules: Vec<Box<dyn UsageRule>>,
}

impl UsageValidator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Box<dyn UsageRule>) {
        self.rules.push(rule);
    }

    /// Validate one replica's output. Passes only when no rule objects.
    pub fn validate(&self, tree: &ResultTree, log_count: usize, plan: &Plan) -> UsageVerdict {
        let context = UsageContext {
            tree,
            log_count,
            plan,
        };

        let mut violations = Vec::new();
        for rule in &self.rules {
            let found = rule.check(&context);
            for violation in &found {
                warn!(rule = rule.name(), ?violation, "Usage rule failed");
            }
            violations.extend(found);
        }

        let valid = violations.is_empty();

        debug!(
            rule_count = self.rules.len(),
            log_count,
            expected_count = plan.len(),
            valid,
            "Usage validation completed"
        );

        UsageVerdict { valid, violations }
    }
}

impl Default for UsageValidator {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Rules =================
//

/// Rule: one engine call per planned operation
pub struct ToolCountRule;

impl UsageRule for ToolCountRule {
    fn name(&self) -> &'static str {
        "tool_count"
    }

    fn check(&self, context: &UsageContext<'_>) -> Vec<UsageViolation> {
        if context.log_count == context.plan.len() {
            Vec::new()
        } else {
            vec![UsageViolation::CountMismatch {
                expected: context.plan.len(),
                actual: context.log_count,
            }]
        }
    }
}

/// Rule: each planned operation's result is present in the tree
pub struct PlanCoverageRule;

impl UsageRule for PlanCoverageRule {
    fn name(&self) -> &'static str {
        "plan_coverage"
    }

    fn check(&self, context: &UsageContext<'_>) -> Vec<UsageViolation> {
        let mut violations: Vec<UsageViolation> = Vec::new();

        for op in context.plan.operations() {
            if context.tree.get(&op.target_path).is_some() {
                continue;
            }

            let violation = UsageViolation::MissingResult {
                path: op.target_path.clone(),
            };
            if !violations.contains(&violation) {
                violations.push(violation);
            }
        }

        violations
    }
}

/// Rule: no text in the tree claims a computation outside the engine
pub struct ForbiddenPhraseRule {
    phrases: Vec<String>,
}

impl ForbiddenPhraseRule {
    pub fn new(phrases: &[&str]) -> Self {
        Self {
            phrases: phrases.iter().map(|p| p.to_lowercase()).collect(),
        }
    }
}

impl Default for ForbiddenPhraseRule {
    fn default() -> Self {
        Self::new(FORBIDDEN_PHRASES)
    }
}

impl UsageRule for ForbiddenPhraseRule {
    fn name(&self) -> &'static str {
        "forbidden_phrase"
    }

    fn check(&self, context: &UsageContext<'_>) -> Vec<UsageViolation> {
        let mut violations = Vec::new();

        for (path, leaf) in context.tree.leaves() {
            for text in leaf.text_fields() {
                let lowered = text.to_lowercase();
                if let Some(phrase) = self.phrases.iter().find(|p| lowered.contains(p.as_str())) {
                    violations.push(UsageViolation::ForbiddenPhrase {
                        phrase: phrase.clone(),
                        path: path.clone(),
                    });
                    break;
                }
            }
        }

        violations
    }
}

/// Create a validator with the count, coverage and phrase rules
pub fn create_default_usage_validator() -> UsageValidator {
    let mut validator = UsageValidator::new();
    validator.add_rule(Box::new(ToolCountRule));
    validator.add_rule(Box::new(PlanCoverageRule));
    validator.add_rule(Box::new(ForbiddenPhraseRule::default()));
    validator
}

//
// ================= Tests =================
//
