//! Multi-statement audit and hashing helpers
//!
//! Runs the retry controller over each statement of a filing and folds the
//! per-statement outcomes into one report.

use crate::agent::{AuditOutcome, RetryController};
use crate::config::AuditConfig;
use crate::models::{AttemptRecord, StatementType};
use crate::replica::ReplicaStrategy;
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Overall verdict across all audited statements
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusQuality {
    /// Every statement agreed on the first attempt
    Perfect,
    AchievedWithRetries,
    /// At least one statement exhausted its attempts
    Unverified,
}

/// A failed attempt, tagged with the statement it belongs to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryLogEntry {
    pub statement_type: StatementType,
    #[serde(flatten)]
    pub record: AttemptRecord,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditReport {
    pub audit_id: Uuid,
    pub audited_at: DateTime<Utc>,
    pub statements: BTreeMap<StatementType, AuditOutcome>,
    pub total_retries: usize,
    pub retry_log: Vec<RetryLogEntry>,
    pub consensus_quality: ConsensusQuality,
}

impl AuditReport {
    fn from_outcomes(statements: BTreeMap<StatementType, AuditOutcome>) -> Self {
        let retry_log: Vec<RetryLogEntry> = statements
            .values()
            .flat_map(|outcome| {
                outcome.attempts.iter().map(|record| RetryLogEntry {
                    statement_type: outcome.statement_type,
                    record: record.clone(),
                })
            })
            .collect();

        let consensus_quality = if statements.values().any(|o| !o.is_verified()) {
            ConsensusQuality::Unverified
        } else if retry_log.is_empty() {
            ConsensusQuality::Perfect
        } else {
            ConsensusQuality::AchievedWithRetries
        };

        Self {
            audit_id: Uuid::new_v4(),
            audited_at: Utc::now(),
            total_retries: retry_log.len(),
            statements,
            retry_log,
            consensus_quality,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.consensus_quality != ConsensusQuality::Unverified
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Audits every statement of a filing with one controller
pub struct StatementAuditor {
    controller: RetryController,
}

impl StatementAuditor {
    pub fn new(controller: RetryController) -> Self {
        Self { controller }
    }

    pub fn from_config(config: &AuditConfig, strategy: Arc<dyn ReplicaStrategy>) -> Result<Self> {
        Ok(Self::new(RetryController::new(config, strategy)?))
    }

    /// Statements run one after another, in statement-type order
    pub async fn audit_statements(
        &self,
        statements: &BTreeMap<StatementType, String>,
    ) -> AuditReport {
        let mut outcomes = BTreeMap::new();

        for (statement_type, text) in statements {
            let outcome = self.controller.run(text, *statement_type).await;
            outcomes.insert(*statement_type, outcome);
        }

        let report = AuditReport::from_outcomes(outcomes);

        if report.is_verified() {
            info!(
                audit_id = %report.audit_id,
                statements = report.statements.len(),
                total_retries = report.total_retries,
                quality = ?report.consensus_quality,
                "Audit completed"
            );
        } else {
            warn!(
                audit_id = %report.audit_id,
                statements = report.statements.len(),
                total_retries = report.total_retries,
                "Audit completed without consensus"
            );
        }

        report
    }

    /// Same as [`audit_statements`](Self::audit_statements) with textual type labels
    pub async fn audit_labeled(&self, statements: &[(&str, &str)]) -> Result<AuditReport> {
        let mut parsed = BTreeMap::new();
        for (label, text) in statements {
            parsed.insert(label.parse::<StatementType>()?, text.to_string());
        }
        Ok(self.audit_statements(&parsed).await)
    }
}

/// Compute SHA256 hash of any serializable value, hex encoded
/// Uses zero-copy streaming serialization into hasher
pub fn compute_fingerprint<T: Serialize + ?Sized>(value: &T) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), value).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::DeterministicReplica;

    const BALANCE_SHEET: &str = "\
        Total assets                 28,793,225\n\
        Total liabilities             5,591,163\n\
        Shareholders' equity         23,202,062\n";

    const INCOME_STATEMENT: &str = "\
        Revenue                       9,400,000\n\
        Cost of sales                 5,100,000\n\
        Operating expenses            2,250,000\n\
        Finance costs                   310,000\n";

    #[test]
    fn test_fingerprint_is_stable_hex() {
        let a = compute_fingerprint(&serde_json::json!({"k": [1, 2, 3]}));
        let b = compute_fingerprint(&serde_json::json!({"k": [1, 2, 3]}));
        let c = compute_fingerprint(&serde_json::json!({"k": [1, 2, 4]}));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn test_audit_statements_perfect() {
        let auditor =
            StatementAuditor::from_config(&AuditConfig::default(), Arc::new(DeterministicReplica))
                .unwrap();

        let mut statements = BTreeMap::new();
        statements.insert(StatementType::IncomeStatement, INCOME_STATEMENT.to_string());
        statements.insert(StatementType::BalanceSheet, BALANCE_SHEET.to_string());

        let report = auditor.audit_statements(&statements).await;

        assert_eq!(report.consensus_quality, ConsensusQuality::Perfect);
        assert_eq!(report.total_retries, 0);
        assert!(report.retry_log.is_empty());
        assert_eq!(report.statements.len(), 2);
        assert!(report.statements.values().all(AuditOutcome::is_verified));

        let json: serde_json::Value =
            serde_json::from_str(&report.to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["consensus_quality"], "perfect");
        assert!(json["statements"]["balance-sheet"].is_object());
        assert!(json["statements"]["income-statement"]["tree"]["income"].is_object());
    }

    #[tokio::test]
    async fn test_audit_labeled_rejects_unknown_type() {
        let auditor =
            StatementAuditor::from_config(&AuditConfig::default(), Arc::new(DeterministicReplica))
                .unwrap();

        let report = auditor
            .audit_labeled(&[("balance_sheet", BALANCE_SHEET)])
            .await
            .unwrap();
        assert!(report.statements.contains_key(&StatementType::BalanceSheet));

        let err = auditor.audit_labeled(&[("notes", "1,000,000")]).await;
        assert!(err.is_err());
    }
}
