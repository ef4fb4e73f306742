//! Financial Audit Consensus
//!
//! Verification core for LLM-assisted financial statement audits:
//! - Extracts material amounts from raw statement text
//! - Builds one deterministic plan of required arithmetic per statement
//! - Runs several isolated replicas of the plan through an exact decimal engine
//! - Rejects replicas that bypassed the engine
//! - Cross-checks key figures and retries on disagreement
//!
//! AUDIT LOOP:
//! PLAN → EXECUTE (replicas) → USAGE CHECK → CONSENSUS CHECK → DONE | RETRY | FAILED

pub mod agent;
pub mod audit;
pub mod config;
pub mod consensus;
pub mod error;
pub mod execution;
pub mod extractor;
pub mod models;
pub mod planner;
pub mod replica;
pub mod result_tree;
pub mod tools;
pub mod verification;

pub use error::{AuditError, Result};

// Re-export common types
pub use agent::{AuditOutcome, AuditStatus, RetryController};
pub use audit::{AuditReport, ConsensusQuality, StatementAuditor};
pub use config::{AuditConfig, ToleranceProfile};
pub use models::*;
pub use replica::{DeterministicReplica, ReplicaStrategy};
pub use result_tree::ResultTree;
