use financial_audit_consensus::{
    AuditConfig, DeterministicReplica, StatementAuditor, StatementType,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const BALANCE_SHEET: &str = "\
Statement of financial position

Total assets                                28,793,225
Total liabilities                            5,591,163
Total equity                                23,202,062
";

const INCOME_STATEMENT: &str = "\
Statement of profit or loss

Revenue                                      9,400,000
Cost of sales                               (5,100,000)
Operating expenses                          (2,250,000)
Finance costs                                 (310,000)
Profit for the year                          1,740,000
";

const CASH_FLOW: &str = "\
Statement of cash flows

Profit before tax                            2,150,000
Depreciation and amortisation                  640,000
Increase in trade receivables                 (215,000)
Decrease in inventories                         95,000
Purchase of property, plant and equipment   (1,320,000)
Proceeds from borrowings                       500,000
";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AuditConfig::from_env()?;

    info!(
        max_attempts = config.max_attempts,
        replicas = config.replica_count,
        backoff_ms = config.backoff.as_millis() as u64,
        "Financial audit consensus starting"
    );

    let auditor = StatementAuditor::from_config(&config, Arc::new(DeterministicReplica))?;

    let mut statements = BTreeMap::new();
    statements.insert(StatementType::BalanceSheet, BALANCE_SHEET.to_string());
    statements.insert(StatementType::IncomeStatement, INCOME_STATEMENT.to_string());
    statements.insert(StatementType::CashFlow, CASH_FLOW.to_string());

    let report = auditor.audit_statements(&statements).await;

    println!("{}", report.to_json_pretty()?);

    if !report.is_verified() {
        eprintln!("Audit {} finished without consensus", report.audit_id);
    }

    Ok(())
}
