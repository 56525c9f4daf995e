//! Scenario identities and reports.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One self-contained workload plus its invariant check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Concurrent inserts; every key present once with value = key.
    Insert,
    /// Inserts, barrier, then value = key + 1 for every key.
    Update,
    /// Inserts, barrier, then every key deleted.
    Delete,
    /// Transfers between adjacent accounts; balances must match the ledger.
    BankTransfer,
}

impl ScenarioKind {
    /// All scenarios in the order a suite runs them.
    pub const ALL: [ScenarioKind; 4] = [
        ScenarioKind::Insert,
        ScenarioKind::Update,
        ScenarioKind::Delete,
        ScenarioKind::BankTransfer,
    ];

    /// Kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ScenarioKind::Insert => "insert",
            ScenarioKind::Update => "update",
            ScenarioKind::Delete => "delete",
            ScenarioKind::BankTransfer => "bank-transfer",
        }
    }

    /// Table name prefix; a run id is appended.
    pub fn table_prefix(&self) -> &'static str {
        match self {
            ScenarioKind::Insert => "t_insert",
            ScenarioKind::Update => "t_update",
            ScenarioKind::Delete => "t_delete",
            ScenarioKind::BankTransfer => "t_bank",
        }
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScenarioKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScenarioKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| {
                format!(
                    "unknown scenario '{}' (expected one of: insert, update, delete, bank-transfer)",
                    s
                )
            })
    }
}

/// Outcome counts of a bank-transfer scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferSummary {
    /// Transfers known to have committed.
    pub committed: u64,
    /// Transfers whose commit failed ambiguously.
    pub in_doubt: u64,
    /// Transfers rolled back for lack of funds.
    pub insufficient: u64,
}

/// What happened during one scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// Scenario run.
    pub scenario: ScenarioKind,
    /// Table used.
    pub table: String,
    /// Concurrent tasks.
    pub tasks: usize,
    /// Workload operations completed (excluding setup and verification).
    pub operations: u64,
    /// Writes that turned out to be already applied.
    pub duplicates: u64,
    /// Router retries during the scenario.
    pub retries: u64,
    /// Transfer outcomes, for the bank-transfer scenario.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfers: Option<TransferSummary>,
    /// Wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
    /// Frontend restarts injected while the scenario ran.
    pub restarts: u32,
    /// Why the scenario failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl ScenarioReport {
    /// Empty report for a scenario about to run.
    pub fn new(scenario: ScenarioKind, table: impl Into<String>, tasks: usize) -> Self {
        Self {
            scenario,
            table: table.into(),
            tasks,
            operations: 0,
            duplicates: 0,
            retries: 0,
            transfers: None,
            elapsed_ms: 0,
            restarts: 0,
            failure: None,
        }
    }

    /// Whether the scenario passed.
    pub fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Reports of a whole suite run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SuiteReport {
    /// Identifier shared by every table of the run.
    pub run_id: String,
    /// Whether frontends were restarted during the run.
    pub chaos: bool,
    /// One report per scenario, in run order.
    pub scenarios: Vec<ScenarioReport>,
    /// Total wall-clock duration in milliseconds.
    pub elapsed_ms: u64,
    /// Teardown failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub teardown_error: Option<String>,
}

impl SuiteReport {
    /// Every scenario passed and teardown succeeded.
    pub fn passed(&self) -> bool {
        self.teardown_error.is_none() && self.scenarios.iter().all(ScenarioReport::passed)
    }

    /// Number of failed scenarios.
    pub fn failures(&self) -> usize {
        self.scenarios.iter().filter(|s| !s.passed()).count()
    }
}
