//! # chaos-workload
//!
//! Correctness scenarios against a running cluster, invariant checks and
//! frontend fault injection.
//!
//! ## Scenarios
//!
//! | Scenario        | Workload (per task, own shard)           | Invariant                  |
//! |-----------------|------------------------------------------|----------------------------|
//! | `insert`        | insert k → k                             | every key once, value = k  |
//! | `update`        | insert, barrier, set k → k + 1           | value = k + 1 for every k  |
//! | `delete`        | insert, barrier, delete k                | table empty                |
//! | `bank-transfer` | move 1 from account j to j + 1           | balances match the ledger  |
//!
//! With chaos enabled, a [`ChaosInjector`] restarts a random frontend node on a
//! fixed period while the scenario runs. Workload tasks see nothing but
//! retries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chaos;
pub mod checker;
pub mod config;
pub mod driver;
pub mod harness;
pub mod ledger;
pub mod scenario;

pub use chaos::{ChaosError, ChaosHandle, ChaosInjector};
pub use checker::{CheckError, InvariantChecker, InvariantViolation};
pub use config::{ChaosConfig, ConfigError, HarnessConfig, WorkloadConfig};
pub use driver::{new_run_id, ScenarioError, WorkloadDriver};
pub use harness::{run, ChaosHarness, HarnessError};
pub use ledger::{Ledger, LedgerSnapshot, Transfer};
pub use scenario::{ScenarioKind, ScenarioReport, SuiteReport, TransferSummary};
