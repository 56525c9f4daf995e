//! # cluster-tests
//!
//! End-to-end scenarios against real `pd-server`, `tikv-server` and
//! `tidb-server` executables.
//!
//! Every test needs the binaries and is ignored by default. Point
//! `TIERCHAOS_BIN_DIR` at the directory holding them (default: `bin/` at the
//! workspace root) and run:
//!
//! ```bash
//! TIERCHAOS_BIN_DIR=/opt/tidb/bin cargo test -p cluster-tests -- --ignored
//! ```
//!
//! Tests are serialized: each one starts its own cluster on fresh ports.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod env;
pub mod scenarios;
