//! End-to-end scenarios, grouped by what they exercise.
//!
//! | Module      | Covers                                            |
//! |-------------|---------------------------------------------------|
//! | `lifecycle` | start order, kill/restart, teardown               |
//! | `workload`  | insert/update/delete/bank scenarios, classification |
//! | `chaos`     | the same scenarios while frontends restart         |

pub mod chaos;
pub mod lifecycle;
pub mod workload;
