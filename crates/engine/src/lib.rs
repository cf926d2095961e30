//! Account database, merge engine, reconciliation driver, run report, and audit sinks.

pub mod database;
pub mod driver;
pub mod merge;
pub mod reporter;
pub mod sink;

pub use database::{AccountDatabase, LoadStats, RenderedFiles};
pub use driver::{Reconciler, ReconcileConfig, RunState};
pub use merge::MergeSummary;
pub use reporter::RunReport;
