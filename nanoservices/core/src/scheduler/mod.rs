//! Per-table refresh exclusion, the refresh runner and interval jobs.

pub mod jobs;
pub mod runner;
pub mod state;

pub use jobs::{JobChange, JobManager};
pub use runner::{run_scheduler, RefreshSettings, Refresher};
pub use state::{RefreshState, RunGuard, TableSlots};
