//! Repair loop controller
//!
//! `Init -> Running -> {Passed | Exhausted}`, with `Reverted` as a separate
//! operator action. The target is backed up to `<target>.bak` once, at
//! `Init`, and every attempt is one test run followed, on failure, by one
//! repair request and one patch application.

mod backup;
mod controller;
mod state;

pub use backup::{BackupError, backup_path_for};
pub use controller::{RepairLoop, revert};

#[cfg(test)]
pub use state::LoopStatus;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default number of test runs per loop
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// What a failed repair step does to the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairErrorPolicy {
    /// End the loop as exhausted with the condition recorded
    #[default]
    Abort,
    /// Count the attempt as a no-op fix and test again
    Skip,
}

/// Knobs for [`RepairLoop`]
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub max_attempts: u32,
    pub on_repair_error: RepairErrorPolicy,
    /// Reference documents sent with every repair request
    pub documents: Vec<PathBuf>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            on_repair_error: RepairErrorPolicy::default(),
            documents: Vec::new(),
        }
    }
}
