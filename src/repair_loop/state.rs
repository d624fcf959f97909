//! Repair loop state

use crate::patch::{ApplyError, PatchError};
use crate::repair::RepairError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Where the loop stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Init,
    Running,
    Passed,
    Exhausted,
    Reverted,
}

impl LoopStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Running => "running",
            Self::Passed => "passed",
            Self::Exhausted => "exhausted",
            Self::Reverted => "reverted",
        }
    }
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a loop stopped early or an attempt was discarded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail")]
pub enum LoopCondition {
    RunnerUnavailable(String),
    MalformedPatch(String),
    OutOfRangeEdit(String),
    UnparseableRepairResponse(String),
    Backend(String),
    Prompt(String),
    PatchDeclined,
    Cancelled,
    Io(String),
}

impl LoopCondition {
    /// Whether `on_repair_error = "skip"` may carry on past this condition
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            Self::MalformedPatch(_)
                | Self::OutOfRangeEdit(_)
                | Self::UnparseableRepairResponse(_)
                | Self::Backend(_)
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::RunnerUnavailable(_) => "RunnerUnavailable",
            Self::MalformedPatch(_) => "MalformedPatch",
            Self::OutOfRangeEdit(_) => "OutOfRangeEdit",
            Self::UnparseableRepairResponse(_) => "UnparseableRepairResponse",
            Self::Backend(_) => "Backend",
            Self::Prompt(_) => "Prompt",
            Self::PatchDeclined => "PatchDeclined",
            Self::Cancelled => "Cancelled",
            Self::Io(_) => "Io",
        }
    }
}

impl fmt::Display for LoopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunnerUnavailable(detail)
            | Self::MalformedPatch(detail)
            | Self::OutOfRangeEdit(detail)
            | Self::UnparseableRepairResponse(detail)
            | Self::Backend(detail)
            | Self::Prompt(detail)
            | Self::Io(detail) => write!(f, "{}: {}", self.name(), detail),
            Self::PatchDeclined => f.write_str("PatchDeclined: operator declined the patch"),
            Self::Cancelled => f.write_str("Cancelled: interrupted between iterations"),
        }
    }
}

impl From<&PatchError> for LoopCondition {
    fn from(e: &PatchError) -> Self {
        match e {
            PatchError::MalformedPatch { .. } => Self::MalformedPatch(e.to_string()),
            PatchError::OutOfRangeEdit { .. } => Self::OutOfRangeEdit(e.to_string()),
        }
    }
}

impl From<&RepairError> for LoopCondition {
    fn from(e: &RepairError) -> Self {
        match e {
            RepairError::Unparseable { .. } => Self::UnparseableRepairResponse(e.to_string()),
            RepairError::Malformed(patch) => patch.into(),
            RepairError::Backend(_) => Self::Backend(e.to_string()),
            RepairError::Context { .. } => Self::Io(e.to_string()),
            RepairError::Prompt(_) => Self::Prompt(e.to_string()),
        }
    }
}

impl From<&ApplyError> for LoopCondition {
    fn from(e: &ApplyError) -> Self {
        match e {
            ApplyError::Patch(patch) => patch.into(),
            ApplyError::ReadError { .. } | ApplyError::WriteError { .. } => {
                Self::Io(e.to_string())
            }
        }
    }
}

/// State of one repair loop over one target
#[derive(Debug, Clone, Serialize)]
pub struct LoopState {
    pub target_file: PathBuf,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub backup_path: Option<PathBuf>,
    pub status: LoopStatus,
    /// Why the loop ended without passing, if it did
    pub condition: Option<LoopCondition>,
    /// Output of the most recent test run
    pub last_output: Option<String>,
    pub patches_applied: u32,
    #[serde(skip)]
    started_at: Option<Instant>,
}

impl LoopState {
    pub fn new(target_file: impl Into<PathBuf>, max_attempts: u32) -> Self {
        Self {
            target_file: target_file.into(),
            attempt_count: 0,
            max_attempts,
            backup_path: None,
            status: LoopStatus::Init,
            condition: None,
            last_output: None,
            patches_applied: 0,
            started_at: Some(Instant::now()),
        }
    }

    /// Terminal states
    pub fn is_done(&self) -> bool {
        matches!(
            self.status,
            LoopStatus::Passed | LoopStatus::Exhausted | LoopStatus::Reverted
        )
    }

    /// Move to `Exhausted`, recording why
    pub fn exhaust(&mut self, condition: Option<LoopCondition>) {
        self.status = LoopStatus::Exhausted;
        self.condition = condition;
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    /// Process exit code for this state
    pub fn exit_code(&self) -> i32 {
        match self.status {
            LoopStatus::Passed | LoopStatus::Reverted => 0,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend_executor::BackendError;

    #[test]
    fn test_new_state() {
        let state = LoopState::new("calc.py", 3);
        assert_eq!(state.status, LoopStatus::Init);
        assert_eq!(state.attempt_count, 0);
        assert!(!state.is_done());
        assert_eq!(state.exit_code(), 1);
    }

    #[test]
    fn test_exhaust() {
        let mut state = LoopState::new("calc.py", 3);
        state.exhaust(Some(LoopCondition::Cancelled));
        assert!(state.is_done());
        assert_eq!(state.status, LoopStatus::Exhausted);
        assert_eq!(state.condition, Some(LoopCondition::Cancelled));
    }

    #[test]
    fn test_condition_mapping() {
        let malformed = RepairError::Malformed(PatchError::malformed("bad op"));
        assert!(matches!(
            LoopCondition::from(&malformed),
            LoopCondition::MalformedPatch(_)
        ));

        let range = ApplyError::Patch(PatchError::OutOfRangeEdit {
            path: "calc.py".into(),
            line: 9,
            len: 3,
        });
        assert!(matches!(
            LoopCondition::from(&range),
            LoopCondition::OutOfRangeEdit(_)
        ));

        let unparseable = RepairError::Unparseable {
            attempts: 5,
            last_response: None,
        };
        let condition = LoopCondition::from(&unparseable);
        assert_eq!(condition.name(), "UnparseableRepairResponse");
        assert!(condition.is_skippable());

        let backend = RepairError::Backend(BackendError::auth("nope"));
        assert!(LoopCondition::from(&backend).is_skippable());

        assert!(!LoopCondition::RunnerUnavailable("x".into()).is_skippable());
        assert!(!LoopCondition::Io("x".into()).is_skippable());
        assert!(!LoopCondition::PatchDeclined.is_skippable());
    }

    #[test]
    fn test_condition_serializes_tagged() {
        let json = serde_json::to_value(LoopCondition::Backend("timeout".into())).unwrap();
        assert_eq!(json["kind"], "Backend");
        assert_eq!(json["detail"], "timeout");

        let json = serde_json::to_value(LoopCondition::Cancelled).unwrap();
        assert_eq!(json["kind"], "Cancelled");
    }

    #[test]
    fn test_exit_codes() {
        let mut state = LoopState::new("calc.py", 1);
        state.status = LoopStatus::Passed;
        assert_eq!(state.exit_code(), 0);
        state.status = LoopStatus::Reverted;
        assert_eq!(state.exit_code(), 0);
        state.status = LoopStatus::Exhausted;
        assert_eq!(state.exit_code(), 1);
    }
}
