//! Test, repair, apply, repeat

use super::backup::{create_backup, restore_backup};
use super::state::{LoopCondition, LoopState, LoopStatus};
use super::{LoopSettings, RepairErrorPolicy};
use crate::cli::output::{OutputEvent, OutputHandler};
use crate::cli::signals::CancellationToken;
use crate::failure::{FailureExtractor, FailureSignal};
use crate::patch::{ApplyOutcome, PatchApplier};
use crate::repair::{RepairClient, RepairContext};
use crate::runner::{RunnerError, TestCommand, TestRunner};
use std::path::{Path, PathBuf};

/// Drives one target file from failing to passing, or to exhaustion
pub struct RepairLoop {
    target: PathBuf,
    command: TestCommand,
    args: Vec<String>,
    runner: Box<dyn TestRunner>,
    extractor: Box<dyn FailureExtractor>,
    client: RepairClient,
    applier: PatchApplier,
    settings: LoopSettings,
    cancel: CancellationToken,
}

/// What to do after an iteration's repair step
enum Step {
    Continue,
    Stop(Option<LoopCondition>),
}

impl RepairLoop {
    pub fn new(
        target: impl Into<PathBuf>,
        command: TestCommand,
        runner: Box<dyn TestRunner>,
        extractor: Box<dyn FailureExtractor>,
        client: RepairClient,
    ) -> Self {
        Self {
            target: target.into(),
            command,
            args: Vec::new(),
            runner,
            extractor,
            client,
            applier: PatchApplier::new(),
            settings: LoopSettings::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Arguments the target is run with, shown to the model
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_applier(mut self, applier: PatchApplier) -> Self {
        self.applier = applier;
        self
    }

    pub fn with_settings(mut self, settings: LoopSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run until the tests pass or the attempt budget runs out
    pub async fn run(&self, handler: &dyn OutputHandler) -> LoopState {
        let mut state = LoopState::new(&self.target, self.settings.max_attempts);

        handler.emit(OutputEvent::LoopStart {
            target: self.target.display().to_string(),
            command: self.command.display(),
            max_attempts: self.settings.max_attempts,
        });

        match create_backup(&self.target) {
            Ok(path) => state.backup_path = Some(path),
            Err(e) => {
                state.exhaust(Some(LoopCondition::Io(e.to_string())));
                return self.finish(state, handler);
            }
        }
        state.status = LoopStatus::Running;

        while !state.is_done() {
            if self.cancel.is_cancelled() {
                state.exhaust(Some(LoopCondition::Cancelled));
                break;
            }
            if state.attempt_count >= state.max_attempts {
                state.exhaust(None);
                break;
            }

            state.attempt_count += 1;
            let attempt = state.attempt_count;
            handler.emit(OutputEvent::AttemptStart {
                attempt,
                max_attempts: state.max_attempts,
            });

            let outcome = match self.runner.run(&self.command).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(error = %e, "test run failed to produce a result");
                    let condition = match e {
                        RunnerError::Unavailable { .. } => {
                            LoopCondition::RunnerUnavailable(e.to_string())
                        }
                        RunnerError::Output { .. } => LoopCondition::Io(e.to_string()),
                    };
                    state.exhaust(Some(condition));
                    break;
                }
            };

            let output = outcome.combined_output();
            state.last_output = Some(output.clone());

            if outcome.passed() {
                tracing::info!(attempt, "tests passed");
                handler.emit(OutputEvent::TestPassed {
                    attempt,
                    duration_ms: outcome.duration.as_millis() as u64,
                });
                state.status = LoopStatus::Passed;
                break;
            }

            let signal = self.extractor.signal(&output);
            tracing::info!(attempt, exit_code = outcome.exit_code, "tests failed");
            handler.emit(OutputEvent::TestFailed {
                attempt,
                exit_code: outcome.exit_code,
                duration_ms: outcome.duration.as_millis() as u64,
                signal: signal.text.clone(),
            });

            let related = self.extractor.related_files(&self.target);
            match self.repair_once(signal, &related, attempt, handler).await {
                Ok(applied) => {
                    if applied {
                        state.patches_applied += 1;
                    }
                }
                Err(condition) => {
                    if let Step::Stop(condition) = self.on_error(condition, attempt, handler) {
                        state.exhaust(condition);
                    }
                }
            }
        }

        self.finish(state, handler)
    }

    /// Ask for a patch and apply it. `Ok(true)` when the file changed.
    async fn repair_once(
        &self,
        signal: FailureSignal,
        related: &[PathBuf],
        attempt: u32,
        handler: &dyn OutputHandler,
    ) -> Result<bool, LoopCondition> {
        let ctx = RepairContext::load(
            &self.target,
            signal,
            related,
            &self.settings.documents,
            &self.args,
        )
        .map_err(|e| LoopCondition::from(&e))?;

        let patch = self
            .client
            .repair(&ctx)
            .await
            .map_err(|e| LoopCondition::from(&e))?;

        if patch.is_empty() {
            handler.emit(OutputEvent::Info {
                message: format!("  attempt {}: model proposed no change", attempt),
            });
            return Ok(false);
        }

        match self.applier.apply(&patch).map_err(|e| LoopCondition::from(&e))? {
            ApplyOutcome::Applied(applied) => {
                handler.emit(OutputEvent::PatchApplied {
                    attempt,
                    path: applied.patch.path.display().to_string(),
                    summary: applied.diff.summary(),
                    diff: applied.diff.unified.clone(),
                    explanations: applied.patch.explanations.clone(),
                });
                Ok(true)
            }
            ApplyOutcome::NoChange => {
                handler.emit(OutputEvent::Info {
                    message: format!("  attempt {}: patch left the file unchanged", attempt),
                });
                Ok(false)
            }
            ApplyOutcome::Declined(diff) => {
                handler.emit(OutputEvent::Info {
                    message: format!(
                        "  attempt {}: patch declined ({}), target left as it was",
                        attempt,
                        diff.summary()
                    ),
                });
                Err(LoopCondition::PatchDeclined)
            }
        }
    }

    fn on_error(&self, condition: LoopCondition, attempt: u32, handler: &dyn OutputHandler) -> Step {
        if self.settings.on_repair_error == RepairErrorPolicy::Skip && condition.is_skippable() {
            tracing::warn!(attempt, %condition, "discarding repair and re-testing");
            handler.emit(OutputEvent::RepairDiscarded {
                attempt,
                condition: condition.to_string(),
            });
            return Step::Continue;
        }

        tracing::error!(attempt, %condition, "repair loop aborted");
        Step::Stop(Some(condition))
    }

    fn finish(&self, state: LoopState, handler: &dyn OutputHandler) -> LoopState {
        handler.emit(OutputEvent::LoopComplete {
            status: state.status.to_string(),
            attempts: state.attempt_count,
            patches_applied: state.patches_applied,
            condition: state.condition.as_ref().map(|c| c.to_string()),
            duration_ms: state.elapsed().as_millis() as u64,
        });
        state
    }
}

/// Restore `target` from its backup
pub fn revert(target: &Path) -> Result<LoopState, super::BackupError> {
    let backup = restore_backup(target)?;
    let mut state = LoopState::new(target, 0);
    state.backup_path = Some(backup);
    state.status = LoopStatus::Reverted;
    Ok(state)
}
