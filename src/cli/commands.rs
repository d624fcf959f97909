//! CLI command implementations

use super::output::{OutputEvent, OutputHandler};
use super::signals::CancellationToken;
use crate::backend_executor::{BackendExecutor, create_executor};
use crate::config::MendConfig;
use crate::failure::{ImportScanner, MarkerSet, StandardExtractor};
use crate::patch::{PatchApplier, StdinConfirmer};
use crate::repair::{PromptBuilder, RepairClient, RepairSettings, RetryBudget};
use crate::repair_loop::{
    BackupError, LoopSettings, RepairLoop, backup_path_for, revert as revert_target,
};
use crate::runner::{ProcessRunner, TestCommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Options for a single `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub target: PathBuf,
    pub args: Vec<String>,
    /// Ask before writing each patch
    pub confirm: bool,
    /// Extra reference documents for this run only
    pub context: Vec<PathBuf>,
}

/// Run the repair loop over one target
pub async fn run_loop(
    options: RunOptions,
    working_dir: &Path,
    config: &MendConfig,
    cancel: CancellationToken,
    handler: &dyn OutputHandler,
) -> Result<i32, String> {
    config
        .validate()
        .map_err(|e| format!("Invalid configuration: {}", e))?;

    let target = resolve_target(&options.target, working_dir);
    if !target.is_file() {
        return Err(format!("Target file not found: {}", target.display()));
    }

    let command = build_test_command(config, &target, &options.args, working_dir);
    let backend = create_executor(&config.backend)
        .map_err(|e| format!("Failed to configure backend: {}", e))?;
    let settings = build_repair_settings(config, working_dir).map_err(|e| e.to_string())?;
    let client = RepairClient::new(Box::new(backend), settings);

    let extractor = StandardExtractor::new(
        MarkerSet::for_dialect(config.runner.dialect, &config.runner.markers),
        ImportScanner::new(config.search_paths(working_dir)),
    );

    let mut documents = config.documents(working_dir);
    documents.extend(options.context.iter().map(|p| resolve_target(p, working_dir)));

    let mut applier = PatchApplier::new();
    if options.confirm {
        applier = applier.with_confirmer(Box::new(StdinConfirmer));
    }

    tracing::debug!(
        target = %target.display(),
        command = %command.display(),
        backend = client.backend_name(),
        "starting repair loop"
    );

    let repair_loop = RepairLoop::new(
        &target,
        command,
        Box::new(ProcessRunner),
        Box::new(extractor),
        client,
    )
    .with_args(options.args)
    .with_applier(applier)
    .with_settings(LoopSettings {
        max_attempts: config.repair.max_attempts,
        on_repair_error: config.repair.on_repair_error,
        documents,
    })
    .with_cancellation(cancel);

    let state = repair_loop.run(handler).await;
    let passed = state.exit_code() == 0;
    handler.result(passed, state.last_output.as_deref());

    Ok(state.exit_code())
}

/// Restore a target from its backup
pub fn revert(target: &Path, working_dir: &Path, handler: &dyn OutputHandler) -> i32 {
    let target = resolve_target(target, working_dir);
    match revert_target(&target) {
        Ok(state) => {
            let backup = state
                .backup_path
                .unwrap_or_else(|| backup_path_for(&target));
            handler.emit(OutputEvent::Info {
                message: format!("✓ Restored {} from {}", target.display(), backup.display()),
            });
            0
        }
        Err(e @ BackupError::NotFound { .. }) => {
            handler.emit(OutputEvent::LoopError {
                error: e.to_string(),
            });
            1
        }
        Err(e) => {
            handler.emit(OutputEvent::LoopError {
                error: format!("Revert failed: {}", e),
            });
            1
        }
    }
}

/// Check backend reachability and the runner toolchain
pub async fn doctor(config: &MendConfig, handler: &dyn OutputHandler) -> i32 {
    let mut all_ok = true;

    handler.emit(OutputEvent::Info {
        message: "Checking configuration...".into(),
    });
    match config.validate() {
        Ok(()) => handler.emit(OutputEvent::Info {
            message: "✓ configuration is valid".into(),
        }),
        Err(e) => {
            all_ok = false;
            handler.emit(OutputEvent::Info {
                message: format!("✗ {}", e),
            });
        }
    }

    handler.emit(OutputEvent::Info {
        message: "\nChecking backend...".into(),
    });
    match create_executor(&config.backend) {
        Ok(executor) => {
            let mode = if config.backend.is_azure() { "azure" } else { "openai" };
            let key = if config.backend.resolve_api_key().is_some() {
                "key set"
            } else {
                "no key"
            };
            if executor.is_available().await {
                handler.emit(OutputEvent::Info {
                    message: format!("✓ {} ({}, {})", config.backend.url, mode, key),
                });
            } else {
                all_ok = false;
                handler.emit(OutputEvent::Info {
                    message: format!("✗ {} ({}, {} - unreachable)", config.backend.url, mode, key),
                });
            }
        }
        Err(e) => {
            all_ok = false;
            handler.emit(OutputEvent::Info {
                message: format!("✗ {}", e),
            });
        }
    }

    handler.emit(OutputEvent::Info {
        message: "\nChecking interpreters...".into(),
    });
    for program in [config.runner.python.as_str(), "node"] {
        let check = tokio::process::Command::new(program)
            .arg("--version")
            .output()
            .await;

        let status = match check {
            Ok(out) if out.status.success() => {
                let version = String::from_utf8_lossy(&out.stdout);
                let version = if version.trim().is_empty() {
                    String::from_utf8_lossy(&out.stderr).trim().to_string()
                } else {
                    version.trim().to_string()
                };
                format!("✓ {} ({})", program, version)
            }
            _ => {
                // Only the python interpreter is required
                if program == config.runner.python {
                    all_ok = false;
                }
                format!("✗ {} (not found)", program)
            }
        };
        handler.emit(OutputEvent::Info { message: status });
    }

    if let Some(ref test_command) = config.runner.test_command {
        handler.emit(OutputEvent::Info {
            message: format!("  test command: {}", test_command),
        });
    }

    if all_ok { 0 } else { 1 }
}

/// Print the merged configuration with secrets redacted
pub fn show_config(config: &MendConfig, handler: &dyn OutputHandler) -> Result<i32, String> {
    let mut shown = config.clone();
    shown.backend = config.backend.redacted();

    let rendered =
        toml::to_string_pretty(&shown).map_err(|e| format!("Failed to render config: {}", e))?;
    handler.result(true, Some(&rendered));
    Ok(0)
}

/// Command that tests `target`
pub fn build_test_command(
    config: &MendConfig,
    target: &Path,
    args: &[String],
    working_dir: &Path,
) -> TestCommand {
    let command = match config.runner.test_command {
        Some(ref line) => TestCommand::shell(line),
        None => TestCommand::for_script(target, args, &config.runner.python),
    };

    command
        .with_working_dir(working_dir)
        .with_timeout(config.runner.timeout.map(Duration::from_secs))
}

/// Repair client settings from config
pub fn build_repair_settings(
    config: &MendConfig,
    working_dir: &Path,
) -> anyhow::Result<RepairSettings> {
    let mut prompt = match config.repair.prompt_template {
        Some(ref template) => {
            let template = std::fs::read_to_string(crate::config::resolve_path(template, working_dir))
                .map_err(|e| anyhow::anyhow!("reading prompt template {}: {}", template, e))?;
            PromptBuilder::default().with_user_template(template)
        }
        None => PromptBuilder::default(),
    };
    if let Some(system_prompt) = config.system_prompt(working_dir)? {
        prompt = prompt.with_system_prompt(system_prompt);
    }

    Ok(RepairSettings {
        budget: RetryBudget::from_setting(config.repair.json_retries),
        temperature: Some(config.backend.temperature),
        prompt,
    })
}

fn resolve_target(target: &Path, working_dir: &Path) -> PathBuf {
    if target.is_absolute() {
        target.to_path_buf()
    } else {
        working_dir.join(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::output::tests::MockHandler;
    use crate::repair_loop::LoopStatus;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_build_test_command_for_script() {
        let config = MendConfig::default();
        let command = build_test_command(
            &config,
            Path::new("/proj/test_calc.py"),
            &["-v".to_string()],
            Path::new("/proj"),
        );
        assert_eq!(command.program, "python3");
        assert_eq!(command.args, vec!["/proj/test_calc.py", "-v"]);
        assert_eq!(command.working_dir, PathBuf::from("/proj"));
        assert_eq!(command.timeout, None);
    }

    #[test]
    fn test_build_test_command_override() {
        let mut config = MendConfig::default();
        config.runner.test_command = Some("behave features/".into());
        config.runner.timeout = Some(30);

        let command = build_test_command(&config, Path::new("steps.py"), &[], Path::new("/proj"));
        assert_eq!(command.display(), "sh -c behave features/");
        assert_eq!(command.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_build_repair_settings() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("system.txt"), "Be terse.").unwrap();
        fs::write(dir.path().join("user.j2"), "Fix {{ target }}").unwrap();

        let mut config = MendConfig::default();
        config.repair.json_retries = -1;
        config.repair.system_prompt_file = Some("system.txt".into());
        config.repair.prompt_template = Some("user.j2".into());

        let settings = build_repair_settings(&config, dir.path()).unwrap();
        assert_eq!(settings.budget, RetryBudget::Unbounded);
        assert_eq!(settings.temperature, Some(0.1));

        config.repair.prompt_template = Some("missing.j2".into());
        assert!(build_repair_settings(&config, dir.path()).is_err());
    }

    #[test]
    fn test_revert_without_backup() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("calc.py"), "x = 1\n").unwrap();
        let handler = MockHandler::new();

        assert_eq!(revert(Path::new("calc.py"), dir.path(), &handler), 1);
        assert!(matches!(
            handler.events().as_slice(),
            [OutputEvent::LoopError { .. }]
        ));
    }

    #[test]
    fn test_revert_restores_backup() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("calc.py");
        fs::write(&target, "broken\n").unwrap();
        fs::write(backup_path_for(&target), "original\n").unwrap();
        let handler = MockHandler::new();

        assert_eq!(revert(Path::new("calc.py"), dir.path(), &handler), 0);
        assert_eq!(fs::read_to_string(&target).unwrap(), "original\n");
    }

    #[tokio::test]
    async fn test_run_loop_missing_target() {
        let dir = TempDir::new().unwrap();
        let handler = MockHandler::new();
        let options = RunOptions {
            target: "nope.py".into(),
            ..Default::default()
        };

        let result = run_loop(
            options,
            dir.path(),
            &MendConfig::default(),
            CancellationToken::new(),
            &handler,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_loop_passes_without_backend_call() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("ok.sh");
        fs::write(&target, "exit 0\n").unwrap();

        let mut config = MendConfig::default();
        config.backend.url = "http://127.0.0.1:9".into();
        config.runner.test_command = Some("true".into());
        let handler = MockHandler::new();
        let options = RunOptions {
            target: "ok.sh".into(),
            ..Default::default()
        };

        let code = run_loop(options, dir.path(), &config, CancellationToken::new(), &handler)
            .await
            .unwrap();
        assert_eq!(code, 0);
        assert!(backup_path_for(&target).exists());
        assert_eq!(handler.results().len(), 1);
        assert!(handler.results()[0].0);
        assert!(handler.events().iter().any(|e| matches!(
            e,
            OutputEvent::LoopComplete { status, .. } if status == LoopStatus::Passed.as_str()
        )));
    }

    #[tokio::test]
    async fn test_run_loop_rejects_bad_azure_config() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("t.py"), "pass\n").unwrap();

        let mut config = MendConfig::default();
        config.backend.api_version = Some("2024-06-01".into());
        let handler = MockHandler::new();
        let options = RunOptions {
            target: "t.py".into(),
            ..Default::default()
        };

        let result = run_loop(options, dir.path(), &config, CancellationToken::new(), &handler).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_show_config_redacts_key() {
        let mut config = MendConfig::default();
        config.backend.api_key = Some("sk-secret".into());
        let handler = MockHandler::new();

        assert_eq!(show_config(&config, &handler), Ok(0));
        let (_, output) = &handler.results()[0];
        let output = output.as_deref().unwrap();
        assert!(output.contains("[backend]"));
        assert!(!output.contains("sk-secret"));
    }
}
