//! Output handlers for CLI commands
//!
//! Supports console (pretty), JSON, and quiet output modes.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

/// Output mode for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Console,
    Json,
    Quiet,
}

impl OutputMode {
    /// Parse from string
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "quiet" => Self::Quiet,
            _ => Self::Console,
        }
    }
}

/// Events emitted while a repair loop runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum OutputEvent {
    LoopStart {
        target: String,
        command: String,
        max_attempts: u32,
    },
    AttemptStart {
        attempt: u32,
        max_attempts: u32,
    },
    TestPassed {
        attempt: u32,
        duration_ms: u64,
    },
    TestFailed {
        attempt: u32,
        exit_code: i32,
        duration_ms: u64,
        signal: String,
    },
    PatchApplied {
        attempt: u32,
        path: String,
        summary: String,
        diff: String,
        explanations: Vec<String>,
    },
    RepairDiscarded {
        attempt: u32,
        condition: String,
    },
    LoopComplete {
        status: String,
        attempts: u32,
        patches_applied: u32,
        condition: Option<String>,
        duration_ms: u64,
    },
    LoopError {
        error: String,
    },
    Info {
        message: String,
    },
    Debug {
        message: String,
    },
}

/// Output handler trait
pub trait OutputHandler: Send + Sync {
    /// Emit an event
    fn emit(&self, event: OutputEvent);

    /// Write final result
    fn result(&self, success: bool, output: Option<&str>);
}

/// Console output handler
pub struct ConsoleHandler {
    debug: bool,
}

impl ConsoleHandler {
    /// Create a new console handler
    pub fn new(debug: bool) -> Self {
        Self { debug }
    }

    fn format_duration(ms: u64) -> String {
        if ms < 1000 {
            format!("{}ms", ms)
        } else {
            format!("{:.1}s", ms as f64 / 1000.0)
        }
    }
}

impl OutputHandler for ConsoleHandler {
    fn emit(&self, event: OutputEvent) {
        match event {
            OutputEvent::LoopStart {
                target,
                command,
                max_attempts,
            } => {
                eprintln!(
                    "Repairing {} with `{}` (up to {} attempts)",
                    target, command, max_attempts
                );
            }
            OutputEvent::AttemptStart {
                attempt,
                max_attempts,
            } => {
                eprint!("[{}/{}] running tests... ", attempt, max_attempts);
                let _ = io::stderr().flush();
            }
            OutputEvent::TestPassed { duration_ms, .. } => {
                eprintln!("✓ passed ({})", Self::format_duration(duration_ms));
            }
            OutputEvent::TestFailed {
                exit_code,
                duration_ms,
                signal,
                ..
            } => {
                eprintln!(
                    "✗ exit {} ({})",
                    exit_code,
                    Self::format_duration(duration_ms)
                );
                if self.debug {
                    for line in signal.lines() {
                        eprintln!("    {}", line);
                    }
                }
            }
            OutputEvent::PatchApplied {
                path,
                summary,
                diff,
                explanations,
                ..
            } => {
                for explanation in &explanations {
                    eprintln!("  - {}", explanation);
                }
                eprintln!("  patched {} ({})", path, summary);
                eprint!("{}", diff);
            }
            OutputEvent::RepairDiscarded { condition, .. } => {
                eprintln!("  repair discarded: {}", condition);
            }
            OutputEvent::LoopComplete {
                status,
                attempts,
                patches_applied,
                condition,
                duration_ms,
            } => {
                eprintln!();
                if status == "passed" {
                    eprintln!(
                        "✓ Tests pass after {} attempt(s), {} patch(es) applied ({})",
                        attempts,
                        patches_applied,
                        Self::format_duration(duration_ms)
                    );
                } else {
                    eprintln!(
                        "✗ Loop {} after {} attempt(s), {} patch(es) applied ({})",
                        status,
                        attempts,
                        patches_applied,
                        Self::format_duration(duration_ms)
                    );
                }
                if let Some(condition) = condition {
                    eprintln!("  {}", condition);
                }
            }
            OutputEvent::LoopError { error } => {
                eprintln!("Error: {}", error);
            }
            OutputEvent::Info { message } => {
                eprintln!("{}", message);
            }
            OutputEvent::Debug { message } => {
                if self.debug {
                    eprintln!("[debug] {}", message);
                }
            }
        }
    }

    fn result(&self, _success: bool, output: Option<&str>) {
        if let Some(out) = output {
            println!("{}", out.trim_end());
        }
    }
}

/// JSON output handler
pub struct JsonHandler {
    pretty: bool,
}

impl JsonHandler {
    /// Create a new JSON handler
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn print_json<T: Serialize>(&self, value: &T) {
        let json = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };

        if let Ok(s) = json {
            println!("{}", s);
        }
    }
}

impl OutputHandler for JsonHandler {
    fn emit(&self, event: OutputEvent) {
        self.print_json(&event);
    }

    fn result(&self, success: bool, output: Option<&str>) {
        #[derive(Serialize)]
        struct FinalResult<'a> {
            success: bool,
            output: Option<&'a str>,
        }

        self.print_json(&FinalResult { success, output });
    }
}

/// Quiet handler that emits nothing
pub struct QuietHandler;

impl OutputHandler for QuietHandler {
    fn emit(&self, _event: OutputEvent) {}
    fn result(&self, success: bool, output: Option<&str>) {
        // Only the last test output, and only when it still fails
        if !success {
            if let Some(out) = output {
                println!("{}", out.trim_end());
            }
        }
    }
}

/// Create an output handler based on mode
pub fn create_handler(mode: OutputMode, debug: bool) -> Box<dyn OutputHandler> {
    match mode {
        OutputMode::Console => Box::new(ConsoleHandler::new(debug)),
        OutputMode::Json => Box::new(JsonHandler::new(false)),
        OutputMode::Quiet => Box::new(QuietHandler),
    }
}
