//! CLI module for llm-mend
//!
//! This module provides:
//! - Command implementations (run, revert, doctor, config)
//! - Output handlers (console, JSON, quiet)
//! - Signal handling for graceful shutdown
//!
//! # Example
//!
//! ```ignore
//! use crate::cli::{commands, output, signals};
//!
//! let handler = output::create_handler(output::OutputMode::Console, false);
//! let token = signals::CancellationToken::new();
//! let code = commands::run_loop(options, dir, &config, token, &*handler).await?;
//! ```

pub mod commands;
pub mod output;
pub mod signals;

pub use commands::{RunOptions, doctor, revert, run_loop, show_config};
pub use output::{OutputEvent, OutputMode, create_handler};
pub use signals::{CancellationToken, setup_signal_handlers};
