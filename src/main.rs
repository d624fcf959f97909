mod backend_executor;
mod cli;
mod config;
mod failure;
mod logging;
mod patch;
mod repair;
mod repair_loop;
mod runner;

use clap::{Parser, Subcommand};
use cli::{CancellationToken, OutputMode, RunOptions};
use config::MendConfig;
use failure::Dialect;
use std::path::PathBuf;

/// Exit code for configuration and startup errors
const EXIT_CONFIG_ERROR: i32 = 2;

#[derive(Parser)]
#[command(name = "llm-mend")]
#[command(about = "Run a failing script, ask an LLM for a patch, apply it, repeat until it passes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Working directory (defaults to current)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Output format: console, json or quiet
    #[arg(long, global = true, default_value = "console")]
    output: String,

    /// Also write JSON logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Write JSON logs under the config directory
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Test and repair a target file until it passes
    Run {
        /// Script or test file to repair
        target: PathBuf,

        /// Arguments for the target; put them after `--` if they look like flags
        #[arg(allow_hyphen_values = true)]
        args: Vec<String>,

        /// Restore the target from its backup instead of running
        #[arg(long)]
        revert: bool,

        /// Show each diff and ask before writing it
        #[arg(long)]
        confirm: bool,

        /// Maximum test runs
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Backend calls per repair for unparseable replies (negative: unlimited)
        #[arg(long, allow_negative_numbers = true)]
        json_retries: Option<i64>,

        /// Shell command to run instead of the target
        #[arg(long)]
        test_command: Option<String>,

        /// Failure marker dialect
        #[arg(long, value_parser = parse_dialect)]
        dialect: Option<Dialect>,

        /// Reference documents to include with every repair request
        #[arg(long)]
        context: Vec<PathBuf>,
    },

    /// Restore a target from its backup
    Revert {
        /// File to restore
        target: PathBuf,
    },

    /// Check backend and interpreter availability
    Doctor,

    /// Show the merged configuration
    Config,
}

fn parse_dialect(s: &str) -> Result<Dialect, String> {
    Dialect::from_str(s)
        .ok_or_else(|| format!("unknown dialect '{}' (python, behave, rust, generic)", s))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let log_file = match (&cli.log_file, cli.log, &cli.command) {
        (Some(path), _, _) => Some(path.clone()),
        (None, true, Commands::Run { target, .. }) => {
            logging::default_log_path(&target.display().to_string()).ok()
        }
        _ => None,
    };
    let _log_guard = match logging::init_logging(cli.debug, cli.quiet, log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let working_dir = match cli.dir.clone().map(Ok).unwrap_or_else(std::env::current_dir) {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Error: cannot determine working directory: {}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let mut config = match MendConfig::load(Some(&working_dir)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return EXIT_CONFIG_ERROR;
        }
    };

    let mode = if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::from_str(&cli.output)
    };
    let handler = cli::create_handler(mode, cli.debug);

    match cli.command {
        Commands::Run {
            target,
            args,
            revert,
            confirm,
            max_attempts,
            json_retries,
            test_command,
            dialect,
            context,
        } => {
            if revert {
                return cli::revert(&target, &working_dir, &*handler);
            }

            if let Some(max_attempts) = max_attempts {
                config.repair.max_attempts = max_attempts;
            }
            if let Some(json_retries) = json_retries {
                config.repair.json_retries = json_retries;
            }
            if let Some(test_command) = test_command {
                config.runner.test_command = Some(test_command);
            }
            if let Some(dialect) = dialect {
                config.runner.dialect = dialect;
            }

            let token = CancellationToken::new();
            tokio::spawn(cli::setup_signal_handlers(token.clone()));

            let options = RunOptions {
                target,
                args,
                confirm,
                context,
            };
            match cli::run_loop(options, &working_dir, &config, token, &*handler).await {
                Ok(code) => code,
                Err(e) => {
                    handler.emit(cli::OutputEvent::LoopError { error: e });
                    EXIT_CONFIG_ERROR
                }
            }
        }

        Commands::Revert { target } => cli::revert(&target, &working_dir, &*handler),

        Commands::Doctor => cli::doctor(&config, &*handler).await,

        Commands::Config => match cli::show_config(&config, &*handler) {
            Ok(code) => code,
            Err(e) => {
                handler.emit(cli::OutputEvent::LoopError { error: e });
                EXIT_CONFIG_ERROR
            }
        },
    }
}
