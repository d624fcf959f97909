use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize logging based on output mode and debug flag.
///
/// The returned guard flushes the file log on drop; keep it alive for the
/// life of the process.
pub fn init_logging(
    debug: bool,
    quiet: bool,
    log_file: Option<PathBuf>,
) -> anyhow::Result<Option<WorkerGuard>> {
    let env_filter = if debug {
        EnvFilter::new("llm_mend=debug")
    } else if quiet {
        EnvFilter::new("llm_mend=error")
    } else {
        EnvFilter::new("llm_mend=info")
    };

    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_line_number(debug)
        .with_file(debug)
        .with_writer(std::io::stderr);

    if let Some(log_path) = log_file {
        let dir = log_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let file_name = log_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("log file path has no file name: {}", log_path.display()))?;
        let appender = tracing_appender::rolling::never(&dir, file_name);
        let (writer, guard) = tracing_appender::non_blocking(appender);

        // One JSON object per line, for post-mortem of long loops
        let file_layer = fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
            .with_target(true)
            .with_line_number(true)
            .with_file(true);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .with(file_layer)
            .init();

        Ok(Some(guard))
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();

        Ok(None)
    }
}

/// Get default log file path for a repair run of `target`
pub fn default_log_path(target: &str) -> anyhow::Result<PathBuf> {
    let log_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
        .join("llm-mend")
        .join("logs");

    let stem = std::path::Path::new(target)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("run");
    let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let filename = format!("{}-{}.log", stem, timestamp);

    Ok(log_dir.join(filename))
}
