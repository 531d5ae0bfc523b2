use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{
    Config, OPT_LOG_LEVEL_CONSOLE, OPT_LOG_LEVEL_FILE, OPT_LOG_LEVEL_STDERR, OPT_LOG_PATH,
    OPT_PROCESS, OPT_STANZA,
};

const LEVEL_OFF: &str = "off";

/// `<stanza>-<command>.log`, or `<stanza>-<command>-<role>-<process>.log` on a
/// worker so processes never share a file.
pub fn log_file_name(config: &Config) -> String {
    let stanza = config.get_str(OPT_STANZA).unwrap_or("all");
    let command = config.command_label();

    if config.command().is_worker() {
        let process = config.get_int(OPT_PROCESS).unwrap_or(0);
        format!("{stanza}-{command}-{}-{process:03}.log", config.command())
    } else {
        format!("{stanza}-{command}.log")
    }
}

fn level(config: &Config, option: &str) -> &'static str {
    match config.get_str(option) {
        Some("error") => "error",
        Some("warn") => "warn",
        Some("info") => "info",
        Some("debug") => "debug",
        Some("trace") => "trace",
        _ => LEVEL_OFF,
    }
}

/// Installs the global subscriber: console on stdout, stderr, and a log file.
///
/// Workers never log to stdout since it carries the protocol. The returned
/// guard flushes the file writer on drop and must be held until exit.
pub fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
    let console_level = if config.command().is_worker() {
        LEVEL_OFF
    } else {
        level(config, OPT_LOG_LEVEL_CONSOLE)
    };
    let console = (console_level != LEVEL_OFF).then(|| {
        fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_filter(EnvFilter::new(console_level))
    });

    let stderr_level = level(config, OPT_LOG_LEVEL_STDERR);
    let stderr = (stderr_level != LEVEL_OFF).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(EnvFilter::new(stderr_level))
    });

    let file_level = level(config, OPT_LOG_LEVEL_FILE);
    let mut guard = None;
    let file = if file_level != LEVEL_OFF {
        let dir = PathBuf::from(config.get_str(OPT_LOG_PATH).unwrap_or("."));
        fs::create_dir_all(&dir)
            .with_context(|| format!("unable to create log path {}", dir.display()))?;

        let appender = RollingFileAppender::new(Rotation::NEVER, &dir, log_file_name(config));
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);

        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(EnvFilter::new(file_level)),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(stderr)
        .with(file)
        .try_init()
        .context("unable to install tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        let config = Config::parse_from(["backhaul", "--stanza=db", "check"]).unwrap();
        assert_eq!(log_file_name(&config), "db-check.log");

        let config =
            Config::parse_from(["backhaul", "--command=check", "--process=2", "local"]).unwrap();
        assert_eq!(log_file_name(&config), "all-check-local-002.log");
    }

    #[test]
    fn writes_to_the_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::parse_from([
            "backhaul".to_owned(),
            "--stanza=db".to_owned(),
            "--log-level-console=off".to_owned(),
            "--log-level-stderr=off".to_owned(),
            "--log-level-file=debug".to_owned(),
            format!("--log-path={}", dir.path().join("log").display()),
            "check".to_owned(),
        ])
        .unwrap();

        let guard = init_tracing(&config).unwrap();
        tracing::info!("first line");
        drop(guard);

        let written = fs::read_to_string(dir.path().join("log").join("db-check.log")).unwrap();
        assert!(written.contains("first line"));
    }
}
