use std::path::PathBuf;

use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{self, Rotation},
};
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

/// Standard log file name prefix. The rotation strategy appends a
/// timestamp.
const LOG_FILE_NAME_PREFIX: &str = "prenet.log";

pub struct LoggerConfig {
    pub log_level: Level,
    pub show_time: bool,
    pub show_path: bool,
    pub logs_dir: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            show_time: false,
            show_path: true,
            logs_dir: None,
        }
    }
}

fn default_filter(log_level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(match log_level {
            Level::ERROR => "cmd=error,pre_network=error,runtime=error",
            Level::WARN => "cmd=warn,pre_network=warn,runtime=warn",
            Level::INFO => "cmd=info,pre_network=info,runtime=info",
            Level::DEBUG => "cmd=debug,pre_network=debug,runtime=debug",
            Level::TRACE => "cmd=trace,pre_network=trace,runtime=trace",
        })
    })
}

/// Configure logging with a global handler: stdout always, plus a
/// daily-rotated file when `logs_dir` is set. Returns the appender
/// guards; drop them last.
pub fn init_logger(config: LoggerConfig) -> Vec<WorkerGuard> {
    let LoggerConfig { log_level, show_time, show_path, logs_dir } = config;

    let mut guards = Vec::new();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_file(show_path)
        .with_line_number(show_path);
    let stdout_layer = if show_time {
        stdout_layer.boxed()
    } else {
        stdout_layer.without_time().boxed()
    };
    let stdout_layer = stdout_layer.with_filter(default_filter(log_level));

    if let Some(dir) = logs_dir {
        let appender = rolling::RollingFileAppender::new(
            Rotation::DAILY,
            PathBuf::from(dir),
            LOG_FILE_NAME_PREFIX,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);

        // The file logger always records at debug level.
        let file_filter = EnvFilter::new("cmd=info,pre_network=debug,runtime=debug");

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .with_filter(file_filter),
            )
            .init();
    } else {
        tracing_subscriber::registry().with(stdout_layer).init();
    }

    guards
}
