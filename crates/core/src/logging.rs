//! Filter and sink selection for the `segmask` binary.
//!
//! The console and the rolling file get separate filters. When the user did
//! not pick a filter explicitly, both get the noise directives, and the file
//! additionally records the per-frame backend decisions at debug.

use std::fs;
use std::path::{Path, PathBuf};

use tracing_appender::rolling::{RollingFileAppender, Rotation};

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_NOISE_FILTER: &str = "tokio=warn,runtime=warn";
pub const FILE_DEBUG_TARGETS: [&str; 2] = [
    "segmask_core::segmentation::node",
    "segmask_core::segmentation::converter",
];

const LOG_DIR_NAME: &str = "logs";
const LOG_FILE_PREFIX: &str = "segmask";
const LOG_RETENTION_FILES: usize = 14;

/// What the user asked for on the command line and in the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogRequest {
    pub verbose: u8,
    pub cli_filter: Option<String>,
    pub rust_log: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilters {
    pub console: String,
    pub file: String,
}

impl LogRequest {
    pub fn from_env(verbose: u8, cli_filter: Option<&str>) -> Self {
        Self {
            verbose,
            cli_filter: cli_filter.map(str::to_string),
            rust_log: std::env::var("RUST_LOG").ok(),
        }
    }

    /// `--log-filter` beats `-v`/`-vv`, which beat `RUST_LOG`.
    fn user_filter(&self) -> &str {
        if let Some(filter) = self.cli_filter.as_deref() {
            filter
        } else if self.verbose >= 2 {
            "trace"
        } else if self.verbose == 1 {
            "debug"
        } else {
            self.rust_log.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
        }
    }

    fn is_explicit(&self) -> bool {
        self.cli_filter.is_some() || self.verbose > 0
    }

    pub fn filters(&self) -> LogFilters {
        let user = self.user_filter();
        if self.is_explicit() {
            return LogFilters {
                console: user.to_string(),
                file: user.to_string(),
            };
        }

        let mut file = vec![DEFAULT_NOISE_FILTER.to_string()];
        file.extend(
            FILE_DEBUG_TARGETS
                .iter()
                .filter(|target| !mentions_target(user, target))
                .map(|target| format!("{target}=debug")),
        );
        file.push(user.to_string());

        LogFilters {
            console: format!("{DEFAULT_NOISE_FILTER},{user}"),
            file: file.join(","),
        }
    }
}

fn mentions_target(filter: &str, target: &str) -> bool {
    filter
        .split(',')
        .filter_map(|directive| directive.split('=').next())
        .any(|name| name.trim() == target)
}

/// Destination for the file layer.
#[derive(Debug)]
pub enum LogSink {
    File(RollingFileAppender),
    ConsoleOnly {
        log_dir: Option<PathBuf>,
        reason: String,
    },
}

/// Daily-rotated `segmask.*.log` files under `<data_dir>/logs`.
pub fn open_log_sink(data_dir: Option<&Path>) -> LogSink {
    let Some(data_dir) = data_dir else {
        return LogSink::ConsoleOnly {
            log_dir: None,
            reason: "no data directory".to_string(),
        };
    };

    let log_dir = data_dir.join(LOG_DIR_NAME);
    if let Err(error) = fs::create_dir_all(&log_dir) {
        return LogSink::ConsoleOnly {
            reason: format!("failed to create log directory: {error}"),
            log_dir: Some(log_dir),
        };
    }

    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(LOG_RETENTION_FILES)
        .build(&log_dir)
        .map_or_else(
            |error| LogSink::ConsoleOnly {
                reason: format!("failed to open rolling log file: {error}"),
                log_dir: Some(log_dir),
            },
            LogSink::File,
        )
}
