use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Layer;

const DEFAULT_LEVEL: &str = "info";

/// Where and how strata logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// A level name (`debug`, `warning`, ...) or an `EnvFilter` directive list such as
    /// `strata.cache=debug,strata.memoize=trace`.
    pub level: String,
    pub json: bool,
    pub stderr: bool,
    /// Log file, opened for appending. A file that cannot be opened disables only this sink.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            json: false,
            stderr: true,
            file: None,
        }
    }
}

impl LoggingConfig {
    /// Filter directives for `level`, with level synonyms folded to their canonical names.
    pub fn directives(&self) -> String {
        let level = self.level.trim();
        if level.is_empty() {
            return DEFAULT_LEVEL.to_string();
        }
        match level.to_ascii_lowercase().as_str() {
            "warning" => "warn".to_string(),
            lower @ ("off" | "error" | "warn" | "info" | "debug" | "trace") => lower.to_string(),
            _ => level.to_string(),
        }
    }

    /// The effective filter: [`Self::directives`] followed by `RUST_LOG`, so `RUST_LOG` wins
    /// where both name the same target.
    pub fn env_filter(&self) -> EnvFilter {
        let rust_log = std::env::var("RUST_LOG").ok();
        self.filter_with(rust_log.as_deref())
    }

    /// Tries the merged directives, then `extra` alone, then our own; `info` if none parse.
    fn filter_with(&self, extra: Option<&str>) -> EnvFilter {
        let own = self.directives();
        let candidates = match extra.map(str::trim).filter(|extra| !extra.is_empty()) {
            Some(extra) => vec![format!("{own},{extra}"), extra.to_string(), own],
            None => vec![own],
        };
        candidates
            .iter()
            .find_map(|directives| EnvFilter::try_new(directives).ok())
            .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::INFO.into()))
    }

    /// The combined sink, plus the error that disabled the file sink, if any.
    fn writer(&self) -> (BoxMakeWriter, Option<io::Error>) {
        let console = if self.stderr {
            BoxMakeWriter::new(io::stderr)
        } else {
            BoxMakeWriter::new(io::sink)
        };
        let Some(path) = &self.file else {
            return (console, None);
        };
        match open_append(path) {
            Ok(file) => (BoxMakeWriter::new(console.and(AppendFile(file))), None),
            Err(err) => (console, Some(err)),
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Shares one append-mode file between every event; `&File` writes need no lock.
struct AppendFile(File);

impl<'a> MakeWriter<'a> for AppendFile {
    type Writer = &'a File;

    fn make_writer(&'a self) -> Self::Writer {
        &self.0
    }
}

static INSTALLED: OnceLock<bool> = OnceLock::new();

/// Installs the global `tracing` subscriber described by `config`.
///
/// Only the first call in a process does anything; it returns whether a subscriber was
/// installed (another crate may have installed one already).
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let mut installed = false;
    INSTALLED.get_or_init(|| {
        installed = install(config);
        installed
    });
    installed
}

fn install(config: &LoggingConfig) -> bool {
    let (writer, file_error) = config.writer();
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false);
    let layer: Box<dyn Layer<_> + Send + Sync> = if config.json {
        fmt.json().boxed()
    } else {
        fmt.boxed()
    };
    let subscriber = tracing_subscriber::registry()
        .with(config.env_filter())
        .with(layer);
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return false;
    }

    if let (Some(err), Some(path)) = (file_error, &config.file) {
        tracing::warn!(
            target: "strata.config",
            path = %path.display(),
            error = %err,
            "failed to open log file; file logging disabled"
        );
    }
    tracing::debug!(
        target: "strata.config",
        directives = %config.directives(),
        json = config.json,
        "tracing initialized"
    );
    true
}
