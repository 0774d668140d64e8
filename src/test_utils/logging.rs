//! Test logging configured from the environment.
//!
//! * `MSSQL_MIDDLEWARE_TEST_VERBOSE`: any value other than `0`/`false` turns logging on.
//! * `MSSQL_MIDDLEWARE_TEST_LOG_LEVEL`: an `EnvFilter` directive, `debug` by default.
//! * `MSSQL_MIDDLEWARE_TEST_LOG_FILE`: also append log lines to this file.
//! * `MSSQL_MIDDLEWARE_TEST_LOG_CONSOLE`: set to `0`/`false` to keep stdout quiet.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriter;

pub const VERBOSE_ENV: &str = "MSSQL_MIDDLEWARE_TEST_VERBOSE";
pub const LOG_LEVEL_ENV: &str = "MSSQL_MIDDLEWARE_TEST_LOG_LEVEL";
pub const LOG_FILE_ENV: &str = "MSSQL_MIDDLEWARE_TEST_LOG_FILE";
pub const LOG_CONSOLE_ENV: &str = "MSSQL_MIDDLEWARE_TEST_LOG_CONSOLE";

fn flag(name: &str) -> Option<bool> {
    std::env::var(name)
        .ok()
        .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "no"))
}

/// Test logging settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestLogConfig {
    pub verbose: bool,
    pub level: String,
    pub file: Option<PathBuf>,
    pub console: bool,
}

impl TestLogConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            verbose: flag(VERBOSE_ENV).unwrap_or(false),
            level: std::env::var(LOG_LEVEL_ENV).unwrap_or_else(|_| "debug".to_string()),
            file: std::env::var_os(LOG_FILE_ENV).map(PathBuf::from),
            console: flag(LOG_CONSOLE_ENV).unwrap_or(true),
        }
    }
}

/// Writes each log line to stdout and, optionally, a file.
#[derive(Clone)]
pub struct TeeWriter {
    console: bool,
    file: Option<Arc<Mutex<File>>>,
}

impl TeeWriter {
    /// # Errors
    /// Returns the I/O error if the log file cannot be opened.
    pub fn new(console: bool, path: Option<PathBuf>) -> io::Result<Self> {
        let file = match path {
            Some(path) => Some(Arc::new(Mutex::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            ))),
            None => None,
        };
        Ok(Self { console, file })
    }
}

pub struct TeeGuard {
    console: bool,
    file: Option<Arc<Mutex<File>>>,
}

impl<'a> MakeWriter<'a> for TeeWriter {
    type Writer = TeeGuard;

    fn make_writer(&'a self) -> Self::Writer {
        TeeGuard {
            console: self.console,
            file: self.file.clone(),
        }
    }
}

impl Write for TeeGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.console {
            io::stdout().write_all(buf)?;
        }
        if let Some(file) = &self.file {
            let mut handle = file
                .lock()
                .map_err(|_| io::Error::other("log file lock poisoned"))?;
            handle.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.console {
            io::stdout().flush()?;
        }
        if let Some(file) = &self.file {
            let mut handle = file
                .lock()
                .map_err(|_| io::Error::other("log file lock poisoned"))?;
            handle.flush()?;
        }
        Ok(())
    }
}

/// Install the test subscriber once per process. Does nothing unless verbose logging is on.
pub fn init_test_logging() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let config = TestLogConfig::from_env();
        if !config.verbose {
            return;
        }
        let writer = match TeeWriter::new(config.console, config.file.clone()) {
            Ok(writer) => writer,
            Err(err) => {
                eprintln!("failed to open test log file: {err}");
                return;
            }
        };
        let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_target(false)
            .try_init();
    });
}
