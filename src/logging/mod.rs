//! Leveled, rotating, retention-pruned log writer.
//!
//! Every entry is appended to `<log_dir>/<category>.log` as
//! `[timestamp] [LEVEL] [source] message` and optionally mirrored to the
//! console in colour. Before each write the active file size is checked;
//! once it reaches the threshold the file is archived (and gzipped), the
//! archive directory is pruned to the retention count and a fresh file is
//! opened, all under one lock.
//!
//! Entries logged before [`LogManager::attach`] are held in memory and
//! flushed in order once the log path is known.

pub mod archive;

use crate::config::LoggingConfig;
use crate::error::MonitorResult;
use chrono::{DateTime, Local};
use colored::{ColoredString, Colorize};
use indicatif::ProgressBar;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

const ARCHIVE_DIR: &str = "archive";

/// Severity / kind of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
    Debug,
    Audit,
}

impl LogLevel {
    pub fn label(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Debug => "DEBUG",
            LogLevel::Audit => "AUDIT",
        }
    }

    fn paint(&self, line: &str) -> ColoredString {
        match self {
            LogLevel::Info => line.normal(),
            LogLevel::Success => line.green(),
            LogLevel::Warning => line.yellow(),
            LogLevel::Error => line.red().bold(),
            LogLevel::Debug => line.dimmed(),
            LogLevel::Audit => line.magenta(),
        }
    }
}

/// How much of the log is mirrored to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleMode {
    /// Nothing reaches the console.
    Silent,
    /// Everything except debug lines.
    #[default]
    Normal,
    /// Everything.
    Verbose,
}

impl ConsoleMode {
    pub fn from_flags(verbose: bool, silent: bool) -> Self {
        if silent {
            ConsoleMode::Silent
        } else if verbose {
            ConsoleMode::Verbose
        } else {
            ConsoleMode::Normal
        }
    }

    pub fn shows(&self, level: LogLevel) -> bool {
        match self {
            ConsoleMode::Silent => false,
            ConsoleMode::Normal => level != LogLevel::Debug,
            ConsoleMode::Verbose => true,
        }
    }
}

/// Where and how the log is written.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub directory: PathBuf,
    pub category: String,
    pub max_bytes: u64,
    pub retention: usize,
    pub compress: bool,
}

impl From<&LoggingConfig> for LogSettings {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            directory: config.directory.clone(),
            category: config.category.clone(),
            max_bytes: config.max_bytes,
            retention: config.retention,
            compress: config.compress,
        }
    }
}

impl LogSettings {
    pub fn active_path(&self) -> PathBuf {
        self.directory.join(format!("{}.log", self.category))
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.directory.join(ARCHIVE_DIR)
    }
}

/// Rotation state of the active file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    /// Below the threshold; writes append.
    Active,
    /// At or above the threshold; the next write rotates first.
    RotationNeeded,
    /// Archived; a fresh file must be opened.
    Rotated,
}

impl RotationState {
    pub fn for_size(size: u64, max_bytes: u64) -> Self {
        if size >= max_bytes {
            RotationState::RotationNeeded
        } else {
            RotationState::Active
        }
    }
}

#[derive(Debug, Clone)]
struct LogEntry {
    timestamp: DateTime<Local>,
    level: LogLevel,
    source: String,
    message: String,
}

impl LogEntry {
    fn line(&self) -> String {
        format!(
            "[{}] [{}] [{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.level.label(),
            self.source,
            self.message
        )
    }
}

struct ActiveLog {
    settings: LogSettings,
    file: Option<File>,
    next_sequence: u64,
    rotations: u64,
}

impl ActiveLog {
    fn open(settings: LogSettings) -> MonitorResult<Self> {
        fs::create_dir_all(&settings.directory)?;
        let file = open_append(&settings.active_path())?;
        let next_sequence = archive::next_sequence(&settings.archive_dir(), &settings.category);
        Ok(Self {
            settings,
            file: Some(file),
            next_sequence,
            rotations: 0,
        })
    }

    fn state(&self) -> RotationState {
        match self.file {
            None => RotationState::Rotated,
            Some(ref file) => {
                let size = file.metadata().map(|m| m.len()).unwrap_or(0);
                RotationState::for_size(size, self.settings.max_bytes)
            }
        }
    }

    /// Drive the rotation state machine back to `Active`.
    fn ensure_active(&mut self) {
        loop {
            match self.state() {
                RotationState::Active => return,
                RotationState::RotationNeeded => {
                    if !self.rotate() {
                        return;
                    }
                }
                RotationState::Rotated => {
                    match open_fresh(&self.settings.active_path()) {
                        Ok(file) => self.file = Some(file),
                        Err(e) => warn!("Cannot reopen log file: {}", e),
                    }
                    return;
                }
            }
        }
    }

    /// Archive the active file and prune. Returns false if the rename failed,
    /// in which case the oversized file stays active.
    fn rotate(&mut self) -> bool {
        // Close the handle before renaming.
        self.file = None;

        let active = self.settings.active_path();
        let archive_dir = self.settings.archive_dir();

        let (sequence, plain) = match archive::move_to_archive(
            &active,
            &archive_dir,
            &self.settings.category,
            self.next_sequence,
        ) {
            Ok(moved) => moved,
            Err(e) => {
                warn!("Log rotation of {} failed: {}", active.display(), e);
                match open_append(&active) {
                    Ok(file) => self.file = Some(file),
                    Err(e) => warn!("Cannot reopen log file: {}", e),
                }
                return false;
            }
        };

        // The slot is used from here on, whether or not compression works.
        self.next_sequence = sequence + 1;
        self.rotations += 1;

        if self.settings.compress {
            if let Err(e) = archive::compress_archive(&plain) {
                warn!(
                    "Cannot compress {}, keeping it uncompressed: {}",
                    plain.display(),
                    e
                );
            }
        }

        if let Err(e) = archive::prune(
            &archive_dir,
            &self.settings.category,
            self.settings.retention,
        ) {
            warn!("Failed to prune {}: {}", archive_dir.display(), e);
        }
        true
    }

    fn append(&mut self, line: &str) {
        self.ensure_active();
        if let Some(ref mut file) = self.file {
            if let Err(e) = writeln!(file, "{}", line) {
                warn!("Failed to write log line: {}", e);
            }
        }
    }
}

fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

fn open_fresh(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
}

struct Inner {
    console: ConsoleMode,
    sink: Option<ActiveLog>,
    pending: Vec<LogEntry>,
    /// Bar currently drawn on the terminal; console lines are printed around it.
    progress: Option<ProgressBar>,
}

/// Process-wide log writer. Share it as `Arc<LogManager>`.
pub struct LogManager {
    inner: Mutex<Inner>,
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LogManager {
    /// A manager with no file yet; entries are buffered until `attach`.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                console: ConsoleMode::Normal,
                sink: None,
                pending: Vec::new(),
                progress: None,
            }),
        }
    }

    /// Open a manager that writes straight to `settings`.
    pub fn open(settings: LogSettings, console: ConsoleMode) -> MonitorResult<Self> {
        let manager = Self::new();
        manager.attach(settings, console)?;
        Ok(manager)
    }

    /// Open the log file and flush buffered startup entries in order.
    pub fn attach(&self, settings: LogSettings, console: ConsoleMode) -> MonitorResult<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let mut sink = ActiveLog::open(settings)?;
        inner.console = console;

        let pending = std::mem::take(&mut inner.pending);
        for entry in &pending {
            let line = entry.line();
            sink.append(&line);
            mirror(console, entry.level, &line, inner.progress.as_ref());
        }
        inner.sink = Some(sink);
        Ok(())
    }

    pub fn log(&self, level: LogLevel, source: &str, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Local::now(),
            level,
            source: source.to_string(),
            message: message.into(),
        };

        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let console = inner.console;
        match inner.sink {
            Some(ref mut sink) => {
                let line = entry.line();
                sink.append(&line);
                mirror(console, level, &line, inner.progress.as_ref());
            }
            None => inner.pending.push(entry),
        }
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Info, source, message);
    }

    pub fn success(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Success, source, message);
    }

    pub fn warning(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Warning, source, message);
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Error, source, message);
    }

    pub fn debug(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Debug, source, message);
    }

    pub fn audit(&self, source: &str, message: impl Into<String>) {
        self.log(LogLevel::Audit, source, message);
    }

    /// Path of the active file, once attached.
    pub fn active_path(&self) -> Option<PathBuf> {
        self.inner
            .lock()
            .sink
            .as_ref()
            .map(|s| s.settings.active_path())
    }

    /// Number of rotations performed by this process.
    pub fn rotations(&self) -> u64 {
        self.inner.lock().sink.as_ref().map_or(0, |s| s.rotations)
    }

    /// Print console lines around `bar` while it is drawn; `None` detaches it.
    pub fn set_progress(&self, bar: Option<ProgressBar>) {
        self.inner.lock().progress = bar;
    }

    #[cfg(test)]
    pub(crate) fn has_progress(&self) -> bool {
        self.inner.lock().progress.is_some()
    }

    /// Number of entries waiting for `attach`.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending.len()
    }
}

fn mirror(console: ConsoleMode, level: LogLevel, line: &str, progress: Option<&ProgressBar>) {
    if !console.shows(level) {
        return;
    }
    let print = || match level {
        LogLevel::Error | LogLevel::Warning => eprintln!("{}", level.paint(line)),
        _ => println!("{}", level.paint(line)),
    };
    match progress {
        Some(bar) => bar.suspend(print),
        None => print(),
    }
}
