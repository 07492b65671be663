// src/logging.rs

//! Logging surfaces.
//!
//! Two layers coexist:
//! - `tracing` events for the evaluator's own diagnostics, initialised
//!   with [`init_diagnostics`] (level from `CACHEDAG_LOG`, logs to
//!   stderr).
//! - the [`Logger`] contract that task bodies and captured task output
//!   flow through. Task output never touches the process-global standard
//!   streams; with parallel workers a global stdio swap would interleave
//!   unrelated groups.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Sink for human-readable build output and captured task streams.
///
/// Implementations must tolerate concurrent calls; logging failures are
/// swallowed, never surfaced to the build.
pub trait Logger: Send + Sync {
    fn info(&self, msg: &str);
    fn error(&self, msg: &str);
    /// Short-lived progress line (e.g. `[3/7] core.compile`).
    fn ticker(&self, msg: &str);
    fn debug(&self, msg: &str);

    fn colored(&self) -> bool {
        false
    }

    /// Flush and release any underlying resources.
    fn close(&self) {}

    /// Raw captured stdout bytes of a task body.
    fn write_out(&self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            self.info(line);
        }
    }

    /// Raw captured stderr bytes of a task body.
    fn write_err(&self, bytes: &[u8]) {
        for line in String::from_utf8_lossy(bytes).lines() {
            self.error(line);
        }
    }
}

/// Logger that drops everything.
pub struct SilentLogger;

impl Logger for SilentLogger {
    fn info(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn ticker(&self, _msg: &str) {}
    fn debug(&self, _msg: &str) {}
}

/// Fan out every call to two loggers.
pub struct MultiLogger {
    colored: bool,
    a: Arc<dyn Logger>,
    b: Arc<dyn Logger>,
}

impl MultiLogger {
    pub fn new(colored: bool, a: Arc<dyn Logger>, b: Arc<dyn Logger>) -> Self {
        MultiLogger { colored, a, b }
    }
}

impl Logger for MultiLogger {
    fn info(&self, msg: &str) {
        self.a.info(msg);
        self.b.info(msg);
    }

    fn error(&self, msg: &str) {
        self.a.error(msg);
        self.b.error(msg);
    }

    fn ticker(&self, msg: &str) {
        self.a.ticker(msg);
        self.b.ticker(msg);
    }

    fn debug(&self, msg: &str) {
        self.a.debug(msg);
        self.b.debug(msg);
    }

    fn colored(&self) -> bool {
        self.colored
    }

    fn close(&self) {
        self.a.close();
        self.b.close();
    }

    fn write_out(&self, bytes: &[u8]) {
        self.a.write_out(bytes);
        self.b.write_out(bytes);
    }

    fn write_err(&self, bytes: &[u8]) {
        self.a.write_err(bytes);
        self.b.write_err(bytes);
    }
}

/// Line-oriented logger writing to a file.
///
/// The file is opened lazily on first write so an untouched logger never
/// creates an empty file. Debug lines are dropped unless enabled.
pub struct FileLogger {
    colored: bool,
    path: PathBuf,
    debug_enabled: bool,
    append: bool,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl FileLogger {
    pub fn new(colored: bool, path: impl Into<PathBuf>, debug_enabled: bool, append: bool) -> Self {
        FileLogger {
            colored,
            path: path.into(),
            debug_enabled,
            append,
            writer: Mutex::new(None),
        }
    }

    fn with_writer(&self, f: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>) {
        let Ok(mut guard) = self.writer.lock() else {
            return;
        };
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            let opened = OpenOptions::new()
                .create(true)
                .write(true)
                .append(self.append)
                .truncate(!self.append)
                .open(&self.path);
            match opened {
                Ok(file) => *guard = Some(BufWriter::new(file)),
                Err(_) => return,
            }
        }
        if let Some(writer) = guard.as_mut() {
            let _ = f(writer);
        }
    }

    fn line(&self, msg: &str) {
        self.with_writer(|w| writeln!(w, "{msg}"));
    }
}

impl Logger for FileLogger {
    fn info(&self, msg: &str) {
        self.line(msg);
    }

    fn error(&self, msg: &str) {
        self.line(msg);
    }

    fn ticker(&self, msg: &str) {
        self.line(msg);
    }

    fn debug(&self, msg: &str) {
        if self.debug_enabled {
            self.line(msg);
        }
    }

    fn colored(&self) -> bool {
        self.colored
    }

    fn close(&self) {
        if let Ok(mut guard) = self.writer.lock() {
            if let Some(writer) = guard.as_mut() {
                let _ = writer.flush();
            }
            *guard = None;
        }
    }

    fn write_out(&self, bytes: &[u8]) {
        self.with_writer(|w| w.write_all(bytes));
    }

    fn write_err(&self, bytes: &[u8]) {
        self.with_writer(|w| w.write_all(bytes));
    }
}

/// Prepend a fixed prefix (`[k/N] label`) to every line.
pub struct PrefixLogger {
    inner: Arc<dyn Logger>,
    prefix: String,
}

impl PrefixLogger {
    pub fn new(inner: Arc<dyn Logger>, prefix: impl Into<String>) -> Self {
        PrefixLogger {
            inner,
            prefix: prefix.into(),
        }
    }
}

impl Logger for PrefixLogger {
    fn info(&self, msg: &str) {
        self.inner.info(&format!("{} {msg}", self.prefix));
    }

    fn error(&self, msg: &str) {
        self.inner.error(&format!("{} {msg}", self.prefix));
    }

    fn ticker(&self, msg: &str) {
        self.inner.ticker(&format!("{} {msg}", self.prefix));
    }

    fn debug(&self, msg: &str) {
        self.inner.debug(&format!("{} {msg}", self.prefix));
    }

    fn colored(&self) -> bool {
        self.inner.colored()
    }

    fn close(&self) {
        self.inner.close();
    }

    // Captured byte streams pass through unprefixed.
    fn write_out(&self, bytes: &[u8]) {
        self.inner.write_out(bytes);
    }

    fn write_err(&self, bytes: &[u8]) {
        self.inner.write_err(bytes);
    }
}

/// Wrap a logger and intercept ticker lines, e.g. for progress bars.
pub struct ProxyLogger {
    inner: Arc<dyn Logger>,
    on_ticker: Box<dyn Fn(&str) + Send + Sync>,
}

impl ProxyLogger {
    pub fn new(inner: Arc<dyn Logger>, on_ticker: impl Fn(&str) + Send + Sync + 'static) -> Self {
        ProxyLogger {
            inner,
            on_ticker: Box::new(on_ticker),
        }
    }
}

impl Logger for ProxyLogger {
    fn info(&self, msg: &str) {
        self.inner.info(msg);
    }

    fn error(&self, msg: &str) {
        self.inner.error(msg);
    }

    fn ticker(&self, msg: &str) {
        (self.on_ticker)(msg);
        self.inner.ticker(msg);
    }

    fn debug(&self, msg: &str) {
        self.inner.debug(msg);
    }

    fn colored(&self) -> bool {
        self.inner.colored()
    }

    fn close(&self) {
        self.inner.close();
    }
}

/// `io::Write` adapter over a logger's byte sinks, handed to task bodies
/// as their stdout/stderr replacement.
pub struct OutputWriter<'a> {
    logger: &'a dyn Logger,
    stderr: bool,
}

impl<'a> OutputWriter<'a> {
    pub fn stdout(logger: &'a dyn Logger) -> Self {
        OutputWriter {
            logger,
            stderr: false,
        }
    }

    pub fn stderr(logger: &'a dyn Logger) -> Self {
        OutputWriter {
            logger,
            stderr: true,
        }
    }
}

impl Write for OutputWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.stderr {
            self.logger.write_err(buf);
        } else {
            self.logger.write_out(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Initialise the `tracing` diagnostics subscriber.
///
/// Level comes from `CACHEDAG_LOG` (e.g. "info", "debug"), defaulting to
/// `info`. Logs go to stderr so stdout stays free for the embedding
/// tool. Safe to call more than once; later calls are no-ops.
pub fn init_diagnostics() {
    let level = std::env::var("CACHEDAG_LOG")
        .ok()
        .and_then(|s| parse_level_str(&s))
        .unwrap_or(tracing::Level::INFO);

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}
