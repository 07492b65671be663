// crates/test-utils/src/logger.rs

//! In-memory logger capturing every line for assertions.

use std::sync::{Arc, Mutex};

use cachedag::logging::Logger;

#[derive(Clone, Default)]
pub struct MemoryLogger {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        MemoryLogger::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }

    fn push(&self, level: &str, msg: &str) {
        if let Ok(mut guard) = self.lines.lock() {
            guard.push(format!("{level} {msg}"));
        }
    }
}

impl Logger for MemoryLogger {
    fn info(&self, msg: &str) {
        self.push("info", msg);
    }

    fn error(&self, msg: &str) {
        self.push("error", msg);
    }

    fn ticker(&self, msg: &str) {
        self.push("ticker", msg);
    }

    fn debug(&self, msg: &str) {
        self.push("debug", msg);
    }
}
