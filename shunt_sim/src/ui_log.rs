use std::collections::VecDeque;
use std::sync::Mutex;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

const MAX_LINES: usize = 64;

static LOGGER: UiLogger = UiLogger {
    lines: Mutex::new(VecDeque::new()),
};

/// Keeps the most recent log lines for the log panel, the terminal itself belongs to the UI
pub struct UiLogger {
    lines: Mutex<VecDeque<String>>,
}

pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Up to `count` most recent lines, oldest first
pub fn recent(count: usize) -> Vec<String> {
    match LOGGER.lines.lock() {
        Ok(lines) => lines
            .iter()
            .skip(lines.len().saturating_sub(count))
            .cloned()
            .collect(),
        Err(_) => Vec::new(),
    }
}

impl Log for UiLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == MAX_LINES {
                lines.pop_front();
            }
            lines.push_back(format!("{:<5} {}", record.level(), record.args()));
        }
    }

    fn flush(&self) {}
}
