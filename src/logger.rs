//! Info log files written by the engine.

use std::{
    fmt,
    fs::File,
    io::{self, Write},
    thread,
};

use chrono::Local;
use parking_lot::Mutex;

/// Sink for the engine's informational messages.
pub trait Logger: Send + Sync {
    fn logv(&self, args: fmt::Arguments<'_>);
}

/// Appends timestamped lines to a file.
#[derive(Debug)]
pub struct FileLogger {
    file: Mutex<File>,
}

impl FileLogger {
    pub fn new(file: File) -> Self {
        Self {
            file: Mutex::new(file),
        }
    }

    fn write_line(&self, message: &str) -> io::Result<()> {
        let mut line = format!(
            "{} {:?} {}",
            Local::now().format("%Y/%m/%d-%H:%M:%S%.6f"),
            thread::current().id(),
            message
        );
        if !line.ends_with('\n') {
            line.push('\n');
        }
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()
    }
}

impl Logger for FileLogger {
    // Logging failures are not reported to the engine.
    fn logv(&self, args: fmt::Arguments<'_>) {
        let _ = self.write_line(&args.to_string());
    }
}
