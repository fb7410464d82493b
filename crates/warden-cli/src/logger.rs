use colored::{Color, Colorize};
use parking_lot::Mutex;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::{self, Stdout, Write};
use warden_core::OutputSink;

pub struct Logger<W: Write = Stdout> {
    output: W,
}

impl<W: Write> Logger<W> {
    pub fn new(output: W) -> Self {
        Self { output }
    }

    fn string_to_color(s: &str) -> Color {
        let colors = [
            Color::Green,
            Color::Blue,
            Color::Magenta,
            Color::Cyan,
            Color::BrightGreen,
            Color::BrightBlue,
            Color::BrightMagenta,
            Color::BrightCyan,
        ];

        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        let hash = hasher.finish();

        let idx = usize::try_from(hash).unwrap_or_default() % colors.len();
        colors[idx]
    }

    pub fn log(&mut self, name: &str, message: &str) {
        let prefix = format!("[{name}]").color(Self::string_to_color(name));
        for line in message.lines() {
            let _ = writeln!(self.output, "{prefix} {line}");
        }
    }

    pub fn system(&mut self, message: &str) {
        let prefix = "[warden]".color(Color::Red);
        for line in message.lines() {
            let _ = writeln!(self.output, "{prefix} {line}");
        }
    }
}

impl Logger {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

/// Process output sink that prints complete lines through a [`Logger`],
/// prefixed with the process name.
pub struct PrefixedSink<W: Write = Stdout> {
    name: String,
    state: Mutex<(Logger<W>, String)>,
}

impl<W: Write> PrefixedSink<W> {
    pub fn new(name: impl Into<String>, logger: Logger<W>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new((logger, String::new())),
        }
    }
}

impl<W: Write> std::fmt::Debug for PrefixedSink<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixedSink")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<W: Write> PrefixedSink<W> {
    /// Prints whatever is left of an unterminated last line.
    fn flush_pending(&self) {
        let mut state = self.state.lock();
        let (logger, pending) = &mut *state;
        if !pending.is_empty() {
            let rest = std::mem::take(pending);
            logger.log(&self.name, &rest);
        }
    }
}

impl<W: Write> Drop for PrefixedSink<W> {
    fn drop(&mut self) {
        self.flush_pending();
    }
}

impl<W: Write + Send> OutputSink for PrefixedSink<W> {
    fn write_chunk(&self, chunk: &[u8]) -> warden_core::Result<()> {
        let mut state = self.state.lock();
        let (logger, pending) = &mut *state;
        pending.push_str(&String::from_utf8_lossy(chunk));

        if let Some(end) = pending.rfind('\n') {
            let complete: String = pending.drain(..=end).collect();
            logger.log(&self.name, &complete);
        }
        Ok(())
    }

    fn close(&self) -> warden_core::Result<()> {
        self.flush_pending();
        Ok(())
    }
}
