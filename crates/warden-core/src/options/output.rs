use std::{
    collections::VecDeque,
    fmt::Debug,
    fs::{File, OpenOptions},
    io::Write,
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCollector, Result};

/// Default number of lines kept by an in-memory sink.
pub const DEFAULT_IN_MEMORY_LINES: usize = 1000;

/// Destination for bytes produced by a process.
pub trait OutputSink: Send + Sync + Debug {
    fn write_chunk(&self, chunk: &[u8]) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub type Sink = Arc<dyn OutputSink>;

#[derive(Debug, Default)]
struct LineBuffer {
    lines: VecDeque<String>,
    partial: String,
}

/// Keeps the last `max_lines` lines written to it.
#[derive(Debug)]
pub struct InMemorySink {
    max_lines: usize,
    buffer: Mutex<LineBuffer>,
}

impl InMemorySink {
    #[must_use]
    pub fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            buffer: Mutex::new(LineBuffer::default()),
        }
    }

    /// Captured lines, oldest first. A trailing line without a newline is
    /// included.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        let buffer = self.buffer.lock();
        let mut lines: Vec<String> = buffer.lines.iter().cloned().collect();
        if !buffer.partial.is_empty() {
            lines.push(buffer.partial.clone());
        }
        lines
    }

    #[must_use]
    pub fn contents(&self) -> String {
        self.lines().join("\n")
    }
}

impl Default for InMemorySink {
    fn default() -> Self {
        Self::new(DEFAULT_IN_MEMORY_LINES)
    }
}

impl OutputSink for InMemorySink {
    fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        let mut buffer = self.buffer.lock();
        buffer.partial.push_str(&String::from_utf8_lossy(chunk));

        while let Some(pos) = buffer.partial.find('\n') {
            let line: String = buffer.partial.drain(..=pos).collect();
            buffer.lines.push_back(line.trim_end_matches(['\n', '\r']).to_owned());
            if buffer.lines.len() > self.max_lines {
                buffer.lines.pop_front();
            }
        }

        Ok(())
    }
}

/// Appends output to a file on disk.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileSink {
    pub fn open(path: impl Into<PathBuf>, append: bool) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&path)?;

        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
        })
    }

    #[must_use]
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl OutputSink for FileSink {
    fn write_chunk(&self, chunk: &[u8]) -> Result<()> {
        let mut guard = self.file.lock();
        let Some(file) = guard.as_mut() else {
            return Err(Error::State(format!(
                "file sink {} is closed",
                self.path.display()
            )));
        };
        file.write_all(chunk)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(mut file) = self.file.lock().take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Declarative logger attached to a process' output.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoggerConfig {
    InMemory {
        #[serde(default = "default_in_memory_lines")]
        max_lines: usize,
    },
    File {
        path: PathBuf,
        #[serde(default)]
        append: bool,
    },
}

fn default_in_memory_lines() -> usize {
    DEFAULT_IN_MEMORY_LINES
}

impl LoggerConfig {
    fn validate(&self) -> Result<()> {
        match self {
            Self::InMemory { max_lines } if *max_lines == 0 => Err(Error::Validation(
                "in-memory logger must keep at least one line".to_owned(),
            )),
            Self::File { path, .. } if path.as_os_str().is_empty() => Err(Error::Validation(
                "file logger requires a path".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    fn build(&self) -> Result<Sink> {
        Ok(match self {
            Self::InMemory { max_lines } => Arc::new(InMemorySink::new(*max_lines)),
            Self::File { path, append } => Arc::new(FileSink::open(path, *append)?),
        })
    }
}

/// Where a process' standard output and standard error go.
///
/// Explicit sinks are shared with the caller. Sinks built from `loggers` are
/// owned by the options and released by [`OutputOptions::close`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOptions {
    #[serde(skip)]
    pub output: Option<Sink>,
    #[serde(skip)]
    pub error: Option<Sink>,
    pub suppress_output: bool,
    pub suppress_error: bool,
    pub send_output_to_error: bool,
    pub send_error_to_output: bool,
    pub loggers: Vec<LoggerConfig>,

    #[serde(skip)]
    pub(crate) resolved: Vec<Sink>,
}

impl OutputOptions {
    pub fn validate(&self) -> Result<()> {
        if self.suppress_output && self.send_output_to_error {
            return Err(Error::Validation(
                "cannot both suppress and redirect standard output".to_owned(),
            ));
        }
        if self.suppress_error && self.send_error_to_output {
            return Err(Error::Validation(
                "cannot both suppress and redirect standard error".to_owned(),
            ));
        }
        if self.send_output_to_error && self.send_error_to_output {
            return Err(Error::Validation(
                "cannot redirect standard output and standard error into each other".to_owned(),
            ));
        }
        for logger in &self.loggers {
            logger.validate()?;
        }
        Ok(())
    }

    /// Builds sinks for the configured loggers. Calling it again is a no-op.
    pub fn resolve_loggers(&mut self) -> Result<()> {
        if !self.resolved.is_empty() || self.loggers.is_empty() {
            return Ok(());
        }

        let mut resolved = Vec::with_capacity(self.loggers.len());
        for logger in &self.loggers {
            match logger.build() {
                Ok(sink) => resolved.push(sink),
                Err(err) => {
                    for sink in &resolved {
                        let _ = sink.close();
                    }
                    return Err(err);
                }
            }
        }
        self.resolved = resolved;
        Ok(())
    }

    /// Sinks built from `loggers`, empty until [`Self::resolve_loggers`] runs.
    #[must_use]
    pub fn logger_sinks(&self) -> &[Sink] {
        &self.resolved
    }

    fn direct(&self, explicit: Option<&Sink>, suppressed: bool) -> Vec<Sink> {
        if suppressed {
            return Vec::new();
        }
        explicit
            .into_iter()
            .chain(self.resolved.iter())
            .cloned()
            .collect()
    }

    /// Sinks that receive the process' standard output.
    #[must_use]
    pub fn stdout_targets(&self) -> Vec<Sink> {
        if self.send_output_to_error {
            self.direct(self.error.as_ref(), self.suppress_error)
        } else {
            self.direct(self.output.as_ref(), self.suppress_output)
        }
    }

    /// Sinks that receive the process' standard error.
    #[must_use]
    pub fn stderr_targets(&self) -> Vec<Sink> {
        if self.send_error_to_output {
            self.direct(self.output.as_ref(), self.suppress_output)
        } else {
            self.direct(self.error.as_ref(), self.suppress_error)
        }
    }

    #[must_use]
    pub fn has_explicit_sinks(&self) -> bool {
        self.output.is_some() || self.error.is_some()
    }

    /// Closes logger-owned sinks. Explicit sinks belong to the caller and are
    /// left open.
    pub fn close(&self) -> Result<()> {
        let mut errors = ErrorCollector::new();
        for sink in &self.resolved {
            errors.add_result(sink.close());
        }
        errors.resolve()
    }

    /// Copy that shares explicit sinks but builds its own logger sinks on
    /// the next resolve.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            resolved: Vec::new(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_keeps_last_lines() {
        let sink = InMemorySink::new(2);
        sink.write_chunk(b"one\ntwo\nthr").unwrap();
        sink.write_chunk(b"ee\nfour").unwrap();
        assert_eq!(sink.lines(), vec!["three", "four"]);
        assert_eq!(sink.contents(), "three\nfour");
    }

    #[test]
    fn test_validate_conflicts() {
        let opts = OutputOptions {
            suppress_output: true,
            send_output_to_error: true,
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().is_validation());

        let opts = OutputOptions {
            send_output_to_error: true,
            send_error_to_output: true,
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().is_validation());

        let opts = OutputOptions {
            loggers: vec![LoggerConfig::InMemory { max_lines: 0 }],
            ..Default::default()
        };
        assert!(opts.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_targets_follow_redirects() {
        let out: Sink = Arc::new(InMemorySink::default());
        let err: Sink = Arc::new(InMemorySink::default());
        let mut opts = OutputOptions {
            output: Some(out.clone()),
            error: Some(err.clone()),
            send_error_to_output: true,
            ..Default::default()
        };
        assert_eq!(opts.stdout_targets().len(), 1);
        assert!(Arc::ptr_eq(&opts.stderr_targets()[0], &out));

        opts.send_error_to_output = false;
        opts.suppress_error = true;
        assert!(opts.stderr_targets().is_empty());
    }

    #[test]
    fn test_copy_rebuilds_loggers() {
        let mut opts = OutputOptions {
            loggers: vec![LoggerConfig::InMemory { max_lines: 10 }],
            ..Default::default()
        };
        opts.resolve_loggers().unwrap();
        opts.resolve_loggers().unwrap();
        assert_eq!(opts.logger_sinks().len(), 1);

        let mut copy = opts.copy();
        assert!(copy.logger_sinks().is_empty());
        copy.resolve_loggers().unwrap();
        assert!(!Arc::ptr_eq(&copy.logger_sinks()[0], &opts.logger_sinks()[0]));
    }

    #[test]
    fn test_file_sink_close() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let sink = FileSink::open(&path, false).unwrap();
        sink.write_chunk(b"hello\n").unwrap();
        sink.close().unwrap();
        sink.close().unwrap();
        assert!(sink.write_chunk(b"late").unwrap_err().is_state());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\n");
    }
}
