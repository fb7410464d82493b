use std::{fmt, sync::Arc};

pub type Result<R, E = Error> = std::result::Result<R, E>;

/// Errors returned by processes, managers and commands.
///
/// The variants are stable categories: a remote implementation maps them onto
/// its own success/failure signaling, so they must not be merged.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Malformed or empty input, rejected before any side effect.
    #[error("invalid input: {0}")]
    Validation(String),
    /// Operation is not valid in the current lifecycle state.
    #[error("invalid state: {0}")]
    State(String),
    /// The underlying OS process failed.
    #[error("process exited with code {exit_code}: {message}")]
    Execution { exit_code: i32, message: String },
    /// The process was killed because its deadline passed.
    #[error("process timed out (exit code {exit_code})")]
    Timeout { exit_code: i32 },
    /// A capacity-bounded manager is full.
    #[error("cannot exceed {limit} running processes")]
    Capacity { limit: usize },
    #[error("operation canceled")]
    Canceled,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("{}", DisplayMany(.0))]
    Multiple(Vec<Error>),
}

struct DisplayMany<'a>(&'a [Error]);

impl fmt::Display for DisplayMany<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl Error {
    pub(crate) fn already_terminated() -> Self {
        Self::State("cannot signal a process that has terminated".to_owned())
    }

    /// Exit code carried by the error, -1 when the error is not about an
    /// exited process.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Execution { exit_code, .. } | Self::Timeout { exit_code } => *exit_code,
            Self::Multiple(errors) => errors.first().map_or(-1, Self::exit_code),
            _ => -1,
        }
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        match self {
            Self::Canceled => true,
            Self::Multiple(errors) => errors.iter().any(Self::is_canceled),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::Capacity { .. })
    }

    #[must_use]
    pub fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Accumulates errors from independent steps and resolves them into a single
/// result at the end.
#[derive(Debug, Default)]
pub struct ErrorCollector {
    errors: Vec<Error>,
}

impl ErrorCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, err: Error) {
        match err {
            Error::Multiple(errors) => self.errors.extend(errors),
            err => self.errors.push(err),
        }
    }

    pub fn add_result<T>(&mut self, result: Result<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(err) => {
                self.add(err);
                None
            }
        }
    }

    pub fn extend(&mut self, other: ErrorCollector) {
        self.errors.extend(other.errors);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Returns `Ok` when nothing was collected, the error itself when exactly
    /// one was, and [`Error::Multiple`] otherwise.
    pub fn resolve(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Multiple(self.errors)),
        }
    }
}
