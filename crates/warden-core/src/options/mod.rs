use std::{collections::HashMap, fmt, path::PathBuf, process::Stdio, sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tokio::{process::Command, time::Instant};

use crate::error::{Error, Result};

mod file;
mod output;
mod remote;

pub use file::WriteFileOptions;
pub use output::{
    FileSink, InMemorySink, LoggerConfig, OutputOptions, OutputSink, Sink, DEFAULT_IN_MEMORY_LINES,
};
pub use remote::RemoteOptions;

/// Host name reported for processes that run on this machine.
pub const LOCAL_HOST: &str = "localhost";

/// Which process implementation a constructor builds.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessImplementation {
    /// Lock-guarded state with a watcher task.
    #[default]
    Basic,
    /// A single actor task owns the OS handle.
    Blocking,
}

/// Rewrites the argv right before spawning, e.g. to run it inside a
/// container or under another launcher.
#[derive(Clone)]
pub struct Executor(Arc<dyn Fn(Vec<String>) -> Result<Vec<String>> + Send + Sync>);

impl Executor {
    pub fn new<F>(resolve: F) -> Self
    where
        F: Fn(Vec<String>) -> Result<Vec<String>> + Send + Sync + 'static,
    {
        Self(Arc::new(resolve))
    }

    pub fn resolve(&self, args: Vec<String>) -> Result<Vec<String>> {
        (self.0)(args)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Executor(<fn>)")
    }
}

/// Everything needed to start one process.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateOptions {
    pub args: Vec<String>,
    pub environment: HashMap<String, String>,
    /// Start from an empty environment instead of inheriting ours.
    pub override_environ: bool,
    pub working_directory: Option<PathBuf>,
    pub standard_input: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
    pub tags: Vec<String>,
    pub on_success: Vec<CreateOptions>,
    pub on_failure: Vec<CreateOptions>,
    pub on_timeout: Vec<CreateOptions>,
    pub output: OutputOptions,
    pub remote: Option<RemoteOptions>,
    pub implementation: ProcessImplementation,
    #[serde(skip)]
    pub executor: Option<Executor>,
}

/// Options turned into something the OS can run.
#[derive(Debug)]
pub(crate) struct Resolved {
    pub command: Command,
    pub argv: Vec<String>,
    pub deadline: Option<Instant>,
}

impl CreateOptions {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        let Some(program) = self.args.first() else {
            return Err(Error::Validation("cannot create a process with no arguments".to_owned()));
        };
        if program.trim().is_empty() {
            return Err(Error::Validation("program name must not be empty".to_owned()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(Error::Validation("timeout must be greater than zero".to_owned()));
        }
        if let Some(remote) = &self.remote {
            remote.validate()?;
        }
        self.output.validate()?;

        for side in self
            .on_success
            .iter()
            .chain(&self.on_failure)
            .chain(&self.on_timeout)
        {
            side.validate()?;
        }

        Ok(())
    }

    /// Host the process will report.
    #[must_use]
    pub fn host(&self) -> String {
        self.remote
            .as_ref()
            .map_or_else(|| LOCAL_HOST.to_owned(), |r| r.host.clone())
    }

    /// Final argv after remote wrapping and executor substitution.
    pub fn command_line(&self) -> Result<Vec<String>> {
        let mut argv = match &self.remote {
            Some(remote) => remote.wrap(&self.args),
            None => self.args.clone(),
        };
        if let Some(executor) = &self.executor {
            argv = executor.resolve(argv)?;
            if argv.first().is_none_or(|p| p.is_empty()) {
                return Err(Error::Validation("executor produced an empty command".to_owned()));
            }
        }
        Ok(argv)
    }

    /// Validates the options, builds logger sinks and prepares the OS
    /// command. The deadline is measured from this call.
    pub(crate) fn resolve(&mut self) -> Result<Resolved> {
        self.validate()?;
        let argv = self.command_line()?;
        self.output.resolve_loggers()?;

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);

        if self.override_environ {
            command.env_clear();
        }
        command.envs(&self.environment);

        // Remote processes run in the remote user's home directory.
        if self.remote.is_none() {
            if let Some(dir) = &self.working_directory {
                command.current_dir(dir);
            }
        }

        command.stdin(if self.standard_input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(if self.output.stdout_targets().is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        });
        command.stderr(if self.output.stderr_targets().is_empty() {
            Stdio::null()
        } else {
            Stdio::piped()
        });

        #[allow(unsafe_code)]
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        Ok(Resolved {
            command,
            argv,
            deadline: self.timeout.map(|timeout| Instant::now() + timeout),
        })
    }

    /// Deep copy: logger sinks are rebuilt instead of shared.
    #[must_use]
    pub fn copy(&self) -> Self {
        Self {
            output: self.output.copy(),
            on_success: self.on_success.iter().map(Self::copy).collect(),
            on_failure: self.on_failure.iter().map(Self::copy).collect(),
            on_timeout: self.on_timeout.iter().map(Self::copy).collect(),
            ..self.clone()
        }
    }

    pub(crate) fn add_tag(&mut self, tag: &str) {
        if !self.tags.iter().any(|t| t == tag) {
            self.tags.push(tag.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(CreateOptions::default().validate().unwrap_err().is_validation());
        assert!(CreateOptions::new([""]).validate().unwrap_err().is_validation());
        assert!(CreateOptions::new(["true"]).validate().is_ok());

        let opts = CreateOptions {
            timeout: Some(Duration::ZERO),
            ..CreateOptions::new(["true"])
        };
        assert!(opts.validate().is_err());

        let opts = CreateOptions {
            on_failure: vec![CreateOptions::default()],
            ..CreateOptions::new(["true"])
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_command_line_remote_and_executor() {
        let opts = CreateOptions {
            remote: Some(RemoteOptions::new("box")),
            executor: Some(Executor::new(|mut argv| {
                argv.insert(0, "nice".to_owned());
                Ok(argv)
            })),
            ..CreateOptions::new(["ls", "-la"])
        };
        assert_eq!(opts.host(), "box");
        assert_eq!(
            opts.command_line().unwrap(),
            vec!["nice", "ssh", "box", "ls -la"]
        );
    }

    #[test]
    fn test_executor_cannot_empty_command() {
        let opts = CreateOptions {
            executor: Some(Executor::new(|_| Ok(Vec::new()))),
            ..CreateOptions::new(["ls"])
        };
        assert!(opts.command_line().unwrap_err().is_validation());
    }

    #[test]
    fn test_copy_is_independent() {
        let original = CreateOptions {
            tags: vec!["a".to_owned()],
            ..CreateOptions::new(["true"])
        };
        let mut copy = original.copy();
        copy.add_tag("b");
        copy.add_tag("b");
        assert_eq!(copy.tags, vec!["a", "b"]);
        assert_eq!(original.tags, vec!["a"]);
    }
}
