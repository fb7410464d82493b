use std::{collections::HashMap, fmt, path::PathBuf, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tracing::Level;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    manager::{manager_constructor, Manager},
    options::{CreateOptions, InMemorySink, LoggerConfig, ProcessImplementation, RemoteOptions, Sink},
    process::{local_constructor, Process, ProcessConstructor},
};

mod run;
mod shell;

/// Tweaks the options of each sub-invocation right before it starts.
pub type PreHook = Arc<dyn Fn(&mut CreateOptions) + Send + Sync>;
/// Sees the outcome of each sub-invocation and decides the one that counts.
pub type PostHook = Arc<dyn Fn(Result<()>) -> Result<()> + Send + Sync>;
/// Gate checked before anything runs; `false` skips the whole command.
pub type Prerequisite = Arc<dyn Fn() -> bool + Send + Sync>;
/// Replaces the normal execution path entirely.
pub type RunFunc = Arc<dyn Fn(Vec<CreateOptions>) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A batch of command lines sharing one set of options.
///
/// Every sub-invocation becomes its own process, created through the
/// command's constructor: a manager when built from one, local processes
/// otherwise.
pub struct Command {
    id: String,
    cmds: Vec<Vec<String>>,
    opts: CreateOptions,
    sudo: bool,
    sudo_user: Option<String>,
    priority: Level,
    continue_on_error: bool,
    ignore_error: bool,
    background: bool,
    prerequisite: Option<Prerequisite>,
    pre_hook: Option<PreHook>,
    post_hook: Option<PostHook>,
    run_func: Option<RunFunc>,
    default_output: Option<Arc<InMemorySink>>,
    constructor: ProcessConstructor,
    procs: Vec<Arc<dyn Process>>,
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("cmds", &self.cmds)
            .field("opts", &self.opts)
            .field("sudo", &self.sudo)
            .field("priority", &self.priority)
            .field("continue_on_error", &self.continue_on_error)
            .field("ignore_error", &self.ignore_error)
            .field("background", &self.background)
            .field("procs", &self.procs.len())
            .finish_non_exhaustive()
    }
}

impl Default for Command {
    fn default() -> Self {
        Self::new()
    }
}

impl Command {
    /// A command that runs local processes.
    #[must_use]
    pub fn new() -> Self {
        Self::with_constructor(local_constructor())
    }

    #[must_use]
    pub fn with_constructor(constructor: ProcessConstructor) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            cmds: Vec::new(),
            opts: CreateOptions::default(),
            sudo: false,
            sudo_user: None,
            priority: Level::INFO,
            continue_on_error: false,
            ignore_error: false,
            background: false,
            prerequisite: None,
            pre_hook: None,
            post_hook: None,
            run_func: None,
            default_output: None,
            constructor,
            procs: Vec::new(),
        }
    }

    /// A command whose processes are created and tracked by `manager`.
    #[must_use]
    pub fn with_manager(manager: Arc<dyn Manager>) -> Self {
        Self::with_constructor(manager_constructor(manager))
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Adds one argv.
    #[must_use]
    pub fn add<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.cmds.push(args.into_iter().map(Into::into).collect());
        self
    }

    /// Adds several argvs.
    #[must_use]
    pub fn extend(mut self, cmds: Vec<Vec<String>>) -> Self {
        self.cmds.extend(cmds);
        self
    }

    /// Adds each line, split on whitespace.
    #[must_use]
    pub fn append<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for line in lines {
            let args: Vec<String> = line.as_ref().split_whitespace().map(str::to_owned).collect();
            if !args.is_empty() {
                self.cmds.push(args);
            }
        }
        self
    }

    /// Adds a script run by `sh -c`.
    #[must_use]
    pub fn sh(self, script: impl Into<String>) -> Self {
        self.add(["sh".to_owned(), "-c".to_owned(), script.into()])
    }

    /// Adds a script run by `bash -c`.
    #[must_use]
    pub fn bash(self, script: impl Into<String>) -> Self {
        self.add(["bash".to_owned(), "-c".to_owned(), script.into()])
    }

    #[must_use]
    pub fn directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.opts.working_directory = Some(dir.into());
        self
    }

    /// Replaces the extra environment.
    #[must_use]
    pub fn environment(mut self, environment: HashMap<String, String>) -> Self {
        self.opts.environment = environment;
        self
    }

    #[must_use]
    pub fn add_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.opts.environment.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn sudo(mut self, sudo: bool) -> Self {
        self.sudo = sudo;
        self
    }

    #[must_use]
    pub fn sudo_as(mut self, user: impl Into<String>) -> Self {
        self.sudo = true;
        self.sudo_user = Some(user.into());
        self
    }

    #[must_use]
    pub fn tag(mut self, tag: &str) -> Self {
        self.opts.add_tag(tag);
        self
    }

    /// Level failures and summaries are logged at.
    #[must_use]
    pub fn priority(mut self, level: Level) -> Self {
        self.priority = level;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.opts.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn remote(mut self, remote: RemoteOptions) -> Self {
        self.opts.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn implementation(mut self, implementation: ProcessImplementation) -> Self {
        self.opts.implementation = implementation;
        self
    }

    /// Feeds the same bytes to every sub-invocation's standard input.
    #[must_use]
    pub fn standard_input(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.opts.standard_input = Some(input.into());
        self
    }

    /// Replaces the shared options, keeping the command lines.
    #[must_use]
    pub fn options(mut self, opts: CreateOptions) -> Self {
        self.opts = opts;
        self
    }

    #[must_use]
    pub fn continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    #[must_use]
    pub fn ignore_error(mut self, ignore_error: bool) -> Self {
        self.ignore_error = ignore_error;
        self
    }

    /// Starts processes without waiting for them.
    #[must_use]
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    #[must_use]
    pub fn prerequisite<F>(mut self, check: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.prerequisite = Some(Arc::new(check));
        self
    }

    #[must_use]
    pub fn prehook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut CreateOptions) + Send + Sync + 'static,
    {
        self.pre_hook = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn posthook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Result<()>) -> Result<()> + Send + Sync + 'static,
    {
        self.post_hook = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn set_run_func(mut self, run: RunFunc) -> Self {
        self.run_func = Some(run);
        self
    }

    #[must_use]
    pub fn set_output_sink(mut self, sink: Sink) -> Self {
        self.opts.output.output = Some(sink);
        self
    }

    #[must_use]
    pub fn set_error_sink(mut self, sink: Sink) -> Self {
        self.opts.output.error = Some(sink);
        self
    }

    /// Sends both streams to one sink.
    #[must_use]
    pub fn set_combined_sink(mut self, sink: Sink) -> Self {
        self.opts.output.output = Some(sink.clone());
        self.opts.output.error = Some(sink);
        self
    }

    #[must_use]
    pub fn add_logger(mut self, logger: LoggerConfig) -> Self {
        self.opts.output.loggers.push(logger);
        self
    }

    #[must_use]
    pub fn suppress_output(mut self, suppress: bool) -> Self {
        self.opts.output.suppress_output = suppress;
        self
    }

    #[must_use]
    pub fn suppress_error(mut self, suppress: bool) -> Self {
        self.opts.output.suppress_error = suppress;
        self
    }

    #[must_use]
    pub fn redirect_output_to_error(mut self, redirect: bool) -> Self {
        self.opts.output.send_output_to_error = redirect;
        self
    }

    #[must_use]
    pub fn redirect_error_to_output(mut self, redirect: bool) -> Self {
        self.opts.output.send_error_to_output = redirect;
        self
    }

    /// Processes started so far, in start order.
    #[must_use]
    pub fn procs(&self) -> &[Arc<dyn Process>] {
        &self.procs
    }

    /// Captured output when the command had no sink of its own.
    #[must_use]
    pub fn default_output(&self) -> Option<&Arc<InMemorySink>> {
        self.default_output.as_ref()
    }

    /// The creation options every sub-invocation would use, in order.
    pub fn export(&self) -> Result<Vec<CreateOptions>> {
        self.cmds.iter().map(|args| self.create_options(args)).collect()
    }

    fn create_options(&self, args: &[String]) -> Result<CreateOptions> {
        let mut args = match args {
            [line] if shell::needs_split(line) => shell::split(line)?,
            _ => args.to_vec(),
        };
        if args.is_empty() {
            return Err(Error::Validation("cannot run an empty command line".to_owned()));
        }

        if self.sudo {
            let mut prefix = vec!["sudo".to_owned()];
            if let Some(user) = &self.sudo_user {
                prefix.push("-u".to_owned());
                prefix.push(user.clone());
            }
            args.splice(0..0, prefix);
        }

        let mut opts = self.opts.copy();
        opts.args = args;
        opts.validate()?;
        Ok(opts)
    }

    /// Captures output in memory when the caller configured nowhere to put it.
    fn attach_default_output(&mut self) {
        if self.default_output.is_some() || self.opts.output.has_explicit_sinks() {
            return;
        }
        let sink = Arc::new(InMemorySink::default());
        self.opts.output.output = Some(sink.clone());
        self.opts.output.error = Some(sink.clone());
        self.default_output = Some(sink);
    }

    /// A single-line copy sharing hooks and constructor, used by parallel runs.
    fn fork(&self, args: Vec<String>) -> Self {
        Self {
            id: self.id.clone(),
            cmds: vec![args],
            opts: self.opts.copy(),
            sudo: self.sudo,
            sudo_user: self.sudo_user.clone(),
            priority: self.priority,
            continue_on_error: false,
            ignore_error: false,
            background: self.background,
            prerequisite: None,
            pre_hook: self.pre_hook.clone(),
            post_hook: self.post_hook.clone(),
            run_func: None,
            default_output: self.default_output.clone(),
            constructor: self.constructor.clone(),
            procs: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_applies_shared_options() {
        let cmd = Command::new()
            .add(["echo", "a"])
            .append(["ls -l /tmp", "  "])
            .sh("exit 3")
            .directory("/tmp")
            .add_env("K", "V")
            .tag("batch")
            .timeout(Duration::from_secs(5));

        let exported = cmd.export().unwrap();
        assert_eq!(exported.len(), 3);
        assert_eq!(exported[1].args, vec!["ls", "-l", "/tmp"]);
        assert_eq!(exported[2].args, vec!["sh", "-c", "exit 3"]);
        for opts in &exported {
            assert_eq!(opts.working_directory, Some(PathBuf::from("/tmp")));
            assert_eq!(opts.environment["K"], "V");
            assert_eq!(opts.tags, vec!["batch"]);
            assert_eq!(opts.timeout, Some(Duration::from_secs(5)));
        }
    }

    #[test]
    fn test_export_splits_single_command_line() {
        let cmd = Command::new().add([r#"echo "hello world""#]).sudo_as("ops");
        assert_eq!(
            cmd.export().unwrap()[0].args,
            vec!["sudo", "-u", "ops", "echo", "hello world"]
        );
    }

    #[test]
    fn test_export_rejects_empty_lines() {
        assert!(Command::new().export().unwrap().is_empty());
        assert!(Command::new()
            .add(Vec::<String>::new())
            .export()
            .unwrap_err()
            .is_validation());
        assert!(Command::new().add(["echo 'open"]).export().is_err());
    }

    #[test]
    fn test_default_output_only_without_sinks() {
        let mut cmd = Command::new().add(["true"]);
        cmd.attach_default_output();
        assert!(cmd.default_output().is_some());

        let mut cmd = Command::new()
            .add(["true"])
            .set_output_sink(Arc::new(InMemorySink::default()));
        cmd.attach_default_output();
        assert!(cmd.default_output().is_none());
    }
}
