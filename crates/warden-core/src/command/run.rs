use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::Level;

use crate::{
    command::Command,
    error::{Error, ErrorCollector, Result},
    options::CreateOptions,
    process::Process,
};

/// Tail of captured output quoted in failure logs.
const QUOTED_LINES: usize = 10;

macro_rules! log_at {
    ($level:expr, $($arg:tt)+) => {{
        let level: Level = $level;
        if level == Level::ERROR {
            tracing::error!($($arg)+);
        } else if level == Level::WARN {
            tracing::warn!($($arg)+);
        } else if level == Level::INFO {
            tracing::info!($($arg)+);
        } else if level == Level::DEBUG {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    }};
}

impl Command {
    /// Runs every command line in order.
    ///
    /// A failure stops the batch unless `continue_on_error` is set; errors of
    /// all failed sub-invocations are combined. `ignore_error` turns the
    /// final result into success.
    #[tracing::instrument(skip_all, fields(id = %self.id))]
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.prerequisites_met() {
            return Ok(());
        }
        if let Some(run) = &self.run_func {
            let exported = self.export()?;
            return run(exported).await;
        }

        if self.cmds.is_empty() {
            return Ok(());
        }

        self.attach_default_output();
        let exported = self.export()?;

        let mut errors = ErrorCollector::new();
        for opts in exported {
            let argv = opts.args.clone();
            match self.run_one(opts, cancel).await {
                Ok(()) => tracing::debug!(id = %self.id, ?argv, "command line finished"),
                Err(err) => {
                    self.log_failure(&argv, &err);
                    let canceled = err.is_canceled();
                    errors.add(err);
                    if canceled || !self.continue_on_error {
                        break;
                    }
                }
            }
        }

        self.finish(errors)
    }

    /// Runs every command line concurrently and waits for all of them.
    ///
    /// Canceling stops waiting: processes already started are dropped from
    /// the command and the cancellation is reported with any errors so far.
    #[tracing::instrument(skip_all, fields(id = %self.id))]
    pub async fn run_parallel(&mut self, cancel: &CancellationToken) -> Result<()> {
        if !self.prerequisites_met() {
            return Ok(());
        }
        if let Some(run) = &self.run_func {
            let exported = self.export()?;
            return run(exported).await;
        }

        if self.cmds.is_empty() {
            return Ok(());
        }

        self.attach_default_output();
        // Validate everything before the first process starts.
        self.export()?;

        let (tx, mut rx) = mpsc::channel(self.cmds.len());
        for args in self.cmds.clone() {
            let mut sub = self.fork(args);
            let tx = tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let res = sub.run(&cancel).await;
                let _ = tx.send((res, std::mem::take(&mut sub.procs))).await;
            });
        }
        drop(tx);

        let mut errors = ErrorCollector::new();
        let mut procs = Vec::new();
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!(id = %self.id, "parallel run canceled");
                    errors.add(Error::Canceled);
                    return errors.resolve();
                }
                msg = rx.recv() => match msg {
                    Some((res, started)) => {
                        procs.extend(started);
                        errors.add_result(res);
                    }
                    None => break,
                },
            }
        }

        self.procs.extend(procs);
        self.finish(errors)
    }

    /// Waits for every started process in order and stops at the first
    /// failure.
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<i32> {
        if self.procs.is_empty() {
            return Err(Error::State("no process started".to_owned()));
        }
        for process in &self.procs {
            process.wait(cancel).await?;
        }
        Ok(0)
    }

    fn prerequisites_met(&self) -> bool {
        match &self.prerequisite {
            Some(check) if !check() => {
                tracing::debug!(id = %self.id, "prerequisite not met, skipping command");
                false
            }
            _ => true,
        }
    }

    async fn run_one(&mut self, mut opts: CreateOptions, cancel: &CancellationToken) -> Result<()> {
        if let Some(hook) = &self.pre_hook {
            hook(&mut opts);
        }

        let res = self.start_and_wait(opts, cancel).await;

        match &self.post_hook {
            Some(hook) => hook(res),
            None => res,
        }
    }

    async fn start_and_wait(&mut self, opts: CreateOptions, cancel: &CancellationToken) -> Result<()> {
        let process: Arc<dyn Process> = (self.constructor)(opts).await?;
        self.procs.push(process.clone());

        if self.background {
            tracing::debug!(id = %self.id, process = %process.id(), "started in background");
            return Ok(());
        }
        process.wait(cancel).await.map(|_| ())
    }

    fn finish(&self, errors: ErrorCollector) -> Result<()> {
        match errors.resolve() {
            Err(err) if self.ignore_error => {
                tracing::debug!(id = %self.id, "ignoring command error: {err}");
                Ok(())
            }
            res => res,
        }
    }

    fn log_failure(&self, argv: &[String], err: &Error) {
        let output = self
            .default_output
            .as_ref()
            .map(|sink| {
                let lines = sink.lines();
                let skip = lines.len().saturating_sub(QUOTED_LINES);
                lines[skip..].join("\n")
            })
            .unwrap_or_default();

        log_at!(
            self.priority,
            id = %self.id,
            ?argv,
            exit_code = err.exit_code(),
            %output,
            "command line failed: {err}"
        );
    }
}
