use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Utc};
use futures::{future::BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    options::{CreateOptions, ProcessImplementation},
    signal::Signal,
    trigger::{ProcessTrigger, SignalTrigger, SignalTriggerRegistry},
};

mod basic;
mod blocking;
pub(crate) mod unix;

pub use basic::BasicProcess;
pub use blocking::BlockingProcess;

/// Snapshot of a process, copied out on every read.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: String,
    pub pid: i32,
    pub host: String,
    pub options: CreateOptions,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub complete: bool,
    pub successful: bool,
    pub timeout: bool,
    /// Only meaningful once `complete` is set.
    pub exit_code: i32,
}

impl Default for ProcessInfo {
    fn default() -> Self {
        Self {
            id: String::new(),
            pid: -1,
            host: String::new(),
            options: CreateOptions::default(),
            start_at: None,
            end_at: None,
            is_running: false,
            complete: false,
            successful: false,
            timeout: false,
            exit_code: -1,
        }
    }
}

/// One supervised OS process.
///
/// Every implementation follows the same state machine: running until the
/// OS reports exit, then complete forever. Completion triggers fire once, in
/// registration order, after the final info is visible.
#[async_trait::async_trait]
pub trait Process: Send + Sync + Debug {
    /// Globally unique, fixed at creation.
    fn id(&self) -> &str;

    async fn info(&self) -> ProcessInfo;

    async fn running(&self) -> bool;

    async fn complete(&self) -> bool;

    /// Sends a signal through the signal-trigger chain.
    ///
    /// # Errors
    /// Returns a state error once the process has completed.
    async fn signal(&self, sig: Signal) -> Result<()>;

    /// Waits for completion. Canceling only unblocks the caller.
    ///
    /// # Errors
    /// Returns the process' final error, or [`Error::Canceled`].
    async fn wait(&self, cancel: &CancellationToken) -> Result<i32>;

    /// Starts a new, independent process from a copy of the creation options.
    async fn respawn(&self) -> Result<Arc<dyn Process>>;

    async fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()>;

    async fn register_signal_trigger(&self, trigger: SignalTrigger) -> Result<()>;

    /// Installs a signal trigger from the process-wide registry.
    async fn register_signal_trigger_id(&self, id: &str) -> Result<()> {
        let factory = SignalTriggerRegistry::global()
            .lookup(id)
            .ok_or_else(|| Error::Validation(format!("no signal trigger registered as `{id}`")))?;
        self.register_signal_trigger(factory()).await
    }

    async fn tag(&self, tag: &str);

    async fn get_tags(&self) -> Vec<String>;

    async fn reset_tags(&self);
}

/// The seam that lets managers and commands build any kind of process.
pub type ProcessConstructor =
    Arc<dyn Fn(CreateOptions) -> BoxFuture<'static, Result<Arc<dyn Process>>> + Send + Sync>;

/// Builds a local process of the kind the options ask for.
pub async fn new_process(opts: CreateOptions) -> Result<Arc<dyn Process>> {
    let process: Arc<dyn Process> = match opts.implementation {
        ProcessImplementation::Basic => Arc::new(BasicProcess::new(opts)?),
        ProcessImplementation::Blocking => Arc::new(BlockingProcess::new(opts)?),
    };
    Ok(process)
}

/// Constructor for local processes.
#[must_use]
pub fn local_constructor() -> ProcessConstructor {
    Arc::new(|opts| new_process(opts).boxed())
}

/// Completion trigger that releases the sinks the options own.
pub(crate) fn close_output_trigger() -> ProcessTrigger {
    Box::new(|info: &ProcessInfo| {
        if let Err(err) = info.options.output.close() {
            tracing::warn!(id = %info.id, "failed to close process output: {err}");
        }
    })
}

fn ensure_running(info: &ProcessInfo, what: &str) -> Result<()> {
    if info.complete {
        return Err(Error::State(format!(
            "cannot register {what} on completed process {}",
            info.id
        )));
    }
    Ok(())
}

/// Runs the signal-trigger chain and delivers the signal unless a trigger
/// handled it.
fn deliver_signal(info: &ProcessInfo, triggers: &[SignalTrigger], sig: Signal) -> Result<()> {
    if info.complete {
        return Err(Error::already_terminated());
    }

    let mut handled = false;
    for trigger in triggers {
        handled |= trigger(info, sig);
    }
    if handled {
        tracing::debug!(id = %info.id, %sig, "signal handled by trigger");
        return Ok(());
    }

    tracing::debug!(id = %info.id, pid = info.pid, %sig, "delivering signal");
    sig.send_to(info.pid)
}
