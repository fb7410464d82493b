use std::{fmt, sync::Arc};

use chrono::Utc;
use futures::future::OptionFuture;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
    time::{sleep_until, Instant},
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    error::{Error, Result},
    options::CreateOptions,
    process::{
        close_output_trigger, deliver_signal, ensure_running, new_process,
        unix::{self, Spawned},
        Process, ProcessInfo,
    },
    signal::Signal,
    trigger::{ProcessTrigger, SignalTrigger},
};

enum Operation {
    Info(oneshot::Sender<ProcessInfo>),
    Signal(Signal, oneshot::Sender<Result<()>>),
    Wait(oneshot::Sender<Result<i32>>),
    RegisterTrigger(ProcessTrigger, oneshot::Sender<Result<()>>),
    RegisterSignalTrigger(SignalTrigger, oneshot::Sender<Result<()>>),
    Tag(String),
    Tags(oneshot::Sender<Vec<String>>),
    ResetTags,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info(_) => "Info",
            Self::Signal(..) => "Signal",
            Self::Wait(_) => "Wait",
            Self::RegisterTrigger(..) => "RegisterTrigger",
            Self::RegisterSignalTrigger(..) => "RegisterSignalTrigger",
            Self::Tag(_) => "Tag",
            Self::Tags(_) => "Tags",
            Self::ResetTags => "ResetTags",
        };
        f.write_str(name)
    }
}

/// Process driven by a single actor task that exclusively owns the OS handle
/// and every piece of state. Callers talk to it over a channel.
#[derive(Debug)]
pub struct BlockingProcess {
    id: String,
    ops: mpsc::Sender<Operation>,
}

impl BlockingProcess {
    /// Validates the options, starts the process and its actor.
    ///
    /// # Errors
    /// Returns a validation error for bad options, or the spawn error.
    pub fn new(mut opts: CreateOptions) -> Result<Self> {
        let resolved = opts.resolve()?;

        let spawned = match unix::start(resolved, &opts) {
            Ok(spawned) => spawned,
            Err(err) => {
                if let Err(close_err) = opts.output.close() {
                    tracing::warn!("failed to close output after spawn failure: {close_err}");
                }
                return Err(err);
            }
        };

        let id = Uuid::new_v4().to_string();
        let info = ProcessInfo {
            id: id.clone(),
            pid: spawned.pid,
            host: opts.host(),
            options: opts,
            start_at: Some(Utc::now()),
            is_running: true,
            ..Default::default()
        };
        tracing::info!(%id, pid = info.pid, "created blocking process");

        let (ops_tx, ops_rx) = mpsc::channel(32);
        let mut actor = ProcessActor {
            spawned,
            ops: ops_rx,
            info,
            triggers: vec![close_output_trigger()],
            signal_triggers: Vec::new(),
            result: None,
            waiters: Vec::new(),
            draining: None,
            killed: false,
        };
        tokio::spawn(async move { actor.run().await });

        Ok(Self { id, ops: ops_tx })
    }

    async fn request<T>(&self, op: impl FnOnce(oneshot::Sender<T>) -> Operation) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(op(tx))
            .await
            .map_err(|_| self.actor_gone())?;
        rx.await.map_err(|_| self.actor_gone())
    }

    fn actor_gone(&self) -> Error {
        Error::State(format!("process {} is no longer supervised", self.id))
    }
}

struct ProcessActor {
    spawned: Spawned,
    ops: mpsc::Receiver<Operation>,
    info: ProcessInfo,
    triggers: Vec<ProcessTrigger>,
    signal_triggers: Vec<SignalTrigger>,
    result: Option<Result<i32>>,
    waiters: Vec<oneshot::Sender<Result<i32>>>,
    draining: Option<JoinHandle<()>>,
    killed: bool,
}

impl ProcessActor {
    /// Serves operations until every handle is dropped and the process has
    /// been reaped.
    async fn run(&mut self) {
        let mut ops_open = true;

        loop {
            let deadline = self.spawned.deadline;
            let running = self.result.is_none();

            tokio::select! {
                status = self.spawned.child.wait(), if running => self.exited(status),
                () = sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if running && deadline.is_some() && !self.killed =>
                {
                    self.killed = true;
                    unix::kill_on_deadline(&mut self.spawned.child);
                }
                Some(_) = OptionFuture::from(self.draining.as_mut()), if self.draining.is_some() => {
                    self.draining = None;
                    self.settle();
                }
                op = self.ops.recv(), if ops_open => match op {
                    Some(op) => self.handle(op),
                    None => ops_open = false,
                },
                else => break,
            }
        }

        tracing::trace!(id = %self.info.id, "process actor stopped");
    }

    /// Records the exit as soon as the pid is reaped, then drains the output
    /// pumps off the actor so operations keep being served.
    fn exited(&mut self, status: std::io::Result<std::process::ExitStatus>) {
        let outcome = unix::outcome(status, self.spawned.deadline);

        self.info.end_at = Some(Utc::now());
        self.info.exit_code = outcome.exit_code;
        self.info.successful = outcome.successful;
        self.info.timeout = outcome.timeout;
        self.info.is_running = false;
        self.info.complete = true;
        self.result = Some(outcome.result);

        let pumps = self.spawned.take_pumps();
        self.draining = Some(tokio::spawn(pumps.drain()));
    }

    /// Output is drained: fire the completion triggers and answer waiters.
    fn settle(&mut self) {
        tracing::info!(
            id = %self.info.id,
            exit_code = self.info.exit_code,
            timeout = self.info.timeout,
            "process completed"
        );

        for trigger in std::mem::take(&mut self.triggers) {
            trigger(&self.info);
        }
        if let Some(result) = &self.result {
            for waiter in self.waiters.drain(..) {
                let _ = waiter.send(result.clone());
            }
        }
    }

    fn settled(&self) -> bool {
        self.result.is_some() && self.draining.is_none()
    }

    fn handle(&mut self, op: Operation) {
        match op {
            Operation::Info(reply) => {
                let _ = reply.send(self.info.clone());
            }
            Operation::Signal(sig, reply) => {
                let _ = reply.send(deliver_signal(&self.info, &self.signal_triggers, sig));
            }
            Operation::Wait(reply) => match &self.result {
                Some(result) if self.settled() => {
                    let _ = reply.send(result.clone());
                }
                _ => self.waiters.push(reply),
            },
            Operation::RegisterTrigger(trigger, reply) => {
                let res = ensure_running(&self.info, "a trigger").map(|()| {
                    self.triggers.push(trigger);
                });
                let _ = reply.send(res);
            }
            Operation::RegisterSignalTrigger(trigger, reply) => {
                let res = ensure_running(&self.info, "a signal trigger").map(|()| {
                    self.signal_triggers.push(trigger);
                });
                let _ = reply.send(res);
            }
            Operation::Tag(tag) => self.info.options.add_tag(&tag),
            Operation::Tags(reply) => {
                let _ = reply.send(self.info.options.tags.clone());
            }
            Operation::ResetTags => self.info.options.tags.clear(),
        }
    }
}

#[async_trait::async_trait]
impl Process for BlockingProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn info(&self) -> ProcessInfo {
        self.request(Operation::Info).await.unwrap_or_else(|err| {
            tracing::warn!(id = %self.id, "cannot read process info: {err}");
            ProcessInfo {
                id: self.id.clone(),
                ..Default::default()
            }
        })
    }

    async fn running(&self) -> bool {
        self.info().await.is_running
    }

    async fn complete(&self) -> bool {
        self.info().await.complete
    }

    async fn signal(&self, sig: Signal) -> Result<()> {
        self.request(|reply| Operation::Signal(sig, reply)).await?
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<i32> {
        tokio::select! {
            biased;
            res = self.request(Operation::Wait) => res?,
            () = cancel.cancelled() => Err(Error::Canceled),
        }
    }

    async fn respawn(&self) -> Result<Arc<dyn Process>> {
        let opts = self.info().await.options.copy();
        new_process(opts).await
    }

    async fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()> {
        self.request(|reply| Operation::RegisterTrigger(trigger, reply))
            .await?
    }

    async fn register_signal_trigger(&self, trigger: SignalTrigger) -> Result<()> {
        self.request(|reply| Operation::RegisterSignalTrigger(trigger, reply))
            .await?
    }

    async fn tag(&self, tag: &str) {
        let _ = self.ops.send(Operation::Tag(tag.to_owned())).await;
    }

    async fn get_tags(&self) -> Vec<String> {
        self.request(Operation::Tags).await.unwrap_or_default()
    }

    async fn reset_tags(&self) {
        let _ = self.ops.send(Operation::ResetTags).await;
    }
}
