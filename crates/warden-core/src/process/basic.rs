use std::{fmt, sync::Arc};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;
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

struct State {
    info: ProcessInfo,
    triggers: Vec<ProcessTrigger>,
    signal_triggers: Vec<SignalTrigger>,
    result: Option<Result<i32>>,
}

/// Process whose state is shared behind a lock, with one watcher task that
/// owns the OS handle and performs the transition to complete.
pub struct BasicProcess {
    id: String,
    state: Arc<Mutex<State>>,
    done: watch::Receiver<bool>,
}

impl fmt::Debug for BasicProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BasicProcess")
            .field("id", &self.id)
            .field("pid", &state.info.pid)
            .field("complete", &state.info.complete)
            .field("triggers", &state.triggers.len())
            .finish()
    }
}

impl BasicProcess {
    /// Validates the options and starts the process.
    ///
    /// # Errors
    /// Returns a validation error for bad options, or the spawn error. No
    /// process handle exists when this fails.
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
        tracing::info!(%id, pid = info.pid, "created process");

        let state = Arc::new(Mutex::new(State {
            info,
            triggers: vec![close_output_trigger()],
            signal_triggers: Vec::new(),
            result: None,
        }));
        let (done_tx, done_rx) = watch::channel(false);

        tokio::spawn(watch_process(spawned, state.clone(), done_tx));

        Ok(Self {
            id,
            state,
            done: done_rx,
        })
    }
}

async fn watch_process(mut spawned: Spawned, state: Arc<Mutex<State>>, done: watch::Sender<bool>) {
    let status = unix::wait_for_exit(&mut spawned.child, spawned.deadline).await;
    let outcome = unix::outcome(status, spawned.deadline);

    // The pid is reaped: record the exit before anything can signal it again.
    {
        let mut state = state.lock();
        let info = &mut state.info;
        info.end_at = Some(Utc::now());
        info.exit_code = outcome.exit_code;
        info.successful = outcome.successful;
        info.timeout = outcome.timeout;
        info.is_running = false;
        info.complete = true;
        state.result = Some(outcome.result);
    }

    spawned.take_pumps().drain().await;

    let (info, triggers) = {
        let mut state = state.lock();
        (state.info.clone(), std::mem::take(&mut state.triggers))
    };

    tracing::info!(
        id = %info.id,
        exit_code = info.exit_code,
        timeout = info.timeout,
        "process completed"
    );

    for trigger in triggers {
        trigger(&info);
    }

    done.send_replace(true);
}

#[async_trait::async_trait]
impl Process for BasicProcess {
    fn id(&self) -> &str {
        &self.id
    }

    async fn info(&self) -> ProcessInfo {
        self.state.lock().info.clone()
    }

    async fn running(&self) -> bool {
        self.state.lock().info.is_running
    }

    async fn complete(&self) -> bool {
        self.state.lock().info.complete
    }

    async fn signal(&self, sig: Signal) -> Result<()> {
        let state = self.state.lock();
        deliver_signal(&state.info, &state.signal_triggers, sig)
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<i32> {
        let mut done = self.done.clone();
        tokio::select! {
            biased;
            res = done.wait_for(|complete| *complete) => {
                if res.is_err() {
                    return Err(Error::State(format!("process {} lost its watcher", self.id)));
                }
            }
            () = cancel.cancelled() => return Err(Error::Canceled),
        }

        self.state
            .lock()
            .result
            .clone()
            .unwrap_or_else(|| Err(Error::State(format!("process {} has no result", self.id))))
    }

    async fn respawn(&self) -> Result<Arc<dyn Process>> {
        let opts = self.state.lock().info.options.copy();
        new_process(opts).await
    }

    async fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()> {
        let mut state = self.state.lock();
        ensure_running(&state.info, "a trigger")?;
        state.triggers.push(trigger);
        Ok(())
    }

    async fn register_signal_trigger(&self, trigger: SignalTrigger) -> Result<()> {
        let mut state = self.state.lock();
        ensure_running(&state.info, "a signal trigger")?;
        state.signal_triggers.push(trigger);
        Ok(())
    }

    async fn tag(&self, tag: &str) {
        self.state.lock().info.options.add_tag(tag);
    }

    async fn get_tags(&self) -> Vec<String> {
        self.state.lock().info.options.tags.clone()
    }

    async fn reset_tags(&self) {
        self.state.lock().info.options.tags.clear();
    }
}
