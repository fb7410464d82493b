use std::{collections::HashMap, fmt, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    command::Command,
    error::{Error, Result},
    logging::LoggingCache,
    manager::{terminate_all, Filter, Manager, INFO_TIMEOUT},
    options::{CreateOptions, Executor, RemoteOptions, WriteFileOptions},
    process::{local_constructor, new_process, Process, ProcessConstructor, ProcessInfo},
    tracker::ProcessTracker,
    trigger::ProcessTrigger,
};

/// Keeps every process it creates or adopts in an ID-keyed table.
pub struct BasicManager {
    id: String,
    procs: DashMap<String, Arc<dyn Process>>,
    loggers: Arc<LoggingCache>,
    tracker: Option<Arc<dyn ProcessTracker>>,
    remote: Option<RemoteOptions>,
    environment: HashMap<String, String>,
    executor: Option<Executor>,
    constructor: ProcessConstructor,
}

impl fmt::Debug for BasicManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicManager")
            .field("id", &self.id)
            .field("procs", &self.procs.len())
            .field("tracker", &self.tracker)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl Default for BasicManager {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            procs: DashMap::new(),
            loggers: Arc::new(LoggingCache::new()),
            tracker: None,
            remote: None,
            environment: HashMap::new(),
            executor: None,
            constructor: local_constructor(),
        }
    }

    #[must_use]
    pub fn with_tracker(mut self, tracker: Arc<dyn ProcessTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn with_logging_cache(mut self, loggers: Arc<LoggingCache>) -> Self {
        self.loggers = loggers;
        self
    }

    /// Remote target for processes that do not name one.
    #[must_use]
    pub fn with_default_remote(mut self, remote: RemoteOptions) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Variables added to every process unless the request sets them.
    #[must_use]
    pub fn with_environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn with_constructor(mut self, constructor: ProcessConstructor) -> Self {
        self.constructor = constructor;
        self
    }

    /// Number of processes in the table, completed ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.procs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.procs.is_empty()
    }

    fn apply_defaults(&self, opts: &mut CreateOptions) {
        if opts.remote.is_none() {
            opts.remote.clone_from(&self.remote);
        }
        for (key, value) in &self.environment {
            opts.environment
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        if opts.executor.is_none() {
            opts.executor.clone_from(&self.executor);
        }
    }

    /// Table snapshot, so no map guard is held across an await.
    fn snapshot(&self) -> Vec<Arc<dyn Process>> {
        self.procs.iter().map(|entry| entry.value().clone()).collect()
    }

    async fn select<F>(&self, cancel: &CancellationToken, keep: F) -> Result<Vec<Arc<dyn Process>>>
    where
        F: Fn(&ProcessInfo) -> bool + Send,
    {
        let mut selected = Vec::new();
        for process in self.snapshot() {
            let info = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Canceled),
                info = tokio::time::timeout(INFO_TIMEOUT, process.info()) => info,
            };
            match info {
                Ok(info) if keep(&info) => selected.push(process),
                Ok(_) => {}
                Err(_) => tracing::warn!(id = %process.id(), "process info timed out, skipping"),
            }
        }
        Ok(selected)
    }

    /// Adds the process to the tracker until it completes.
    async fn track(&self, process: &Arc<dyn Process>, info: &ProcessInfo) {
        let Some(tracker) = &self.tracker else {
            return;
        };
        if let Err(err) = tracker.add(info) {
            tracing::warn!(id = %info.id, "failed to track process: {err}");
            return;
        }

        let untrack = tracker.clone();
        let trigger: ProcessTrigger = Box::new(move |info: &ProcessInfo| untrack.remove(info));
        if process.register_trigger(trigger).await.is_err() {
            tracker.remove(&process.info().await);
        }
    }
}

/// Starts the side processes matching how the parent finished.
fn run_side_processes(info: &ProcessInfo) {
    let side = if info.timeout {
        &info.options.on_timeout
    } else if info.successful {
        &info.options.on_success
    } else {
        &info.options.on_failure
    };

    for opts in side {
        let opts = opts.copy();
        let parent = info.id.clone();
        tokio::spawn(async move {
            match new_process(opts).await {
                Ok(process) => {
                    tracing::debug!(%parent, id = %process.id(), "started side process");
                }
                Err(err) => tracing::warn!(%parent, "failed to start side process: {err}"),
            }
        });
    }
}

fn side_process_trigger() -> ProcessTrigger {
    Box::new(run_side_processes)
}

#[async_trait::async_trait]
impl Manager for BasicManager {
    fn id(&self) -> &str {
        &self.id
    }

    async fn create_process(&self, mut opts: CreateOptions) -> Result<Arc<dyn Process>> {
        self.apply_defaults(&mut opts);
        let process = (self.constructor)(opts).await?;
        let info = process.info().await;

        if let Err(err) = self.loggers.create(process.id(), &info.options.output) {
            tracing::warn!(id = %process.id(), "failed to cache process logger: {err}");
        }

        let has_side = !(info.options.on_success.is_empty()
            && info.options.on_failure.is_empty()
            && info.options.on_timeout.is_empty());
        if has_side {
            if let Err(err) = process.register_trigger(side_process_trigger()).await {
                // Finished before the trigger landed.
                tracing::debug!(id = %process.id(), "running side processes directly: {err}");
                run_side_processes(&process.info().await);
            }
        }

        self.track(&process, &info).await;
        self.procs.insert(process.id().to_owned(), process.clone());
        tracing::debug!(manager = %self.id, id = %process.id(), "created process");

        Ok(process)
    }

    fn create_command(self: Arc<Self>) -> Command {
        Command::with_manager(self)
    }

    async fn register(&self, process: Arc<dyn Process>) -> Result<()> {
        if process.id().is_empty() {
            return Err(Error::Validation("cannot register a process without an id".to_owned()));
        }

        match self.procs.entry(process.id().to_owned()) {
            Entry::Occupied(_) => {
                return Err(Error::State(format!(
                    "process {} is already registered",
                    process.id()
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(process.clone());
            }
        }

        if self.tracker.is_some() {
            let info = process.info().await;
            self.track(&process, &info).await;
        }
        Ok(())
    }

    async fn list(
        &self,
        filter: Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<dyn Process>>> {
        self.select(cancel, |info| filter.matches(info)).await
    }

    async fn group(&self, tag: &str, cancel: &CancellationToken) -> Result<Vec<Arc<dyn Process>>> {
        self.select(cancel, |info| info.options.tags.iter().any(|t| t == tag))
            .await
    }

    async fn get(&self, id: &str) -> Result<Arc<dyn Process>> {
        self.procs
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("process {id}")))
    }

    async fn clear(&self) {
        let mut cleared = 0;
        for process in self.snapshot() {
            if !process.complete().await {
                continue;
            }
            self.procs.remove(process.id());
            if let Err(err) = self.loggers.close_and_remove(process.id()) {
                tracing::warn!(id = %process.id(), "failed to close cached logger: {err}");
            }
            cleared += 1;
        }
        tracing::debug!(manager = %self.id, cleared, "cleared completed processes");
    }

    #[tracing::instrument(skip_all, fields(manager = %self.id))]
    async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        if self.procs.is_empty() {
            return Ok(());
        }

        let running = self.list(Filter::Running, cancel).await?;

        if let Some(tracker) = &self.tracker {
            match tracker.cleanup() {
                Ok(()) => return Ok(()),
                Err(err) => tracing::warn!(manager = %self.id, "tracker cleanup failed: {err}"),
            }
        }

        tracing::info!(manager = %self.id, count = running.len(), "terminating processes");
        terminate_all(&running, cancel).await
    }

    fn logging_cache(&self) -> Arc<LoggingCache> {
        self.loggers.clone()
    }

    async fn write_file(&self, opts: WriteFileOptions) -> Result<()> {
        opts.write().await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_defaults_do_not_override_request() {
        let manager = BasicManager::new().with_environment(HashMap::from([
            ("A".to_owned(), "manager".to_owned()),
            ("B".to_owned(), "manager".to_owned()),
        ]));

        let mut opts = CreateOptions::new(["true"]);
        opts.environment.insert("A".to_owned(), "request".to_owned());
        manager.apply_defaults(&mut opts);

        assert_eq!(opts.environment["A"], "request");
        assert_eq!(opts.environment["B"], "manager");
    }

    #[tokio::test]
    async fn test_get_and_register() {
        let manager = BasicManager::new();
        assert!(matches!(manager.get("nope").await, Err(Error::NotFound(_))));

        let process = manager
            .create_process(CreateOptions::new(["true"]))
            .await
            .unwrap();
        assert_eq!(manager.get(process.id()).await.unwrap().id(), process.id());
        assert!(manager.register(process).await.unwrap_err().is_state());
        assert!(manager.logging_cache().get(manager.snapshot()[0].id()).is_some());
    }

    #[tokio::test]
    async fn test_clear_drops_completed_only() {
        let manager = BasicManager::new();
        let cancel = CancellationToken::new();

        let done = manager
            .create_process(CreateOptions::new(["true"]))
            .await
            .unwrap();
        let sleeper = manager
            .create_process(CreateOptions::new(["sleep", "10"]))
            .await
            .unwrap();
        done.wait(&cancel).await.unwrap();

        manager.clear().await;
        assert_eq!(manager.len(), 1);
        assert!(manager.get(sleeper.id()).await.is_ok());
        assert!(manager.logging_cache().get(done.id()).is_none());

        manager.close(&cancel).await.unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(2), sleeper.wait(&cancel))
            .await
            .is_ok());
        assert!(!sleeper.running().await);
    }

    #[tokio::test]
    async fn test_list_honors_cancellation() {
        let manager = BasicManager::new();
        manager
            .create_process(CreateOptions::new(["true"]))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(manager
            .list(Filter::All, &cancel)
            .await
            .unwrap_err()
            .is_canceled());
    }
}
