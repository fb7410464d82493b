use std::{collections::HashMap, sync::Arc};

use crate::{
    error::Result,
    logging::LoggingCache,
    manager::{BasicManager, Manager, RemoteManager, SelfClearingManager, SynchronizedManager},
    options::{Executor, RemoteOptions},
    process::ProcessConstructor,
    tracker::ProcessTracker,
};

/// Assembles a manager from the base table and its decorators.
///
/// Layers stack as base, then capacity, then the forced remote target, with
/// synchronization outermost so it covers everything below.
#[derive(Default)]
pub struct ManagerBuilder {
    max_procs: Option<usize>,
    synchronized: bool,
    tracker: Option<Arc<dyn ProcessTracker>>,
    loggers: Option<Arc<LoggingCache>>,
    default_remote: Option<RemoteOptions>,
    remote: Option<RemoteOptions>,
    environment: HashMap<String, String>,
    executor: Option<Executor>,
    constructor: Option<ProcessConstructor>,
}

impl std::fmt::Debug for ManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerBuilder")
            .field("max_procs", &self.max_procs)
            .field("synchronized", &self.synchronized)
            .field("tracker", &self.tracker)
            .field("remote", &self.remote)
            .finish_non_exhaustive()
    }
}

impl ManagerBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Caps the process table, clearing completed processes when full.
    #[must_use]
    pub fn max_procs(mut self, max_procs: usize) -> Self {
        self.max_procs = Some(max_procs);
        self
    }

    #[must_use]
    pub fn synchronized(mut self, synchronized: bool) -> Self {
        self.synchronized = synchronized;
        self
    }

    #[must_use]
    pub fn tracker(mut self, tracker: Arc<dyn ProcessTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    #[must_use]
    pub fn logging_cache(mut self, loggers: Arc<LoggingCache>) -> Self {
        self.loggers = Some(loggers);
        self
    }

    /// Remote target used when a request names none.
    #[must_use]
    pub fn default_remote(mut self, remote: RemoteOptions) -> Self {
        self.default_remote = Some(remote);
        self
    }

    /// Remote target every process is forced onto.
    #[must_use]
    pub fn remote(mut self, remote: RemoteOptions) -> Self {
        self.remote = Some(remote);
        self
    }

    #[must_use]
    pub fn environment(mut self, environment: HashMap<String, String>) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn constructor(mut self, constructor: ProcessConstructor) -> Self {
        self.constructor = Some(constructor);
        self
    }

    pub fn build(self) -> Result<Arc<dyn Manager>> {
        let mut base = BasicManager::new().with_environment(self.environment);
        if let Some(tracker) = self.tracker {
            base = base.with_tracker(tracker);
        }
        if let Some(loggers) = self.loggers {
            base = base.with_logging_cache(loggers);
        }
        if let Some(remote) = self.default_remote {
            remote.validate()?;
            base = base.with_default_remote(remote);
        }
        if let Some(executor) = self.executor {
            base = base.with_executor(executor);
        }
        if let Some(constructor) = self.constructor {
            base = base.with_constructor(constructor);
        }

        let mut manager: Arc<dyn Manager> = match self.max_procs {
            Some(max_procs) => Arc::new(SelfClearingManager::new(base, max_procs)?),
            None => Arc::new(base),
        };
        if let Some(remote) = self.remote {
            manager = Arc::new(RemoteManager::new(manager, remote)?);
        }
        if self.synchronized {
            manager = Arc::new(SynchronizedManager::new(manager));
        }

        tracing::debug!(id = %manager.id(), synchronized = self.synchronized, "built manager");
        Ok(manager)
    }
}
