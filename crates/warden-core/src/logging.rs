use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::{
    error::{Error, ErrorCollector, Result},
    options::{OutputOptions, Sink},
};

/// Output sinks associated with one process, kept by a [`LoggingCache`].
#[derive(Debug)]
pub struct CachedLogger {
    pub id: String,
    pub manager_id: String,
    pub output: Vec<Sink>,
    pub error: Vec<Sink>,
    accessed: Mutex<DateTime<Utc>>,
}

impl CachedLogger {
    #[must_use]
    pub fn new(id: impl Into<String>, manager_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            manager_id: manager_id.into(),
            output: Vec::new(),
            error: Vec::new(),
            accessed: Mutex::new(Utc::now()),
        }
    }

    /// Builds a logger from output options, resolving their loggers first.
    pub fn from_options(
        id: impl Into<String>,
        manager_id: impl Into<String>,
        opts: &OutputOptions,
    ) -> Result<Self> {
        let mut opts = opts.clone();
        opts.resolve_loggers()?;

        Ok(Self {
            output: opts.stdout_targets(),
            error: opts.stderr_targets(),
            ..Self::new(id, manager_id)
        })
    }

    #[must_use]
    pub fn accessed(&self) -> DateTime<Utc> {
        *self.accessed.lock()
    }

    fn touch(&self) {
        *self.accessed.lock() = Utc::now();
    }

    #[cfg(test)]
    fn set_accessed(&self, at: DateTime<Utc>) {
        *self.accessed.lock() = at;
    }

    /// Closes every sink once, even when it serves both streams.
    pub fn close(&self) -> Result<()> {
        let mut errors = ErrorCollector::new();
        let mut closed: Vec<&Sink> = Vec::new();
        for sink in self.output.iter().chain(&self.error) {
            if closed.iter().any(|seen| Arc::ptr_eq(seen, sink)) {
                continue;
            }
            closed.push(sink);
            errors.add_result(sink.close());
        }
        errors.resolve()
    }
}

/// ID-keyed store of loggers with access-time based eviction. Safe to share
/// between managers.
#[derive(Debug, Default)]
pub struct LoggingCache {
    loggers: RwLock<HashMap<String, Arc<CachedLogger>>>,
}

impl LoggingCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, id: &str, opts: &OutputOptions) -> Result<Arc<CachedLogger>> {
        if self.loggers.read().contains_key(id) {
            return Err(Error::State(format!("logger `{id}` is already cached")));
        }

        let logger = Arc::new(CachedLogger::from_options(id, "", opts)?);
        self.put(id, logger.clone())?;
        Ok(logger)
    }

    pub fn put(&self, id: &str, logger: Arc<CachedLogger>) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Validation("logger id must not be empty".to_owned()));
        }

        let mut loggers = self.loggers.write();
        if loggers.contains_key(id) {
            return Err(Error::State(format!("logger `{id}` is already cached")));
        }
        logger.touch();
        loggers.insert(id.to_owned(), logger);
        Ok(())
    }

    /// Looks a logger up and marks it as recently used.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<CachedLogger>> {
        let logger = self.loggers.read().get(id).cloned()?;
        logger.touch();
        Some(logger)
    }

    pub fn remove(&self, id: &str) {
        self.loggers.write().remove(id);
    }

    /// Closes the logger's sinks, then drops it from the cache.
    pub fn close_and_remove(&self, id: &str) -> Result<()> {
        let Some(logger) = self.loggers.write().remove(id) else {
            return Ok(());
        };
        logger.close()
    }

    /// Closes and drops every logger.
    pub fn clear(&self) -> Result<()> {
        let drained: Vec<_> = self.loggers.write().drain().map(|(_, l)| l).collect();

        let mut errors = ErrorCollector::new();
        for logger in drained {
            errors.add_result(logger.close());
        }
        errors.resolve()
    }

    /// Drops every logger last used strictly before `before`.
    pub fn prune(&self, before: DateTime<Utc>) {
        let mut loggers = self.loggers.write();
        let count = loggers.len();
        loggers.retain(|_, logger| logger.accessed() >= before);
        tracing::debug!(pruned = count - loggers.len(), "pruned logging cache");
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.loggers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
