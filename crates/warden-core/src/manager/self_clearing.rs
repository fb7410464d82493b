use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    command::Command,
    error::{Error, Result},
    logging::LoggingCache,
    manager::{BasicManager, Filter, Manager},
    options::{CreateOptions, WriteFileOptions},
    process::Process,
};

/// Bounds how many processes a [`BasicManager`] holds. When full it clears
/// completed processes once before refusing new ones.
#[derive(Debug)]
pub struct SelfClearingManager {
    base: BasicManager,
    max_procs: usize,
}

impl SelfClearingManager {
    pub fn new(base: BasicManager, max_procs: usize) -> Result<Self> {
        if max_procs == 0 {
            return Err(Error::Validation("max_procs must be greater than zero".to_owned()));
        }
        Ok(Self { base, max_procs })
    }

    #[must_use]
    pub fn max_procs(&self) -> usize {
        self.max_procs
    }

    async fn check_capacity(&self) -> Result<()> {
        if self.base.len() < self.max_procs {
            return Ok(());
        }

        self.base.clear().await;
        if self.base.len() < self.max_procs {
            return Ok(());
        }

        tracing::debug!(manager = %self.base.id(), limit = self.max_procs, "manager is full");
        Err(Error::Capacity {
            limit: self.max_procs,
        })
    }
}

#[async_trait::async_trait]
impl Manager for SelfClearingManager {
    fn id(&self) -> &str {
        self.base.id()
    }

    async fn create_process(&self, opts: CreateOptions) -> Result<Arc<dyn Process>> {
        self.check_capacity().await?;
        self.base.create_process(opts).await
    }

    fn create_command(self: Arc<Self>) -> Command {
        Command::with_manager(self)
    }

    async fn register(&self, process: Arc<dyn Process>) -> Result<()> {
        self.check_capacity().await?;
        self.base.register(process).await
    }

    async fn list(
        &self,
        filter: Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<dyn Process>>> {
        self.base.list(filter, cancel).await
    }

    async fn group(&self, tag: &str, cancel: &CancellationToken) -> Result<Vec<Arc<dyn Process>>> {
        self.base.group(tag, cancel).await
    }

    async fn get(&self, id: &str) -> Result<Arc<dyn Process>> {
        self.base.get(id).await
    }

    async fn clear(&self) {
        self.base.clear().await;
    }

    async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        self.base.close(cancel).await
    }

    fn logging_cache(&self) -> Arc<LoggingCache> {
        self.base.logging_cache()
    }

    async fn write_file(&self, opts: WriteFileOptions) -> Result<()> {
        self.base.write_file(opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(SelfClearingManager::new(BasicManager::new(), 0)
            .unwrap_err()
            .is_validation());
    }

    #[tokio::test]
    async fn test_clears_before_refusing() {
        let manager = SelfClearingManager::new(BasicManager::new(), 2).unwrap();
        let cancel = CancellationToken::new();

        let first = manager
            .create_process(CreateOptions::new(["true"]))
            .await
            .unwrap();
        first.wait(&cancel).await.unwrap();
        manager
            .create_process(CreateOptions::new(["sleep", "10"]))
            .await
            .unwrap();

        // The completed process makes room.
        manager
            .create_process(CreateOptions::new(["sleep", "10"]))
            .await
            .unwrap();

        let err = manager
            .create_process(CreateOptions::new(["sleep", "10"]))
            .await
            .unwrap_err();
        assert!(err.is_capacity());
        assert_eq!(manager.list(Filter::Running, &cancel).await.unwrap().len(), 2);

        manager.close(&cancel).await.unwrap();
    }
}
