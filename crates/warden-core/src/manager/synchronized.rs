use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::{
    command::Command,
    error::Result,
    logging::LoggingCache,
    manager::{Filter, Manager},
    options::{CreateOptions, WriteFileOptions},
    process::{Process, ProcessInfo},
    signal::Signal,
    trigger::{ProcessTrigger, SignalTrigger},
};

/// Serializes every call into the wrapped manager. Processes it hands out
/// are wrapped the same way.
#[derive(Debug)]
pub struct SynchronizedManager {
    inner: Arc<dyn Manager>,
    lock: RwLock<()>,
}

impl SynchronizedManager {
    #[must_use]
    pub fn new(inner: Arc<dyn Manager>) -> Self {
        Self {
            inner,
            lock: RwLock::new(()),
        }
    }
}

fn wrap_all(processes: Vec<Arc<dyn Process>>) -> Vec<Arc<dyn Process>> {
    processes.into_iter().map(SynchronizedProcess::wrap).collect()
}

#[async_trait::async_trait]
impl Manager for SynchronizedManager {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn create_process(&self, opts: CreateOptions) -> Result<Arc<dyn Process>> {
        let _guard = self.lock.write().await;
        let process = self.inner.create_process(opts).await?;
        Ok(SynchronizedProcess::wrap(process))
    }

    fn create_command(self: Arc<Self>) -> Command {
        Command::with_manager(self)
    }

    async fn register(&self, process: Arc<dyn Process>) -> Result<()> {
        let _guard = self.lock.write().await;
        self.inner.register(process).await
    }

    async fn list(
        &self,
        filter: Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<dyn Process>>> {
        let _guard = self.lock.read().await;
        self.inner.list(filter, cancel).await.map(wrap_all)
    }

    async fn group(&self, tag: &str, cancel: &CancellationToken) -> Result<Vec<Arc<dyn Process>>> {
        let _guard = self.lock.read().await;
        self.inner.group(tag, cancel).await.map(wrap_all)
    }

    async fn get(&self, id: &str) -> Result<Arc<dyn Process>> {
        let _guard = self.lock.read().await;
        self.inner.get(id).await.map(SynchronizedProcess::wrap)
    }

    async fn clear(&self) {
        let _guard = self.lock.write().await;
        self.inner.clear().await;
    }

    async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        let _guard = self.lock.write().await;
        self.inner.close(cancel).await
    }

    fn logging_cache(&self) -> Arc<LoggingCache> {
        self.inner.logging_cache()
    }

    async fn write_file(&self, opts: WriteFileOptions) -> Result<()> {
        let _guard = self.lock.write().await;
        self.inner.write_file(opts).await
    }
}

/// Serializes calls into one process.
///
/// `wait` does not take the lock, so a caller blocked on completion never
/// holds up a signal that would end it.
#[derive(Debug)]
pub struct SynchronizedProcess {
    inner: Arc<dyn Process>,
    lock: Mutex<()>,
}

impl SynchronizedProcess {
    #[must_use]
    pub fn new(inner: Arc<dyn Process>) -> Self {
        Self {
            inner,
            lock: Mutex::new(()),
        }
    }

    fn wrap(inner: Arc<dyn Process>) -> Arc<dyn Process> {
        Arc::new(Self::new(inner))
    }
}

#[async_trait::async_trait]
impl Process for SynchronizedProcess {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn info(&self) -> ProcessInfo {
        let _guard = self.lock.lock().await;
        self.inner.info().await
    }

    async fn running(&self) -> bool {
        let _guard = self.lock.lock().await;
        self.inner.running().await
    }

    async fn complete(&self) -> bool {
        let _guard = self.lock.lock().await;
        self.inner.complete().await
    }

    async fn signal(&self, sig: Signal) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.inner.signal(sig).await
    }

    async fn wait(&self, cancel: &CancellationToken) -> Result<i32> {
        self.inner.wait(cancel).await
    }

    async fn respawn(&self) -> Result<Arc<dyn Process>> {
        let _guard = self.lock.lock().await;
        self.inner.respawn().await.map(Self::wrap)
    }

    async fn register_trigger(&self, trigger: ProcessTrigger) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.inner.register_trigger(trigger).await
    }

    async fn register_signal_trigger(&self, trigger: SignalTrigger) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.inner.register_signal_trigger(trigger).await
    }

    async fn tag(&self, tag: &str) {
        let _guard = self.lock.lock().await;
        self.inner.tag(tag).await;
    }

    async fn get_tags(&self) -> Vec<String> {
        let _guard = self.lock.lock().await;
        self.inner.get_tags().await
    }

    async fn reset_tags(&self) {
        let _guard = self.lock.lock().await;
        self.inner.reset_tags().await;
    }
}

#[cfg(test)]
mod tests {
    use crate::manager::BasicManager;

    use super::*;

    #[tokio::test]
    async fn test_concurrent_use() {
        let manager = Arc::new(SynchronizedManager::new(Arc::new(BasicManager::new())));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for i in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let process = manager
                    .create_process(CreateOptions::new(["true"]))
                    .await
                    .unwrap();
                process.tag(&format!("batch-{}", i % 2)).await;
                process.wait(&CancellationToken::new()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(manager.list(Filter::All, &cancel).await.unwrap().len(), 8);
        assert_eq!(manager.group("batch-0", &cancel).await.unwrap().len(), 4);
        assert_eq!(
            manager.list(Filter::Successful, &cancel).await.unwrap().len(),
            8
        );
    }

    #[tokio::test]
    async fn test_wait_does_not_block_signal() {
        let manager = SynchronizedManager::new(Arc::new(BasicManager::new()));
        let process = manager
            .create_process(CreateOptions::new(["sleep", "10"]))
            .await
            .unwrap();

        let waiter = {
            let process = process.clone();
            tokio::spawn(async move { process.wait(&CancellationToken::new()).await })
        };
        tokio::task::yield_now().await;

        process.signal(Signal::Kill).await.unwrap();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err.exit_code(), libc::SIGKILL);
    }
}
