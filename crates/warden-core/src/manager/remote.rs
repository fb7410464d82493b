use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    command::Command,
    error::Result,
    logging::LoggingCache,
    manager::{Filter, Manager},
    options::{CreateOptions, RemoteOptions, WriteFileOptions},
    process::Process,
};

/// Runs every process it creates on one remote host, whatever the request
/// says.
#[derive(Debug)]
pub struct RemoteManager {
    inner: Arc<dyn Manager>,
    remote: RemoteOptions,
}

impl RemoteManager {
    pub fn new(inner: Arc<dyn Manager>, remote: RemoteOptions) -> Result<Self> {
        remote.validate()?;
        Ok(Self { inner, remote })
    }

    #[must_use]
    pub fn remote(&self) -> &RemoteOptions {
        &self.remote
    }
}

#[async_trait::async_trait]
impl Manager for RemoteManager {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn create_process(&self, mut opts: CreateOptions) -> Result<Arc<dyn Process>> {
        opts.remote = Some(self.remote.clone());
        self.inner.create_process(opts).await
    }

    fn create_command(self: Arc<Self>) -> Command {
        let remote = self.remote.clone();
        Command::with_manager(self).remote(remote)
    }

    async fn register(&self, process: Arc<dyn Process>) -> Result<()> {
        self.inner.register(process).await
    }

    async fn list(
        &self,
        filter: Filter,
        cancel: &CancellationToken,
    ) -> Result<Vec<Arc<dyn Process>>> {
        self.inner.list(filter, cancel).await
    }

    async fn group(&self, tag: &str, cancel: &CancellationToken) -> Result<Vec<Arc<dyn Process>>> {
        self.inner.group(tag, cancel).await
    }

    async fn get(&self, id: &str) -> Result<Arc<dyn Process>> {
        self.inner.get(id).await
    }

    async fn clear(&self) {
        self.inner.clear().await;
    }

    async fn close(&self, cancel: &CancellationToken) -> Result<()> {
        self.inner.close(cancel).await
    }

    fn logging_cache(&self) -> Arc<LoggingCache> {
        self.inner.logging_cache()
    }

    async fn write_file(&self, opts: WriteFileOptions) -> Result<()> {
        self.inner.write_file(opts).await
    }
}

#[cfg(test)]
mod tests {
    use crate::{manager::BasicManager, options::Executor};

    use super::*;

    #[tokio::test]
    async fn test_forces_remote_target() {
        // Swap ssh for echo so the wrapped command line becomes the output.
        let echo = Executor::new(|mut argv| {
            argv[0] = "echo".to_owned();
            Ok(argv)
        });
        let base = BasicManager::new().with_executor(echo);
        let manager = RemoteManager::new(Arc::new(base), RemoteOptions::new("build-box")).unwrap();

        let mut opts = CreateOptions::new(["uname", "-a"]);
        opts.remote = Some(RemoteOptions::new("elsewhere"));
        let process = manager.create_process(opts).await.unwrap();

        let info = process.info().await;
        assert_eq!(info.host, "build-box");
        assert_eq!(manager.remote().host, "build-box");
        process.wait(&CancellationToken::new()).await.unwrap();
    }

    #[test]
    fn test_rejects_invalid_remote() {
        let base: Arc<dyn Manager> = Arc::new(BasicManager::new());
        assert!(RemoteManager::new(base, RemoteOptions::new("")).is_err());
    }
}
