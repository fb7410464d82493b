use std::{fmt::Debug, str::FromStr, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::{
    command::Command,
    error::{Error, ErrorCollector, Result},
    logging::LoggingCache,
    options::{CreateOptions, WriteFileOptions},
    process::{Process, ProcessConstructor, ProcessInfo},
    signal::Signal,
};

mod basic;
mod builder;
mod remote;
mod self_clearing;
mod synchronized;

pub use basic::BasicManager;
pub use builder::ManagerBuilder;
pub use remote::RemoteManager;
pub use self_clearing::SelfClearingManager;
pub use synchronized::{SynchronizedManager, SynchronizedProcess};

/// Longest a single process may take to report its info while listing.
pub const INFO_TIMEOUT: Duration = Duration::from_secs(5);
/// Grace period between terminating processes and killing them on close.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// How long close waits for killed processes to be reaped.
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Selects processes by lifecycle state.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Running,
    Terminated,
    #[default]
    All,
    Failed,
    Successful,
}

impl Filter {
    #[must_use]
    pub fn matches(self, info: &ProcessInfo) -> bool {
        match self {
            Self::All => true,
            Self::Running => info.is_running,
            Self::Terminated => info.complete,
            Self::Failed => info.complete && !info.successful,
            Self::Successful => info.complete && info.successful,
        }
    }
}

impl FromStr for Filter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "running" => Ok(Self::Running),
            "terminated" => Ok(Self::Terminated),
            "all" => Ok(Self::All),
            "failed" => Ok(Self::Failed),
            "successful" => Ok(Self::Successful),
            other => Err(Error::Validation(format!("`{other}` is not a process filter"))),
        }
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Terminated => "terminated",
            Self::All => "all",
            Self::Failed => "failed",
            Self::Successful => "successful",
        };
        f.write_str(name)
    }
}

/// Creates, tracks and tears down processes.
#[async_trait::async_trait]
pub trait Manager: Send + Sync + Debug {
    fn id(&self) -> &str;

    async fn create_process(&self, opts: CreateOptions) -> Result<Arc<dyn Process>>;

    /// A command whose processes are created through this manager.
    fn create_command(self: Arc<Self>) -> Command;

    /// Adopts a process created elsewhere.
    async fn register(&self, process: Arc<dyn Process>) -> Result<()>;

    async fn list(&self, filter: Filter, cancel: &CancellationToken)
        -> Result<Vec<Arc<dyn Process>>>;

    async fn group(&self, tag: &str, cancel: &CancellationToken) -> Result<Vec<Arc<dyn Process>>>;

    async fn get(&self, id: &str) -> Result<Arc<dyn Process>>;

    /// Forgets every completed process.
    async fn clear(&self);

    /// Terminates everything still running.
    async fn close(&self, cancel: &CancellationToken) -> Result<()>;

    fn logging_cache(&self) -> Arc<LoggingCache>;

    async fn write_file(&self, opts: WriteFileOptions) -> Result<()>;
}

/// Constructor that creates processes through `manager`.
#[must_use]
pub fn manager_constructor(manager: Arc<dyn Manager>) -> ProcessConstructor {
    Arc::new(move |opts| {
        let manager = manager.clone();
        async move { manager.create_process(opts).await }.boxed()
    })
}

/// Sends `sig` to every process, skipping ones that already finished.
pub async fn signal_all(processes: &[Arc<dyn Process>], sig: Signal) -> Result<()> {
    let mut errors = ErrorCollector::new();
    for process in processes {
        match process.signal(sig).await {
            Ok(()) => {}
            Err(err) if err.is_state() => {}
            Err(err) => errors.add(err),
        }
    }
    errors.resolve()
}

/// Waits until every process completed, whatever its outcome.
pub async fn wait_all(
    processes: &[Arc<dyn Process>],
    window: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    let token = cancel.child_token();
    let waiting = async {
        for process in processes {
            // Exit status does not matter here, only completion.
            if let Err(Error::Canceled) = process.wait(&token).await {
                return Err(Error::Canceled);
            }
        }
        Ok(())
    };

    let res = tokio::time::timeout(window, waiting).await;
    token.cancel();
    match res {
        Ok(res) => res,
        Err(_) => Err(Error::State(format!(
            "processes still running after {}s",
            window.as_secs()
        ))),
    }
}

/// Terminates every process, escalating to a kill for anything that did
/// not finish within [`TERMINATE_GRACE`].
pub async fn terminate_all(processes: &[Arc<dyn Process>], cancel: &CancellationToken) -> Result<()> {
    if processes.is_empty() {
        return Ok(());
    }

    let terminated = match signal_all(processes, Signal::Terminate).await {
        Ok(()) => wait_all(processes, TERMINATE_GRACE, cancel).await,
        Err(err) => Err(err),
    };
    match terminated {
        Ok(()) => return Ok(()),
        Err(Error::Canceled) => return Err(Error::Canceled),
        Err(err) => tracing::warn!(count = processes.len(), "terminate failed, killing: {err}"),
    }

    kill_all(processes, cancel).await
}

/// Kills every process and waits for them to be reaped.
pub async fn kill_all(processes: &[Arc<dyn Process>], cancel: &CancellationToken) -> Result<()> {
    let mut errors = ErrorCollector::new();
    errors.add_result(signal_all(processes, Signal::Kill).await);
    errors.add_result(wait_all(processes, KILL_GRACE, cancel).await);
    errors.resolve()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_parse() {
        assert_eq!("running".parse::<Filter>().unwrap(), Filter::Running);
        assert_eq!(" Failed ".parse::<Filter>().unwrap(), Filter::Failed);
        assert!("sleeping".parse::<Filter>().unwrap_err().is_validation());
        assert_eq!(Filter::Successful.to_string(), "successful");
    }

    #[test]
    fn test_filter_matches() {
        let running = ProcessInfo {
            is_running: true,
            ..Default::default()
        };
        let failed = ProcessInfo {
            complete: true,
            exit_code: 1,
            ..Default::default()
        };
        let ok = ProcessInfo {
            complete: true,
            successful: true,
            exit_code: 0,
            ..Default::default()
        };

        assert!(Filter::Running.matches(&running));
        assert!(!Filter::Terminated.matches(&running));
        assert!(Filter::Failed.matches(&failed));
        assert!(!Filter::Successful.matches(&failed));
        assert!(Filter::Successful.matches(&ok));
        assert!(Filter::Terminated.matches(&ok));
        assert!([&running, &failed, &ok].iter().all(|i| Filter::All.matches(i)));
    }
}
