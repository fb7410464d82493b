#[cfg(not(unix))]
compile_error!("warden-core supervises processes through unix process groups and signals");

mod command;
mod error;
mod logging;
mod manager;
mod options;
mod process;
mod signal;
mod tracker;
mod trigger;

pub use command::{Command, PostHook, PreHook, Prerequisite, RunFunc};
pub use error::{Error, ErrorCollector, Result};
pub use logging::{CachedLogger, LoggingCache};
pub use manager::{
    kill_all, manager_constructor, signal_all, terminate_all, wait_all, BasicManager, Filter,
    Manager, ManagerBuilder, RemoteManager, SelfClearingManager, SynchronizedManager,
    SynchronizedProcess, INFO_TIMEOUT, KILL_GRACE, TERMINATE_GRACE,
};
pub use options::{
    CreateOptions, Executor, FileSink, InMemorySink, LoggerConfig, OutputOptions, OutputSink,
    ProcessImplementation, RemoteOptions, Sink, WriteFileOptions, DEFAULT_IN_MEMORY_LINES,
    LOCAL_HOST,
};
pub use process::{
    local_constructor, new_process, BasicProcess, BlockingProcess, Process, ProcessConstructor,
    ProcessInfo,
};
pub use signal::Signal;
pub use tracker::{ProcessGroupTracker, ProcessTracker};
pub use trigger::{
    ProcessTrigger, SignalTrigger, SignalTriggerFactory, SignalTriggerRegistry, CLEAN_TERMINATION,
};

/// Re-exported so callers can build the tokens every blocking call takes.
pub use tokio_util::sync::CancellationToken;
