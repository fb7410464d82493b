use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use parking_lot::RwLock;

use crate::{
    error::{Error, Result},
    process::ProcessInfo,
    signal::Signal,
};

/// Runs once when a process completes, with its final info.
pub type ProcessTrigger = Box<dyn FnOnce(&ProcessInfo) + Send + Sync>;

/// Runs before a signal is delivered. Returning `true` means the trigger
/// handled the signal and it must not reach the OS process.
///
/// Triggers run while the process serializes its own state, so they must not
/// call back into the process they are registered on.
pub type SignalTrigger = Arc<dyn Fn(&ProcessInfo, Signal) -> bool + Send + Sync>;

/// Builds a fresh trigger for each process it is installed on.
pub type SignalTriggerFactory = Arc<dyn Fn() -> SignalTrigger + Send + Sync>;

/// ID of the built-in trigger that turns a terminate into a cooperative
/// interrupt.
pub const CLEAN_TERMINATION: &str = "clean_termination";

/// Name to factory table, so a caller holding only a string can install a
/// signal trigger.
#[derive(Default)]
pub struct SignalTriggerRegistry {
    factories: RwLock<HashMap<String, SignalTriggerFactory>>,
}

impl std::fmt::Debug for SignalTriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let factories = self.factories.read();
        let mut ids: Vec<_> = factories.keys().collect();
        ids.sort();
        f.debug_struct("SignalTriggerRegistry")
            .field("ids", &ids)
            .finish()
    }
}

impl SignalTriggerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the built-in triggers.
    #[must_use]
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry
            .factories
            .write()
            .insert(CLEAN_TERMINATION.to_owned(), Arc::new(clean_termination));
        registry
    }

    /// Process-wide registry, populated with the built-ins on first use.
    pub fn global() -> &'static SignalTriggerRegistry {
        static GLOBAL: OnceLock<SignalTriggerRegistry> = OnceLock::new();
        GLOBAL.get_or_init(Self::with_defaults)
    }

    pub fn register(&self, id: &str, factory: SignalTriggerFactory) -> Result<()> {
        if id.is_empty() {
            return Err(Error::Validation(
                "signal trigger id must not be empty".to_owned(),
            ));
        }

        let mut factories = self.factories.write();
        if factories.contains_key(id) {
            return Err(Error::Validation(format!(
                "signal trigger `{id}` is already registered"
            )));
        }
        factories.insert(id.to_owned(), factory);

        tracing::debug!(id, "registered signal trigger");
        Ok(())
    }

    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<SignalTriggerFactory> {
        self.factories.read().get(id).cloned()
    }
}

/// On the first terminate sent to a live process, interrupts it instead so it
/// can shut down on its own terms. Every later signal goes through normally.
fn clean_termination() -> SignalTrigger {
    let fired = Arc::new(AtomicBool::new(false));

    Arc::new(move |info: &ProcessInfo, sig: Signal| {
        if sig != Signal::Terminate || info.complete {
            return false;
        }
        if fired.swap(true, Ordering::SeqCst) {
            return false;
        }

        match Signal::Interrupt.send_to(info.pid) {
            Ok(()) => {
                tracing::debug!(id = %info.id, pid = info.pid, "sent clean termination");
                true
            }
            Err(err) => {
                tracing::warn!(id = %info.id, "clean termination failed: {err}");
                false
            }
        }
    })
}
