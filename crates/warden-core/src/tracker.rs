use std::collections::BTreeSet;

use parking_lot::Mutex;

use crate::{
    error::{ErrorCollector, Result},
    process::ProcessInfo,
    signal::{group_alive, Signal},
};

/// Groups processes so they can be terminated in bulk.
///
/// Tracking is advisory: a manager ignores `add` failures, and only relies on
/// `cleanup` eventually terminating what was tracked.
pub trait ProcessTracker: Send + Sync + std::fmt::Debug {
    fn add(&self, info: &ProcessInfo) -> Result<()>;

    /// Called once the process has completed.
    fn remove(&self, info: &ProcessInfo);

    fn cleanup(&self) -> Result<()>;
}

/// Tracks the process group every process is started in and kills whole
/// groups on cleanup, which also reaches grandchildren.
#[derive(Debug, Default)]
pub struct ProcessGroupTracker {
    groups: Mutex<BTreeSet<i32>>,
}

impl ProcessGroupTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcessTracker for ProcessGroupTracker {
    fn add(&self, info: &ProcessInfo) -> Result<()> {
        // Remote processes live in a group on another host.
        if info.pid <= 0 || info.options.remote.is_some() {
            return Ok(());
        }
        self.groups.lock().insert(info.pid);
        Ok(())
    }

    fn remove(&self, info: &ProcessInfo) {
        // Orphans may still hold the group; keep it for cleanup.
        if group_alive(info.pid) {
            tracing::debug!(pgid = info.pid, "process group outlived its leader");
            return;
        }
        self.groups.lock().remove(&info.pid);
    }

    fn cleanup(&self) -> Result<()> {
        let groups = std::mem::take(&mut *self.groups.lock());

        let mut errors = ErrorCollector::new();
        for pgid in groups {
            match Signal::Kill.send_to_group(pgid) {
                Ok(()) => tracing::debug!(pgid, "killed process group"),
                // The group is already gone.
                Err(crate::Error::Io(err)) if err.raw_os_error() == Some(libc::ESRCH) => {}
                Err(err) => errors.add(err),
            }
        }
        errors.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_skips_untrackable() {
        let tracker = ProcessGroupTracker::new();
        tracker.add(&ProcessInfo::default()).unwrap();
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_cleanup_ignores_vanished_groups() {
        let tracker = ProcessGroupTracker::new();
        tracker
            .add(&ProcessInfo {
                pid: i32::MAX - 1,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(tracker.len(), 1);

        tracker.cleanup().unwrap();
        assert!(tracker.is_empty());
        tracker.cleanup().unwrap();
    }

    #[test]
    fn test_remove_forgets_finished_group() {
        let tracker = ProcessGroupTracker::new();
        let info = ProcessInfo {
            pid: i32::MAX - 1,
            ..Default::default()
        };
        tracker.add(&info).unwrap();
        tracker.remove(&info);
        assert!(tracker.is_empty());
    }
}
