//! Heap probe backed by the demo process's own memory use.

use fos_page::{HeapProbe, HeapSnapshot};
use std::cell::RefCell;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind, System};

/// Reports this process's RSS against total system memory.
pub struct ProcessHeapProbe {
    system: RefCell<System>,
    pid: Pid,
}

impl ProcessHeapProbe {
    pub fn new() -> Self {
        Self {
            system: RefCell::new(System::new_with_specifics(RefreshKind::everything())),
            pid: Pid::from_u32(std::process::id()),
        }
    }
}

impl Default for ProcessHeapProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapProbe for ProcessHeapProbe {
    fn sample(&self) -> Option<HeapSnapshot> {
        let mut system = self.system.borrow_mut();
        system.refresh_memory();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        let rss = system.process(self.pid)?.memory();
        Some(HeapSnapshot::new(rss, system.total_memory()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_samples_own_process() {
        let snapshot = ProcessHeapProbe::default().sample().unwrap();
        assert!(snapshot.used > 0);
        assert!(snapshot.total >= snapshot.used);
    }
}
