//! Process table access through `sysinfo`.

use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::error::MonitorError;
use crate::session::{same_process, ProcessProbe};

/// [`ProcessProbe`] over the live process table
pub struct SysinfoProbe {
    system: System,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }

    /// Re-read the whole process table
    pub fn refresh(&mut self) {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
    }

    /// Executable name of `pid` as of the last refresh
    pub fn name_of(&self, pid: u32) -> Option<String> {
        self.system
            .process(Pid::from_u32(pid))
            .map(|p| p.name().to_string_lossy().into_owned())
    }
}

impl ProcessProbe for SysinfoProbe {
    fn is_running(&mut self, process_name: &str) -> Result<bool, MonitorError> {
        self.refresh();

        let processes = self.system.processes();
        if processes.is_empty() {
            return Err(MonitorError::ProcessLookupFailed("process table is empty".to_string()));
        }

        Ok(processes
            .values()
            .any(|p| same_process(&p.name().to_string_lossy(), process_name)))
    }
}

/// Whether a process with this PID exists
pub fn is_pid_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

/// Forcefully terminate a process; `false` if it could not be signalled
pub fn terminate_pid(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.kill()).unwrap_or(false)
}
