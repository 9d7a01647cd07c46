//! Per-worker-process resource sampling (§4.3 "supervisor tracks CPU and
//! memory per worker"), grounded on the teacher pack's `sysinfo`-based
//! health checks (`system_monitor.rs`'s `CpuUsageCheck`/`MemoryUsageCheck`),
//! narrowed from whole-system stats to a single PID.

use sysinfo::{Pid, System};

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStats {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
    /// Seconds since the Unix epoch the process started (`sysinfo`'s
    /// `Process::start_time`), surfaced as `create_time` in the status
    /// snapshot (§6.3).
    pub create_time: u64,
}

pub struct ResourceSampler {
    system: System,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self { system: System::new() }
    }

    /// Refresh and read back stats for one worker's OS process. Returns
    /// `None` if the process is no longer running (already exited/reaped).
    pub fn sample(&mut self, pid: u32) -> Option<ProcessStats> {
        let pid = Pid::from(pid as usize);
        self.system.refresh_process(pid);
        self.system.process(pid).map(|p| ProcessStats {
            cpu_percent: p.cpu_usage(),
            memory_bytes: p.memory(),
            create_time: p.start_time(),
        })
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}
