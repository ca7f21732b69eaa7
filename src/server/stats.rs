//! Runtime statistics of supervised servers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Mutex;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Resource usage and activity of a running server
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    pub cpu_percent: f32,
    pub memory_megabytes: u64,
    pub uptime_seconds: u64,
    pub player_count: u32,
}

/// CPU and memory of one OS process; zero when unavailable
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProcessSample {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

/// Source of OS process metrics
pub trait StatsSampler: Send + Sync {
    /// Samples `pid`. Must return zeros, not fail, when metrics are missing.
    fn sample(&self, pid: u32) -> ProcessSample;
}

/// Samples processes through `sysinfo`
pub struct SysinfoSampler {
    system: Mutex<System>,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsSampler for SysinfoSampler {
    fn sample(&self, pid: u32) -> ProcessSample {
        let Ok(mut system) = self.system.lock() else {
            return ProcessSample::default();
        };

        let pid = Pid::from_u32(pid);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        match system.process(pid) {
            Some(process) => ProcessSample {
                cpu_percent: process.cpu_usage(),
                memory_bytes: process.memory(),
            },
            None => ProcessSample::default(),
        }
    }
}

/// Estimates who is online from join/leave lines in the server log
#[derive(Debug, Default)]
pub struct PlayerTracker {
    online: BTreeSet<String>,
}

impl PlayerTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Updates the online set from one log line
    pub fn observe(&mut self, line: &str) {
        if let Some(name) = Self::player_before(line, " joined the game") {
            self.online.insert(name);
        } else if let Some(name) = Self::player_before(line, " left the game") {
            self.online.remove(&name);
        }
    }

    pub fn count(&self) -> u32 {
        self.online.len() as u32
    }

    pub fn clear(&mut self) {
        self.online.clear();
    }

    // "[12:00:00 INFO]: Steve joined the game" -> "Steve"
    fn player_before(line: &str, suffix: &str) -> Option<String> {
        let head = line.trim_end().strip_suffix(suffix)?;
        let name = head.rsplit(|c: char| c.is_whitespace()).next()?;
        let name = name.trim_start_matches(':');
        if name.is_empty() {
            None
        } else {
            Some(name.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_counts_joins_and_leaves() {
        let mut tracker = PlayerTracker::new();
        tracker.observe("[12:00:00 INFO]: Steve joined the game");
        tracker.observe("[12:00:01 INFO]: Alex joined the game");
        tracker.observe("[12:00:02 INFO]: Steve joined the game");
        assert_eq!(tracker.count(), 2);

        tracker.observe("[12:05:00 INFO]: Steve left the game");
        assert_eq!(tracker.count(), 1);

        tracker.observe("[12:05:01 INFO]: <Alex> I left the game open");
        assert_eq!(tracker.count(), 1);
    }

    #[test]
    fn test_tracker_ignores_unrelated_lines() {
        let mut tracker = PlayerTracker::new();
        tracker.observe(r#"[12:00:00 INFO]: Done (2.1s)! For help, type "help""#);
        tracker.observe(" joined the game");
        assert_eq!(tracker.count(), 0);
    }

    #[test]
    fn test_sampler_returns_zero_for_unknown_pid() {
        let sampler = SysinfoSampler::new();
        assert_eq!(sampler.sample(u32::MAX - 1), ProcessSample::default());
    }
}
