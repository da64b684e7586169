/// Age-based process monitor.
///
/// Each cycle enumerates every process named `config.process_name`, computes
/// its age against a single timestamp taken at the start of the cycle, and
/// sends SIGKILL to anything older than `config.kill_minutes`. Then it sleeps
/// `config.check_minutes` and starts over. The loop ends on its own when no
/// matching process is left, or earlier when shutdown is requested.
use crate::config::MonitorConfig;
use crate::process::{ProcessSnapshot, ProcessTable, TerminateError};
use crate::status::{MonitorState, StatusTracker};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::watch;

/// Kill decision for one process in one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub pid: u32,
    pub name: String,
    pub age_minutes: f64,
    /// Older than the kill threshold.
    pub overdue: bool,
}

/// What a single cycle saw and did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleReport {
    /// No matching process was running.
    NoTargets,
    /// The process table could not be read; nothing was evaluated.
    EnumerationFailed,
    Checked {
        matched: usize,
        kills_requested: usize,
        kills_failed: usize,
    },
}

/// Why `Monitor::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every matching process is gone.
    NoTargets { cycles: u64 },
    /// Shutdown signal or stop file.
    Cancelled { cycles: u64 },
}

/// Elapsed minutes between `start_time` and `cycle_start`.
pub fn age_minutes(cycle_start: DateTime<Local>, start_time: DateTime<Local>) -> f64 {
    (cycle_start - start_time).num_milliseconds() as f64 / 60_000.0
}

/// Decide which processes are overdue. A process is overdue when its age is
/// strictly greater than `kill_minutes`.
pub fn evaluate(
    cycle_start: DateTime<Local>,
    processes: &[ProcessSnapshot],
    kill_minutes: u32,
) -> Vec<Verdict> {
    processes
        .iter()
        .map(|p| {
            let age = age_minutes(cycle_start, p.start_time);
            Verdict {
                pid: p.pid,
                name: p.name.clone(),
                age_minutes: age,
                overdue: age > f64::from(kill_minutes),
            }
        })
        .collect()
}

pub struct Monitor<T: ProcessTable> {
    config: MonitorConfig,
    table: T,
    status: StatusTracker,
    stop_file: Option<PathBuf>,
    max_kill_failures: u32,
    /// Consecutive failed kills per pid, across cycles.
    kill_failures: HashMap<u32, u32>,
    state: MonitorState,
}

impl<T: ProcessTable> Monitor<T> {
    pub fn new(config: MonitorConfig, table: T) -> Self {
        let status = StatusTracker::new(None, &config);
        Self {
            config,
            table,
            status,
            stop_file: None,
            max_kill_failures: 3,
            kill_failures: HashMap::new(),
            state: MonitorState::Idle,
        }
    }

    pub fn with_status(mut self, status: StatusTracker) -> Self {
        self.status = status;
        self
    }

    /// Stop at the top of a cycle once this file exists.
    pub fn with_stop_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stop_file = Some(path.into());
        self
    }

    /// Consecutive kill failures for one pid before the failure is logged as an error.
    pub fn with_max_kill_failures(mut self, max: u32) -> Self {
        self.max_kill_failures = max.max(1);
        self
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    #[cfg(test)]
    pub fn consecutive_kill_failures(&self, pid: u32) -> u32 {
        self.kill_failures.get(&pid).copied().unwrap_or(0)
    }

    /// Remove the status file, if any. Call once the monitor is done.
    pub fn close(&self) {
        self.status.remove();
    }

    fn transition(&mut self, state: MonitorState) {
        tracing::debug!(from = ?self.state, to = ?state, "monitor state change");
        self.state = state;
        self.status.update(state);
    }

    fn stop_file_present(&self) -> bool {
        self.stop_file.as_ref().is_some_and(|p| p.exists())
    }

    /// Run cycles until no target is left or `shutdown` flips to `true`.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> RunOutcome {
        let interval = Duration::from_secs(u64::from(self.config.check_minutes) * 60);
        let mut cycles = 0u64;

        tracing::info!(
            name = %self.config.process_name,
            kill_minutes = self.config.kill_minutes,
            check_minutes = self.config.check_minutes,
            "monitor starting"
        );

        let outcome = loop {
            if *shutdown.borrow() {
                tracing::info!("shutdown requested, stopping monitor");
                break RunOutcome::Cancelled { cycles };
            }
            if self.stop_file_present() {
                tracing::info!(
                    stop_file = ?self.stop_file,
                    "stop file present, stopping monitor"
                );
                break RunOutcome::Cancelled { cycles };
            }

            cycles += 1;
            if self.run_once() == CycleReport::NoTargets {
                break RunOutcome::NoTargets { cycles };
            }

            self.transition(MonitorState::Sleeping);
            tracing::info!(minutes = self.config.check_minutes, "waiting for next check");
            if interval.is_zero() {
                tokio::task::yield_now().await;
            } else if sleep_or_shutdown(interval, &mut shutdown).await {
                tracing::info!("shutdown requested during sleep, stopping monitor");
                break RunOutcome::Cancelled { cycles };
            }
        };

        if self.state != MonitorState::Terminated {
            self.transition(MonitorState::Terminated);
        }
        outcome
    }

    /// Run one enumerate-evaluate-kill pass without sleeping.
    pub fn run_once(&mut self) -> CycleReport {
        let cycle_start = Local::now();
        self.status.begin_cycle(cycle_start);
        self.transition(MonitorState::Checking);

        let name = self.config.process_name.clone();
        let processes = match self.table.processes_named(&name) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, name = %name, "failed to enumerate processes");
                return CycleReport::EnumerationFailed;
            }
        };

        if processes.is_empty() {
            tracing::info!(name = %name, "no such processes alive");
            self.kill_failures.clear();
            self.transition(MonitorState::Terminated);
            return CycleReport::NoTargets;
        }

        let mut kills_requested = 0;
        let mut kills_failed = 0;
        for verdict in evaluate(cycle_start, &processes, self.config.kill_minutes) {
            tracing::info!(
                name = %verdict.name,
                pid = verdict.pid,
                age_minutes = %format!("{:.2}", verdict.age_minutes),
                "process alive"
            );
            if !verdict.overdue {
                continue;
            }

            kills_requested += 1;
            tracing::info!(
                pid = verdict.pid,
                kill_minutes = self.config.kill_minutes,
                "age exceeds kill threshold, requesting termination"
            );
            match self.table.terminate(verdict.pid) {
                Ok(()) => {
                    self.kill_failures.remove(&verdict.pid);
                    // SIGKILL was sent; the process may not have exited yet
                    tracing::info!(pid = verdict.pid, "kill signal delivered");
                }
                Err(e) => {
                    kills_failed += 1;
                    self.record_kill_failure(verdict.pid, &e);
                }
            }
        }

        // forget pids that are gone
        self.kill_failures
            .retain(|pid, _| processes.iter().any(|p| p.pid == *pid));

        self.status.set_cycle_result(processes.len(), kills_requested);
        CycleReport::Checked {
            matched: processes.len(),
            kills_requested,
            kills_failed,
        }
    }

    fn record_kill_failure(&mut self, pid: u32, error: &TerminateError) {
        let count = self.kill_failures.entry(pid).or_insert(0);
        *count += 1;
        if *count >= self.max_kill_failures {
            tracing::error!(
                pid,
                consecutive_failures = *count,
                error = %error,
                "process keeps surviving termination requests"
            );
        } else {
            tracing::warn!(pid, error = %error, "termination failed");
        }
    }
}

/// Sleep for `duration`. Returns `true` if shutdown was requested first.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) if *shutdown.borrow() => return true,
                Ok(()) => continue,
                Err(_) => {
                    // sender dropped, nobody can cancel any more
                    (&mut sleep).await;
                    return false;
                }
            },
        }
    }
}
