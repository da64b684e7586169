/// Process table access: enumerate live processes by name and send SIGKILL.
///
/// The monitor only talks to the `ProcessTable` trait so the kill decision can be
/// exercised against a synthetic table in tests. `ProcFs` is the Linux
/// implementation backed by `/proc`.
use chrono::{DateTime, Local};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};

/// Length the kernel truncates `comm` to (TASK_COMM_LEN minus the NUL).
const COMM_LEN: usize = 15;

/// Fallback when sysconf cannot report the clock tick rate.
const DEFAULT_CLK_TCK: u64 = 100;

/// One matching process as seen at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pub pid: u32,
    pub name: String,
    pub start_time: DateTime<Local>,
}

/// Failure to deliver a termination signal.
#[derive(Debug)]
pub enum TerminateError {
    Signal { pid: u32, source: Errno },
}

impl std::fmt::Display for TerminateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminateError::Signal { pid, source } => {
                write!(f, "failed to send SIGKILL to pid {}: {}", pid, source)
            }
        }
    }
}

impl std::error::Error for TerminateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TerminateError::Signal { source, .. } => Some(source),
        }
    }
}

/// Live view of the operating system's processes.
pub trait ProcessTable {
    /// All running processes whose name equals `name`. No caching.
    fn processes_named(&self, name: &str) -> std::io::Result<Vec<ProcessSnapshot>>;

    /// Request forceful termination of `pid`. Returns once the signal is sent;
    /// the process may still be alive at that point.
    fn terminate(&self, pid: u32) -> Result<(), TerminateError>;
}

impl<T: ProcessTable + ?Sized> ProcessTable for &T {
    fn processes_named(&self, name: &str) -> std::io::Result<Vec<ProcessSnapshot>> {
        (**self).processes_named(name)
    }

    fn terminate(&self, pid: u32) -> Result<(), TerminateError> {
        (**self).terminate(pid)
    }
}

/// `/proc`-backed process table.
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
    clk_tck: u64,
}

impl ProcFs {
    /// Process table rooted at the real `/proc`.
    pub fn new() -> Self {
        Self::with_root("/proc", system_clk_tck())
    }

    /// Process table rooted at an arbitrary directory laid out like `/proc`.
    pub fn with_root(root: impl Into<PathBuf>, clk_tck: u64) -> Self {
        Self {
            root: root.into(),
            clk_tck: clk_tck.max(1),
        }
    }

    /// Boot time in seconds since the epoch, from the `btime` line of `stat`.
    fn boot_time(&self) -> std::io::Result<i64> {
        let path = self.root.join("stat");
        let contents = std::fs::read_to_string(&path)?;
        parse_btime(&contents).ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("no btime line in {}", path.display()),
            )
        })
    }

    /// Read one `/proc/<pid>` entry. `None` if it is not `name` or vanished mid-read.
    fn snapshot(&self, pid_dir: &Path, pid: u32, name: &str, boot_secs: i64) -> Option<ProcessSnapshot> {
        let comm = std::fs::read_to_string(pid_dir.join("comm")).ok()?;
        let comm = comm.trim_end_matches('\n');
        if !self.name_matches(pid_dir, comm, name) {
            return None;
        }

        let stat = match std::fs::read_to_string(pid_dir.join("stat")) {
            Ok(s) => s,
            Err(e) => {
                tracing::debug!(pid, error = %e, "process vanished during scan");
                return None;
            }
        };
        let ticks = parse_start_ticks(&stat)?;
        let start_ms = boot_secs
            .saturating_mul(1000)
            .saturating_add((ticks.saturating_mul(1000) / self.clk_tck) as i64);
        let start_time = DateTime::from_timestamp_millis(start_ms)?.with_timezone(&Local);

        Some(ProcessSnapshot {
            pid,
            name: name.to_string(),
            start_time,
        })
    }

    /// `comm` is truncated by the kernel, so long names fall back to argv[0].
    fn name_matches(&self, pid_dir: &Path, comm: &str, name: &str) -> bool {
        if comm == name {
            return true;
        }
        if name.len() <= COMM_LEN || comm.len() != COMM_LEN || !name.starts_with(comm) {
            return false;
        }
        std::fs::read(pid_dir.join("cmdline"))
            .ok()
            .and_then(|raw| argv0_basename(&raw))
            .is_some_and(|argv0| argv0 == name)
    }
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessTable for ProcFs {
    fn processes_named(&self, name: &str) -> std::io::Result<Vec<ProcessSnapshot>> {
        let boot_secs = self.boot_time()?;
        let mut found = Vec::new();

        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            if let Some(snapshot) = self.snapshot(&entry.path(), pid, name, boot_secs) {
                found.push(snapshot);
            }
        }

        found.sort_by_key(|p| p.pid);
        Ok(found)
    }

    fn terminate(&self, pid: u32) -> Result<(), TerminateError> {
        let raw = i32::try_from(pid).map_err(|_| TerminateError::Signal {
            pid,
            source: Errno::EINVAL,
        })?;
        kill(Pid::from_raw(raw), Signal::SIGKILL).map_err(|e| TerminateError::Signal { pid, source: e })
    }
}

fn system_clk_tck() -> u64 {
    match nix::unistd::sysconf(nix::unistd::SysconfVar::CLK_TCK) {
        Ok(Some(hz)) if hz > 0 => hz as u64,
        _ => DEFAULT_CLK_TCK,
    }
}

/// Extract `btime` (seconds since the epoch) from `/proc/stat`.
fn parse_btime(stat: &str) -> Option<i64> {
    stat.lines()
        .find_map(|line| line.strip_prefix("btime "))
        .and_then(|v| v.trim().parse().ok())
}

/// Extract the start time (field 22, clock ticks since boot) from `/proc/<pid>/stat`.
///
/// The command name in field 2 is wrapped in parentheses and may itself contain
/// spaces or parentheses, so fields are counted from the last `)`.
fn parse_start_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    // rest starts at field 3 (state)
    rest.split_whitespace().nth(22 - 3)?.parse().ok()
}

/// Basename of the first NUL-separated element of `/proc/<pid>/cmdline`.
fn argv0_basename(cmdline: &[u8]) -> Option<String> {
    let argv0 = cmdline.split(|b| *b == 0).next()?;
    let argv0 = std::str::from_utf8(argv0).ok()?;
    let base = Path::new(argv0).file_name()?.to_str()?;
    Some(base.to_string())
}
