/// Monitor status on disk: one JSON document, rewritten at every state
/// transition by staging it next to the target and renaming it over.
use crate::config::MonitorConfig;
use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Monitor loop states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    /// Not started yet.
    Idle,
    /// Enumerating and evaluating matching processes.
    Checking,
    /// Waiting for the next cycle.
    Sleeping,
    /// No matching process left, or shutdown requested.
    Terminated,
}

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: MonitorState,
    pub process_name: String,
    pub kill_minutes: u32,
    pub check_minutes: u32,
    pub cycle: u64,
    pub cycle_start: Option<DateTime<Local>>,
    pub matched: usize,
    pub kills_requested: usize,
    pub last_update: DateTime<Utc>,
}

/// On-disk location of the monitor status.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Sibling of the status file that the next snapshot is staged in.
    fn staging_path(&self) -> PathBuf {
        let dir = self.path.parent().unwrap_or(Path::new("."));
        dir.join(format!(".agewatch.status.tmp.{}", std::process::id()))
    }

    /// Replace the status file with `data`. Readers see either the previous
    /// snapshot or the new one, never a half-written file.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Encode { source: e })?;

        let staged = self.staging_path();
        std::fs::write(&staged, json.as_bytes()).map_err(|e| StatusError::Stage {
            path: staged.clone(),
            source: e,
        })?;

        std::fs::rename(&staged, &self.path).map_err(|e| StatusError::Publish {
            staged,
            target: self.path.clone(),
            source: e,
        })
    }

    /// Delete the status file. Already gone is fine.
    pub fn remove(&self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(error = %e, path = %self.path.display(), "could not remove status file");
            }
        }
    }
}

/// Builds StatusData for each update. A tracker without a file is a no-op.
pub struct StatusTracker {
    file: Option<StatusFile>,
    pid: u32,
    process_name: String,
    kill_minutes: u32,
    check_minutes: u32,
    cycle: u64,
    cycle_start: Option<DateTime<Local>>,
    matched: usize,
    kills_requested: usize,
}

impl StatusTracker {
    /// Tracker writing to `status_path`, or doing nothing when it is `None`.
    pub fn new(status_path: Option<PathBuf>, config: &MonitorConfig) -> Self {
        Self {
            file: status_path.map(StatusFile::new),
            pid: std::process::id(),
            process_name: config.process_name.clone(),
            kill_minutes: config.kill_minutes,
            check_minutes: config.check_minutes,
            cycle: 0,
            cycle_start: None,
            matched: 0,
            kills_requested: 0,
        }
    }

    /// Write the status file with the given state.
    pub fn update(&self, state: MonitorState) {
        let Some(file) = &self.file else {
            return;
        };

        let data = StatusData {
            pid: self.pid,
            state,
            process_name: self.process_name.clone(),
            kill_minutes: self.kill_minutes,
            check_minutes: self.check_minutes,
            cycle: self.cycle,
            cycle_start: self.cycle_start,
            matched: self.matched,
            kills_requested: self.kills_requested,
            last_update: Utc::now(),
        };

        if let Err(e) = file.write(&data) {
            tracing::warn!(error = %e, "failed to write status file");
        }
    }

    /// Mark the start of a new cycle.
    pub fn begin_cycle(&mut self, cycle_start: DateTime<Local>) {
        self.cycle += 1;
        self.cycle_start = Some(cycle_start);
        self.matched = 0;
        self.kills_requested = 0;
    }

    /// Record what the current cycle found and did.
    pub fn set_cycle_result(&mut self, matched: usize, kills_requested: usize) {
        self.matched = matched;
        self.kills_requested = kills_requested;
    }

    /// Remove the status file.
    pub fn remove(&self) {
        if let Some(file) = &self.file {
            file.remove();
        }
    }
}

/// Failure to publish a status snapshot.
#[derive(Debug)]
pub enum StatusError {
    Encode {
        source: serde_json::Error,
    },
    Stage {
        path: PathBuf,
        source: std::io::Error,
    },
    Publish {
        staged: PathBuf,
        target: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Encode { source } => write!(f, "could not encode monitor status: {source}"),
            StatusError::Stage { path, source } => {
                write!(f, "could not stage status in {}: {source}", path.display())
            }
            StatusError::Publish {
                staged,
                target,
                source,
            } => write!(
                f,
                "could not move {} into place at {}: {source}",
                staged.display(),
                target.display()
            ),
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Encode { source } => Some(source),
            StatusError::Stage { source, .. } | StatusError::Publish { source, .. } => Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(state: MonitorState) -> StatusData {
        StatusData {
            pid: 12345,
            state,
            process_name: "notepad".to_string(),
            kill_minutes: 5,
            check_minutes: 1,
            cycle: 3,
            cycle_start: Some(Local::now()),
            matched: 2,
            kills_requested: 1,
            last_update: Utc::now(),
        }
    }

    fn read_json(path: &Path) -> serde_json::Value {
        let contents = std::fs::read_to_string(path).unwrap();
        serde_json::from_str(&contents).unwrap()
    }

    #[test]
    fn test_status_file_atomic_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agewatch.status");
        let sf = StatusFile::new(path.clone());

        sf.write(&sample(MonitorState::Sleeping)).unwrap();

        let parsed = read_json(&path);
        assert_eq!(parsed["pid"], 12345);
        assert_eq!(parsed["state"], "sleeping");
        assert_eq!(parsed["process_name"], "notepad");
        assert_eq!(parsed["kill_minutes"], 5);
        assert_eq!(parsed["check_minutes"], 1);
        assert_eq!(parsed["cycle"], 3);
        assert_eq!(parsed["matched"], 2);
        assert_eq!(parsed["kills_requested"], 1);

        assert!(!sf.staging_path().exists(), "staged copy is renamed away");
    }

    #[test]
    fn test_status_file_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agewatch.status");
        let sf = StatusFile::new(path.clone());

        sf.write(&sample(MonitorState::Idle)).unwrap();
        assert!(path.exists());

        sf.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_all_monitor_states_serialize() {
        let states = vec![
            (MonitorState::Idle, "idle"),
            (MonitorState::Checking, "checking"),
            (MonitorState::Sleeping, "sleeping"),
            (MonitorState::Terminated, "terminated"),
        ];

        for (state, expected_str) in states {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{}\"", expected_str));
        }
    }

    #[test]
    fn test_status_tracker_lifecycle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("agewatch.status");
        let config = MonitorConfig::new("sleep").with_kill_minutes(10);

        let mut tracker = StatusTracker::new(Some(path.clone()), &config);

        tracker.update(MonitorState::Idle);
        let parsed = read_json(&path);
        assert_eq!(parsed["state"], "idle");
        assert_eq!(parsed["cycle"], 0);
        assert_eq!(parsed["kill_minutes"], 10);
        assert!(parsed["cycle_start"].is_null());

        tracker.begin_cycle(Local::now());
        tracker.update(MonitorState::Checking);
        let parsed = read_json(&path);
        assert_eq!(parsed["state"], "checking");
        assert_eq!(parsed["cycle"], 1);
        assert!(parsed["cycle_start"].is_string());

        tracker.set_cycle_result(4, 2);
        tracker.update(MonitorState::Sleeping);
        let parsed = read_json(&path);
        assert_eq!(parsed["matched"], 4);
        assert_eq!(parsed["kills_requested"], 2);

        tracker.begin_cycle(Local::now());
        let parsed_before = read_json(&path);
        assert_eq!(parsed_before["cycle"], 1, "begin_cycle alone does not write");
        tracker.update(MonitorState::Terminated);
        let parsed = read_json(&path);
        assert_eq!(parsed["cycle"], 2);
        assert_eq!(parsed["matched"], 0);

        tracker.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_disabled_tracker_writes_nothing() {
        let dir = tempdir().unwrap();
        let tracker = StatusTracker::new(None, &MonitorConfig::new("sleep"));
        tracker.update(MonitorState::Checking);
        tracker.remove();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_status_file_write_to_nonexistent_dir_fails() {
        let sf = StatusFile::new(PathBuf::from("/nonexistent/dir/agewatch.status"));
        assert!(sf.write(&sample(MonitorState::Idle)).is_err());
    }

    #[test]
    fn test_status_error_display() {
        let err = StatusError::Stage {
            path: PathBuf::from("/tmp/test"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no perms"),
        };
        let msg = err.to_string();
        assert!(msg.contains("could not stage status in /tmp/test"));
        assert!(msg.contains("no perms"));
    }
}
