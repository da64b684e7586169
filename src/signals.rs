/// Signal handling for shutdown.
///
/// SIGINT (Ctrl-C) and SIGTERM set the shutdown flag; the monitor checks it at
/// the top of every cycle and while sleeping.
/// Second SIGINT within 3s: remove the status file and exit immediately with
/// status 130.
use crate::status::StatusFile;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;

/// Window in which a second Ctrl-C forces an immediate exit.
const DOUBLE_INTERRUPT_WINDOW: Duration = Duration::from_secs(3);

/// Exit status used for a forced exit after a double Ctrl-C.
const FORCED_EXIT_CODE: i32 = 130;

pub struct SignalHandler {
    shutdown: watch::Receiver<bool>,
}

impl SignalHandler {
    /// Register SIGINT/SIGTERM listeners. Must be called inside a tokio runtime.
    /// `status_file` is cleaned up on a forced exit, which skips normal teardown.
    pub fn install(status_file: Option<PathBuf>) -> std::io::Result<SignalHandler> {
        let mut interrupt = signal(SignalKind::interrupt())?;
        let mut terminate = signal(SignalKind::terminate())?;
        let (tx, rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut last_interrupt: Option<Instant> = None;
            loop {
                tokio::select! {
                    Some(()) = interrupt.recv() => {
                        let now = Instant::now();
                        if is_double_interrupt(last_interrupt, now) {
                            tracing::warn!("second interrupt, exiting immediately");
                            discard_status(status_file.as_deref());
                            std::process::exit(FORCED_EXIT_CODE);
                        }
                        last_interrupt = Some(now);
                        tracing::info!("interrupt received, stopping after the current check (Ctrl-C again to force)");
                        let _ = tx.send(true);
                    }
                    Some(()) = terminate.recv() => {
                        tracing::info!("SIGTERM received, stopping");
                        let _ = tx.send(true);
                    }
                    else => break,
                }
            }
        });

        Ok(SignalHandler { shutdown: rx })
    }

    /// A receiver that observes `true` once shutdown has been requested.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }
}

fn discard_status(status_file: Option<&Path>) {
    if let Some(path) = status_file {
        StatusFile::new(path.to_path_buf()).remove();
    }
}

fn is_double_interrupt(last: Option<Instant>, now: Instant) -> bool {
    last.is_some_and(|prev| now.duration_since(prev) <= DOUBLE_INTERRUPT_WINDOW)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_interrupt_is_not_double() {
        assert!(!is_double_interrupt(None, Instant::now()));
    }

    #[test]
    fn test_interrupt_within_window_is_double() {
        let first = Instant::now();
        assert!(is_double_interrupt(Some(first), first + Duration::from_secs(1)));
    }

    #[test]
    fn test_interrupt_after_window_is_not_double() {
        let first = Instant::now();
        assert!(!is_double_interrupt(Some(first), first + Duration::from_secs(4)));
    }

    #[test]
    fn test_forced_exit_discards_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agewatch.status");
        std::fs::write(&path, "{}").unwrap();

        discard_status(Some(&path));
        assert!(!path.exists());

        // nothing configured, nothing to do
        discard_status(None);
    }

    #[tokio::test]
    async fn test_sigterm_sets_shutdown() {
        let handler = SignalHandler::install(None).unwrap();
        let mut rx = handler.subscribe();
        assert!(!*rx.borrow());

        nix::sys::signal::raise(nix::sys::signal::Signal::SIGTERM).unwrap();

        tokio::time::timeout(Duration::from_secs(5), rx.changed())
            .await
            .expect("shutdown should be signalled")
            .unwrap();
        assert!(*rx.borrow());
    }
}
