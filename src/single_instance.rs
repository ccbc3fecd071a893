//! PID-file based single-instance enforcement.
//!
//! The daemon writes its PID on startup and refuses to start while another
//! live instance holds the file. `stop` asks a running instance to shut
//! down with SIGINT and waits for the process to disappear; a stale file
//! left by a crashed instance is reclaimed silently.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{info, warn};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

/// How often and how long `stop` polls for the old instance to exit.
const STOP_RETRIES: u32 = 50;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default PID file location for the installed daemon.
pub const DEFAULT_PID_PATH: &str = "/run/hwprofiled.pid";

pub struct SingleInstanceGuard {
    pid_path: PathBuf,
    stop_retries: u32,
}

impl SingleInstanceGuard {
    pub fn new(pid_path: impl Into<PathBuf>) -> Self {
        Self {
            pid_path: pid_path.into(),
            stop_retries: STOP_RETRIES,
        }
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Claims the PID file for this process. Fails when another live
    /// instance already holds it; a stale file is overwritten.
    pub fn start(&self) -> Result<()> {
        if let Some(pid) = self.read_pid() {
            if process_alive(pid) {
                bail!("Another instance is already running with PID {pid}");
            }
            warn!("Reclaiming stale PID file from dead process {pid}");
        }

        if let Some(parent) = self.pid_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        fs::write(&self.pid_path, std::process::id().to_string())
            .with_context(|| format!("Failed to write PID file {}", self.pid_path.display()))?;

        info!("PID file claimed: {}", self.pid_path.display());
        Ok(())
    }

    /// Asks the recorded instance to shut down and waits until its process
    /// is gone. A missing PID file means nothing is running.
    pub async fn stop(&self) -> Result<()> {
        let Some(pid) = self.read_pid() else {
            info!("No PID file, nothing to stop");
            return Ok(());
        };

        if !process_alive(pid) {
            warn!("Removing stale PID file of dead process {pid}");
            self.release();
            return Ok(());
        }

        info!("Stopping instance with PID {pid}");
        kill(pid, Signal::SIGINT).with_context(|| format!("Failed to signal PID {pid}"))?;
        self.release();

        for _ in 0..self.stop_retries {
            if !process_alive(pid) {
                return Ok(());
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        bail!("Instance with PID {pid} did not exit in time")
    }

    /// Stops a running instance and claims the PID file for this process.
    pub async fn reload(&self) -> Result<()> {
        self.stop().await.context("Could not stop the running instance")?;
        self.start()
    }

    /// Removes the PID file. Called on orderly shutdown.
    pub fn release(&self) {
        if let Err(e) = fs::remove_file(&self.pid_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to remove PID file {}: {}",
                    self.pid_path.display(),
                    e
                );
            }
        }
    }

    fn read_pid(&self) -> Option<Pid> {
        let text = fs::read_to_string(&self.pid_path).ok()?;
        let raw: i32 = text.trim().parse().ok()?;
        Some(Pid::from_raw(raw))
    }
}

/// Existence check via the null signal.
fn process_alive(pid: Pid) -> bool {
    kill(pid, None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use tempfile::TempDir;

    fn guard_in(dir: &TempDir) -> SingleInstanceGuard {
        SingleInstanceGuard::new(dir.path().join("daemon.pid"))
    }

    /// PID of an already-reaped child, which no longer exists.
    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn start_writes_own_pid() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        guard.start().unwrap();
        let content = fs::read_to_string(guard.pid_path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[test]
    fn second_start_against_live_instance_fails() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        // Our own PID is by definition a live process.
        guard.start().unwrap();
        assert!(guard.start().is_err());
    }

    #[test]
    fn stale_pid_file_is_reclaimed() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        fs::write(guard.pid_path(), dead_pid().to_string()).unwrap();
        guard.start().unwrap();

        let content = fs::read_to_string(guard.pid_path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[tokio::test]
    async fn stop_without_pid_file_succeeds() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);
        guard.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_removes_stale_pid_file() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        fs::write(guard.pid_path(), dead_pid().to_string()).unwrap();
        guard.stop().await.unwrap();
        assert!(!guard.pid_path().exists());
    }

    #[tokio::test]
    async fn stop_signals_live_instance_and_waits() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        fs::write(guard.pid_path(), child.id().to_string()).unwrap();

        // Reap the child from another thread so the exit is observable.
        let reaper = std::thread::spawn(move || child.wait());

        guard.stop().await.unwrap();
        assert!(!guard.pid_path().exists());
        reaper.join().unwrap().unwrap();
    }

    #[tokio::test]
    async fn stop_fails_when_the_instance_ignores_sigint() {
        let dir = TempDir::new().unwrap();
        let mut guard = guard_in(&dir);
        guard.stop_retries = 3;

        let mut child = Command::new("sh")
            .arg("-c")
            .arg("trap '' INT; sleep 30")
            .spawn()
            .unwrap();
        // Give the shell time to install its trap before signaling.
        tokio::time::sleep(Duration::from_millis(300)).await;
        fs::write(guard.pid_path(), child.id().to_string()).unwrap();

        assert!(guard.stop().await.is_err());

        // Reload goes through the same stop and must propagate the failure.
        fs::write(guard.pid_path(), child.id().to_string()).unwrap();
        assert!(guard.reload().await.is_err());

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[tokio::test]
    async fn reload_claims_the_file_for_this_process() {
        let dir = TempDir::new().unwrap();
        let guard = guard_in(&dir);

        fs::write(guard.pid_path(), dead_pid().to_string()).unwrap();
        guard.reload().await.unwrap();

        let content = fs::read_to_string(guard.pid_path()).unwrap();
        assert_eq!(content, std::process::id().to_string());
    }

    #[test]
    fn release_tolerates_missing_file() {
        let dir = TempDir::new().unwrap();
        guard_in(&dir).release();
    }
}
