//! Process handle for llama-server.

use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::Launch;
use crate::error::ServerError;
use crate::status::{ServerStatus, StartOutcome, StopOutcome};
use crate::DEFAULT_GRACE_PERIOD;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[cfg(windows)]
const CREATE_NEW_CONSOLE: u32 = 0x0000_0010;

/// Owner of the single llama-server session.
pub struct ServerHandle {
    launcher: Box<dyn Launch>,
    grace_period: Duration,
    process: Option<Child>,
}

impl ServerHandle {
    /// Create a handle that spawns processes with the given launcher.
    pub fn new(launcher: impl Launch + 'static) -> Self {
        Self {
            launcher: Box::new(launcher),
            grace_period: DEFAULT_GRACE_PERIOD,
            process: None,
        }
    }

    /// Set how long `stop` waits before killing.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Check the tracked process against the OS.
    pub fn status(&mut self) -> ServerStatus {
        match self.process.as_mut() {
            None => ServerStatus::Absent,
            Some(child) => match child.try_wait() {
                Ok(None) => ServerStatus::Running { pid: child.id() },
                Ok(Some(_)) => ServerStatus::Exited,
                Err(e) => {
                    warn!("Error checking server status: {}", e);
                    ServerStatus::Exited
                }
            },
        }
    }

    /// PID of the live session, if any.
    pub fn pid(&mut self) -> Option<u32> {
        self.status().pid()
    }

    /// Check if the server process is running.
    pub fn is_running(&mut self) -> bool {
        self.status().is_running()
    }

    /// Start llama-server unless a live session already exists.
    pub fn start(&mut self) -> StartOutcome {
        if let ServerStatus::Running { pid } = self.status() {
            debug!("Start requested but server is already running (PID: {})", pid);
            return StartOutcome::AlreadyRunning { pid };
        }

        // Anything left here has exited; reap it before replacing.
        if let Some(mut stale) = self.process.take() {
            let _ = stale.wait();
        }

        match self.spawn() {
            Ok(child) => {
                let pid = child.id();
                info!("llama-server process started with PID: {}", pid);
                self.process = Some(child);
                StartOutcome::Started { pid }
            }
            Err(e) => {
                warn!("Failed to start server: {}", e);
                StartOutcome::Failed(e.to_string())
            }
        }
    }

    /// Stop the tracked process, escalating to a kill after the grace period.
    pub fn stop(&mut self) -> StopOutcome {
        let Some(mut child) = self.process.take() else {
            return StopOutcome::NothingToStop;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Server had already exited with status: {:?}", status);
                return StopOutcome::NotRunning;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Error checking server status: {}", e);
                self.process = Some(child);
                return StopOutcome::Failed(ServerError::Wait(e).to_string());
            }
        }

        info!("Stopping llama-server (PID: {})", child.id());

        match terminate(&mut child, self.grace_period) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Error stopping server: {}", e);
                self.process = Some(child);
                StopOutcome::Failed(e.to_string())
            }
        }
    }

    fn spawn(&self) -> Result<Child, ServerError> {
        let mut command = self.launcher.command();
        detach(&mut command);

        debug!("Spawning {:?}", command);

        command.spawn().map_err(|source| ServerError::Spawn {
            binary: self.launcher.program(),
            source,
        })
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if self.process.is_some() {
            let outcome = self.stop();
            debug!("Server handle dropped: {}", outcome);
        }
    }
}

/// Put the child in its own process group / console so it outlives the
/// caller's terminal session.
fn detach(command: &mut Command) {
    command.stdin(Stdio::null());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .process_group(0);
    }

    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        command.creation_flags(CREATE_NEW_CONSOLE);
    }
}

fn terminate(child: &mut Child, grace_period: Duration) -> Result<StopOutcome, ServerError> {
    request_termination(child)?;

    if let Some(status) = wait_for_exit(child, grace_period)? {
        debug!("Server exited with status: {:?}", status);
        return Ok(StopOutcome::Stopped);
    }

    warn!("Server didn't exit gracefully, killing...");
    child.kill().map_err(ServerError::Terminate)?;
    child.wait().map_err(ServerError::Wait)?;
    Ok(StopOutcome::Killed)
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> Result<(), ServerError> {
    let pid = libc::pid_t::try_from(child.id()).map_err(|_| {
        ServerError::Terminate(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "PID out of range",
        ))
    })?;

    // SAFETY: `pid` names a child we spawned and have not yet reaped.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(ServerError::Terminate(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> Result<(), ServerError> {
    child.kill().map_err(ServerError::Terminate)
}

fn wait_for_exit(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>, ServerError> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait().map_err(ServerError::Wait)? {
            return Ok(Some(status));
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Runs a shell script in place of llama-server.
    struct Script(String);

    impl Script {
        fn new(script: &str) -> Self {
            Self(script.to_string())
        }
    }

    impl Launch for Script {
        fn command(&self) -> Command {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&self.0);
            command
        }

        fn program(&self) -> String {
            "sh".to_string()
        }
    }

    struct Missing;

    impl Launch for Missing {
        fn command(&self) -> Command {
            Command::new("/nonexistent/llama-server")
        }

        fn program(&self) -> String {
            "/nonexistent/llama-server".to_string()
        }
    }

    fn long_running() -> ServerHandle {
        ServerHandle::new(Script::new("exec sleep 30")).with_grace_period(Duration::from_secs(2))
    }

    #[test]
    fn test_start_yields_running_session() {
        let mut handle = long_running();
        assert_eq!(handle.status(), ServerStatus::Absent);

        let outcome = handle.start();
        let StartOutcome::Started { pid } = outcome else {
            panic!("unexpected outcome: {:?}", outcome);
        };
        assert_eq!(handle.pid(), Some(pid));
        assert!(handle.is_running());

        assert_eq!(handle.stop(), StopOutcome::Stopped);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut handle = long_running();
        let first = handle.start();
        let pid = handle.pid().unwrap();

        let second = handle.start();
        assert!(matches!(first, StartOutcome::Started { .. }));
        assert_eq!(second, StartOutcome::AlreadyRunning { pid });
        assert_eq!(handle.pid(), Some(pid));

        handle.stop();
    }

    #[test]
    fn test_stop_without_session() {
        let mut handle = long_running();
        assert_eq!(handle.stop(), StopOutcome::NothingToStop);
        assert_eq!(handle.stop().to_string(), "No server is running!");
    }

    #[test]
    fn test_stop_twice() {
        let mut handle = long_running();
        handle.start();
        assert_eq!(handle.stop(), StopOutcome::Stopped);
        assert_eq!(handle.stop(), StopOutcome::NothingToStop);
        assert_eq!(handle.status(), ServerStatus::Absent);
    }

    #[test]
    fn test_stop_escalates_to_kill() {
        // The ignored disposition survives exec, so sleep shrugs off SIGTERM.
        // The script touches a marker once the trap is installed, so SIGTERM
        // can't land on the shell before it starts ignoring it.
        let marker = std::env::temp_dir().join(format!("localchat-trap-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        let script = format!("trap '' TERM; : > '{}'; exec sleep 30", marker.display());

        let mut handle = ServerHandle::new(Script(script))
            .with_grace_period(Duration::from_millis(300));
        handle.start();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !marker.exists() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(marker.exists(), "script never installed its TERM trap");
        let _ = std::fs::remove_file(&marker);

        let started = Instant::now();
        assert_eq!(handle.stop(), StopOutcome::Killed);
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert!(!handle.is_running());
    }

    #[test]
    fn test_exited_process_is_not_running() {
        let mut handle = ServerHandle::new(Script::new("exit 0"));
        handle.start();

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.status() != ServerStatus::Exited && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(handle.status(), ServerStatus::Exited);
        assert_eq!(handle.stop(), StopOutcome::NotRunning);
    }

    #[test]
    fn test_start_replaces_exited_process() {
        let mut handle = ServerHandle::new(Script::new("exit 0"));
        assert!(matches!(handle.start(), StartOutcome::Started { .. }));

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }

        assert!(matches!(handle.start(), StartOutcome::Started { .. }));
    }

    #[test]
    fn test_spawn_failure_is_reported() {
        let mut handle = ServerHandle::new(Missing);
        let outcome = handle.start();
        assert!(matches!(outcome, StartOutcome::Failed(_)));
        assert!(outcome
            .to_string()
            .starts_with("Failed to start server: /nonexistent/llama-server"));
        assert_eq!(handle.status(), ServerStatus::Absent);
    }

    #[test]
    fn test_drop_stops_session() {
        let mut handle = long_running();
        handle.start();
        let pid = handle.pid().unwrap() as libc::pid_t;
        drop(handle);

        // SAFETY: signal 0 only probes for existence.
        let alive = unsafe { libc::kill(pid, 0) } == 0;
        assert!(!alive);
    }
}
