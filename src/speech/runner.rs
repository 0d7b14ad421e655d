//! External speech process runner
//!
//! Runs one engine invocation to completion, enforcing a timeout with
//! SIGTERM → SIGKILL escalation. Every live child is kept in an active
//! process table so a stop request can reach it from another thread.
//!
//! The child sits behind its own `Mutex` so the waiting thread and a
//! stopping thread can both poll it. The lock is only ever held for a
//! non-blocking `try_wait` or a signal send, never across a sleep.

use super::gate::Fingerprint;
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::io::{self, Read};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

/// How often a waiting thread checks whether its child exited
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Upper bound on waiting for stderr after the child is gone
///
/// A grandchild can inherit the pipe and keep it open; we don't wait for it.
const STDERR_DRAIN: Duration = Duration::from_millis(250);

/// Upper bound on reaping a child after SIGKILL
///
/// Together with the grace period and [`STDERR_DRAIN`] this bounds how far
/// a run can overshoot its timeout.
const KILL_REAP: Duration = Duration::from_secs(1);

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Process exited on its own with this code (0 = success)
    Exited(i32),
    /// Process was killed by a signal it did not choose (e.g. a stop request)
    Signaled(i32),
    /// Timeout expired and the process was terminated
    TimedOut,
    /// Executable does not exist
    NotFound,
    /// Executable exists but may not be run
    NotExecutable,
    /// Any other spawn failure
    SpawnFailed(String),
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        *self == RunOutcome::Exited(0)
    }
}

/// Result of one [`ProcessRunner::run`] call
#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Wall time from spawn to exit (zero if the spawn failed)
    pub elapsed: Duration,
    /// Captured stderr, or a short explanation for timeouts and spawn errors
    pub diagnostic: String,
}

type SharedChild = Arc<Mutex<Child>>;

struct ActiveEntry {
    id: u64,
    fingerprint: Fingerprint,
    child: SharedChild,
}

/// Launches engine processes and tracks the live ones
pub struct ProcessRunner {
    /// Live children in registration order (newest last)
    active: Mutex<Vec<ActiveEntry>>,
    next_id: AtomicU64,
    /// Time between SIGTERM and SIGKILL
    grace: Duration,
}

/// Timeout that actually applies to a run
///
/// A positive finite per-call value is capped by the hard ceiling;
/// anything else means the hard ceiling alone.
pub fn effective_timeout(per_call: Option<f64>, hard_ceiling: f64) -> f64 {
    match per_call {
        Some(t) if t.is_finite() && t > 0.0 => t.min(hard_ceiling),
        _ => hard_ceiling,
    }
}

/// Seconds to `Duration`, saturating instead of panicking
fn to_duration(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    child.lock().unwrap_or_else(|e| e.into_inner())
}

impl ProcessRunner {
    pub fn new(grace: Duration) -> Self {
        Self {
            active: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            grace,
        }
    }

    /// Run `command` with `argument` appended and wait for it
    ///
    /// Blocks for at most the effective timeout plus the grace period
    /// (plus a short stderr drain).
    pub fn run(
        &self,
        fingerprint: &Fingerprint,
        command: &[String],
        argument: &str,
        per_call_timeout: Option<f64>,
        hard_ceiling: f64,
    ) -> RunReport {
        let Some((program, args)) = command.split_first() else {
            return RunReport {
                outcome: RunOutcome::SpawnFailed("empty command".to_string()),
                elapsed: Duration::ZERO,
                diagnostic: "empty command".to_string(),
            };
        };

        let spawned = Command::new(program)
            .args(args)
            .arg(argument)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => return Self::spawn_failure(program, e),
        };

        let start = Instant::now();
        let stderr = child.stderr.take().map(Self::drain_stderr);
        let child = Arc::new(Mutex::new(child));
        let _registration = self.register(fingerprint, Arc::clone(&child));

        let timeout = effective_timeout(per_call_timeout, hard_ceiling);
        let deadline = start.checked_add(to_duration(timeout));
        debug!(
            "Started {} for {} (timeout {:.1}s)",
            program, fingerprint, timeout
        );

        let status = loop {
            match lock(&child).try_wait() {
                Ok(Some(status)) => break Ok(status),
                Ok(None) => {}
                Err(e) => break Err(e),
            }

            let now = Instant::now();
            match deadline {
                Some(deadline) if now >= deadline => {
                    warn!("{} timed out after {:.1}s, terminating", program, timeout);
                    terminate(&child, self.grace);
                    return RunReport {
                        outcome: RunOutcome::TimedOut,
                        elapsed: start.elapsed(),
                        diagnostic: format!("timeout after {} seconds", timeout),
                    };
                }
                Some(deadline) => thread::sleep(POLL_INTERVAL.min(deadline - now)),
                None => thread::sleep(POLL_INTERVAL),
            }
        };
        let elapsed = start.elapsed();

        let diagnostic = stderr
            .and_then(|rx| rx.recv_timeout(STDERR_DRAIN).ok())
            .unwrap_or_default();

        let outcome = match status {
            Ok(status) => Self::classify(status),
            Err(e) => RunOutcome::SpawnFailed(format!("wait failed: {}", e)),
        };
        debug!("{} finished: {:?} in {:.2}s", program, outcome, elapsed.as_secs_f64());

        RunReport {
            outcome,
            elapsed,
            diagnostic,
        }
    }

    /// Request termination of live processes
    ///
    /// Targets every entry, or only the most recently registered one.
    /// Returns how many processes were targeted.
    pub fn stop(&self, stop_all: bool) -> usize {
        let targets: Vec<(Fingerprint, SharedChild)> = {
            let active = self.active.lock().unwrap_or_else(|e| e.into_inner());
            let selected = if stop_all {
                &active[..]
            } else {
                &active[active.len().saturating_sub(1)..]
            };
            selected
                .iter()
                .map(|e| (e.fingerprint.clone(), Arc::clone(&e.child)))
                .collect()
        };

        let grace = self.grace;
        thread::scope(|scope| {
            for (fingerprint, child) in &targets {
                debug!("Stopping speech {}", fingerprint);
                scope.spawn(move || terminate(child, grace));
            }
        });

        targets.len()
    }

    /// Number of live processes
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    fn register(&self, fingerprint: &Fingerprint, child: SharedChild) -> Registration<'_> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ActiveEntry {
                id,
                fingerprint: fingerprint.clone(),
                child,
            });
        Registration { runner: self, id }
    }

    fn deregister(&self, id: u64) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|e| e.id != id);
    }

    fn spawn_failure(program: &str, e: io::Error) -> RunReport {
        let (outcome, diagnostic) = match e.kind() {
            io::ErrorKind::NotFound => (RunOutcome::NotFound, "command not found".to_string()),
            io::ErrorKind::PermissionDenied => (
                RunOutcome::NotExecutable,
                "command not executable".to_string(),
            ),
            _ => (RunOutcome::SpawnFailed(e.to_string()), e.to_string()),
        };
        debug!("Failed to spawn {}: {}", program, e);
        RunReport {
            outcome,
            elapsed: Duration::ZERO,
            diagnostic,
        }
    }

    fn classify(status: ExitStatus) -> RunOutcome {
        match status.code() {
            Some(code) => RunOutcome::Exited(code),
            None => RunOutcome::Signaled(status.signal().unwrap_or(0)),
        }
    }

    /// Read stderr to the end on a helper thread
    fn drain_stderr<R: Read + Send + 'static>(mut pipe: R) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
        rx
    }
}

/// Removes an entry from the active table when dropped
struct Registration<'a> {
    runner: &'a ProcessRunner,
    id: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.runner.deregister(self.id);
    }
}

/// Gracefully stop a child: SIGTERM, wait up to `grace`, then SIGKILL
///
/// Safe to call concurrently from several threads and on a child that
/// already exited. The signal is sent under the child lock right after a
/// `try_wait`, so it can never hit a reaped (and possibly reused) PID.
pub(crate) fn terminate(child: &Mutex<Child>, grace: Duration) {
    {
        let mut guard = lock(child);
        if !matches!(guard.try_wait(), Ok(None)) {
            return;
        }
        let pid = Pid::from_raw(guard.id() as i32);
        match signal::kill(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return,
            Err(e) => debug!("SIGTERM to {} failed: {}", pid, e),
        }
    }

    if wait_exit(child, grace) {
        return;
    }

    {
        let mut guard = lock(child);
        if !matches!(guard.try_wait(), Ok(None)) {
            return;
        }
        debug!("Process {} ignored SIGTERM, killing", guard.id());
        if let Err(e) = guard.kill() {
            debug!("Kill failed: {}", e);
        }
    }

    // SIGKILL cannot be ignored; this only reaps
    if !wait_exit(child, KILL_REAP) {
        warn!("Process still not reaped {:?} after SIGKILL", KILL_REAP);
    }
}

/// Poll until the child has exited or `limit` passes
fn wait_exit(child: &Mutex<Child>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    loop {
        if !matches!(lock(child).try_wait(), Ok(None)) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            return false;
        }
        thread::sleep(POLL_INTERVAL.min(deadline - now));
    }
}
