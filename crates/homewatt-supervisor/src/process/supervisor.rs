//! Supervisor loop for the worker/server process pair.
//!
//! The [`Supervisor`] owns both child handles and exposes one structured
//! operation: wait for the first exit, relaying any termination signals
//! received in the meantime, then terminate the survivor and report the
//! first exit's status.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::spec::{ChildRole, ChildSpec};

/// Termination signal received by the supervisor process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermSignal {
    /// SIGINT / Ctrl+C.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

impl TermSignal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for TermSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from supervisor operations.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("{role} command is empty")]
    EmptyCommand { role: ChildRole },

    #[error("failed to spawn {role}: {source}")]
    Spawn {
        role: ChildRole,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to wait on {role}: {source}")]
    Wait {
        role: ChildRole,
        #[source]
        source: std::io::Error,
    },
}

/// Settings for a supervision run.
#[derive(Debug)]
pub struct SupervisorSpec {
    pub worker: ChildSpec,
    pub server: ChildSpec,
    /// Pause between starting the worker and the server. Best-effort
    /// ordering, not a readiness check.
    pub startup_delay: Duration,
    /// Grace period for the survivor between SIGTERM and SIGKILL.
    pub terminate_timeout: Duration,
}

/// Outcome of a supervision run: which child exited first, and how.
#[derive(Debug, Clone, Copy)]
pub struct ExitReport {
    pub role: ChildRole,
    pub status: ExitStatus,
}

impl ExitReport {
    /// Shell-style exit code for the supervisor to propagate.
    pub fn exit_code(&self) -> i32 {
        exit_status_code(self.status)
    }
}

/// Map an exit status to a shell-style exit code: the child's own code for a
/// normal exit, 128+N for a death by signal N.
pub fn exit_status_code(status: ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    status.code().unwrap_or(1)
}

#[derive(Debug)]
struct ManagedChild {
    role: ChildRole,
    child: Child,
}

impl ManagedChild {
    /// Send SIGTERM to the child. A child that is already gone is not an
    /// error; the failure is logged and swallowed.
    fn send_term(&self) {
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            // SAFETY: pid is a valid process ID obtained from our own Child
            // handle. kill(2) with SIGTERM is safe to call on any owned
            // subprocess.
            #[allow(unsafe_code)]
            #[allow(clippy::cast_possible_wrap)]
            let ret = unsafe { libc::kill(pid as i32, libc::SIGTERM) };
            if ret != 0 {
                let err = std::io::Error::last_os_error();
                warn!(role = %self.role, pid, error = %err, "Failed to relay SIGTERM");
            }
        }
    }
}

enum Event {
    Exited(ChildRole, std::io::Result<ExitStatus>),
    Signal(Option<TermSignal>),
}

/// Owner of both child processes.
#[derive(Debug)]
pub struct Supervisor {
    worker: ManagedChild,
    server: ManagedChild,
    terminate_timeout: Duration,
}

impl Supervisor {
    /// Spawn the worker, wait out the startup delay, then spawn the server.
    ///
    /// If the server fails to spawn, the already-running worker is killed
    /// before the error is returned.
    pub async fn start(spec: SupervisorSpec) -> Result<Self, SupervisorError> {
        let mut worker = ManagedChild {
            role: ChildRole::Worker,
            child: spec.worker.spawn()?,
        };

        info!(
            delay_secs = spec.startup_delay.as_secs_f64(),
            "Worker started; delaying server launch"
        );
        tokio::time::sleep(spec.startup_delay).await;

        let server = match spec.server.spawn() {
            Ok(child) => ManagedChild {
                role: ChildRole::Server,
                child,
            },
            Err(e) => {
                warn!(error = %e, "Server failed to spawn; killing worker");
                let _ = worker.child.kill().await;
                return Err(e);
            }
        };

        Ok(Self {
            worker,
            server,
            terminate_timeout: spec.terminate_timeout,
        })
    }

    /// Relay a received termination signal to both children as SIGTERM.
    pub fn relay_termination(&self, signal: TermSignal) {
        info!(signal = %signal, "Relaying termination signal to both children");
        self.worker.send_term();
        self.server.send_term();
    }

    /// Drive both children until the first one exits.
    ///
    /// Each signal received on `signals` is relayed once to both children.
    /// After the first exit the survivor is terminated, and the first exit's
    /// status is reported regardless of which child it came from or whether
    /// a signal was relayed beforehand.
    pub async fn run(
        mut self,
        mut signals: mpsc::Receiver<TermSignal>,
    ) -> Result<ExitReport, SupervisorError> {
        let mut signals_open = true;
        let (role, status) = loop {
            let event = tokio::select! {
                status = self.worker.child.wait() => Event::Exited(ChildRole::Worker, status),
                status = self.server.child.wait() => Event::Exited(ChildRole::Server, status),
                signal = signals.recv(), if signals_open => Event::Signal(signal),
            };
            match event {
                Event::Exited(role, status) => {
                    let status = status.map_err(|source| SupervisorError::Wait { role, source })?;
                    break (role, status);
                }
                Event::Signal(Some(signal)) => self.relay_termination(signal),
                Event::Signal(None) => signals_open = false,
            }
        };

        info!(role = %role, %status, "Child exited first");
        self.shutdown_survivor(role).await;

        Ok(ExitReport { role, status })
    }

    /// Terminate the child that did not exit first: SIGTERM, bounded wait,
    /// SIGKILL on timeout.
    async fn shutdown_survivor(&mut self, exited: ChildRole) {
        let survivor = match exited {
            ChildRole::Worker => &mut self.server,
            ChildRole::Server => &mut self.worker,
        };

        survivor.send_term();

        match tokio::time::timeout(self.terminate_timeout, survivor.child.wait()).await {
            Ok(Ok(status)) => {
                info!(role = %survivor.role, %status, "Survivor exited");
            }
            Ok(Err(e)) => {
                warn!(role = %survivor.role, error = %e, "Error waiting for survivor");
                let _ = survivor.child.kill().await;
            }
            Err(_) => {
                warn!(role = %survivor.role, "Timeout waiting for survivor shutdown, killing");
                let _ = survivor.child.kill().await;
            }
        }
    }
}
