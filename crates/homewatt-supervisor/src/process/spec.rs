//! Child process specification and spawning.

use std::fmt;
use std::process::Stdio;

use tokio::process::{Child, Command};
use tracing::info;

use super::supervisor::SupervisorError;

/// Role of a supervised child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRole {
    /// The periodic energy-calculation scheduler.
    Worker,
    /// The HTTP API process.
    Server,
}

impl ChildRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for ChildRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specification for launching a child process.
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub role: ChildRole,
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables set on top of the inherited environment.
    pub env: Vec<(String, String)>,
}

impl ChildSpec {
    /// Build a spec from a `[program, args...]` command line.
    pub fn new(role: ChildRole, command: &[String]) -> Result<Self, SupervisorError> {
        let (program, args) = command
            .split_first()
            .ok_or(SupervisorError::EmptyCommand { role })?;
        Ok(Self {
            role,
            program: program.clone(),
            args: args.to_vec(),
            env: Vec::new(),
        })
    }

    /// Build the worker spec, appending the scheduler flags the calculation
    /// process expects.
    pub fn worker(command: &[String], interval_minutes: u64) -> Result<Self, SupervisorError> {
        let mut spec = Self::new(ChildRole::Worker, command)?;
        spec.args.push("--scheduler".to_string());
        spec.args.push("--interval".to_string());
        spec.args.push(interval_minutes.to_string());
        Ok(spec)
    }

    /// Build the server spec. The command is used as-is.
    pub fn server(command: &[String]) -> Result<Self, SupervisorError> {
        Self::new(ChildRole::Server, command)
    }

    /// Spawn the child process.
    ///
    /// Stdio is inherited: the children own the console. `PYTHONUNBUFFERED`
    /// is set for both children, and `GOOGLE_APPLICATION_CREDENTIALS` is
    /// forwarded explicitly when present in the supervisor's environment.
    pub fn spawn(&self) -> Result<Child, SupervisorError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .env("PYTHONUNBUFFERED", "1")
            // Children must not notify systemd; only the supervisor does.
            .env_remove("NOTIFY_SOCKET");

        if let Ok(creds) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") {
            cmd.env("GOOGLE_APPLICATION_CREDENTIALS", creds);
        }

        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        info!(role = %self.role, program = %self.program, "Spawning child process");
        cmd.spawn().map_err(|source| SupervisorError::Spawn {
            role: self.role,
            source,
        })
    }
}
