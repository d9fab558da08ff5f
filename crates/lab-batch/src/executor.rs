use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Request to restart an already materialized run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    pub restart: String,
    pub run_dir: PathBuf,
    pub cwd: PathBuf,
    pub extra_env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecOutcome {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl ExecOutcome {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Status the controller reports for this outcome.
    pub fn exit_code(&self) -> i32 {
        self.code.unwrap_or(1)
    }
}

/// Runs a trial's operation to completion.
pub trait Executor {
    fn execute(&self, req: &ExecRequest) -> Result<ExecOutcome>;
}

/// Launches `<command> --restart <run id>` as a child process and waits.
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    command: Vec<String>,
}

impl ProcessExecutor {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("exec command must not be empty"));
        }
        Ok(Self { command })
    }

    fn build_command(&self, req: &ExecRequest) -> Command {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        cmd.arg("--restart").arg(&req.restart);
        cmd.current_dir(&req.cwd);
        cmd.env("RUN_ID", &req.restart);
        cmd.env("RUN_DIR", &req.run_dir);
        cmd.envs(&req.extra_env);
        cmd.stdin(Stdio::inherit());
        cmd.stdout(Stdio::inherit());
        cmd.stderr(Stdio::inherit());
        cmd
    }
}

impl Executor for ProcessExecutor {
    fn execute(&self, req: &ExecRequest) -> Result<ExecOutcome> {
        let mut cmd = self.build_command(req);
        tracing::debug!(command = ?self.command, run = %req.restart, "spawning trial process");
        let status = cmd
            .status()
            .map_err(|e| anyhow!("failed to start {}: {}", self.command[0], e))?;
        Ok(ExecOutcome {
            code: status.code(),
        })
    }
}
