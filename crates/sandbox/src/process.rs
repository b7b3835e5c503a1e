//! Command execution for sandboxes backed by real processes.
//! （以實際程序執行沙箱指令。）
//!
//! `ExecCommand` is the serialisable request a sandbox receives; the
//! `ProcessExecutor` runs it with `tokio::process`, piping stdin when present
//! and enforcing an optional timeout.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::SandboxError;

/// Serializable command request.
/// （可序列化的指令請求。）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Relative to the sandbox work dir.
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub stdin: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl ExecCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: BTreeMap::new(),
            stdin: None,
            timeout_ms: None,
        }
    }

    /// Runs `script` through `sh -c`.
    /// （以 `sh -c` 執行指令稿。）
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").with_args(["-c".to_string(), script.into()])
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let millis = timeout.as_millis().clamp(1, u128::from(u64::MAX)) as u64;
        self.timeout_ms = Some(millis);
        self
    }

    /// Human readable form used in logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// Result information produced by a command execution.
/// （指令執行完成後的結果資訊。）
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    pub exit_code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub duration_ms: u128,
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && matches!(self.exit_code, Some(0))
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Runs commands as child processes rooted at a directory.
/// （以子程序執行指令。）
pub struct ProcessExecutor;

impl ProcessExecutor {
    /// Runs `command` with `cwd` as its working directory and captures output.
    /// A timed-out child is killed and reported with `timed_out = true`.
    pub async fn execute(command: &ExecCommand, cwd: &Path) -> Result<ExecOutput, SandboxError> {
        let mut child_cmd = Command::new(&command.program);
        child_cmd
            .args(&command.args)
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if command.stdin.is_some() {
            child_cmd.stdin(Stdio::piped());
        } else {
            child_cmd.stdin(Stdio::null());
        }
        for (key, value) in &command.env {
            child_cmd.env(key, value);
        }

        let start = Instant::now();
        let mut child = child_cmd.spawn().map_err(|source| SandboxError::Spawn {
            program: command.program.clone(),
            source,
        })?;

        if let Some(payload) = &command.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(payload.as_bytes())
                    .await
                    .map_err(|source| SandboxError::io("<stdin>", source))?;
                stdin
                    .shutdown()
                    .await
                    .map_err(|source| SandboxError::io("<stdin>", source))?;
            }
        }

        let output = match command.timeout_ms.map(Duration::from_millis) {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(result) => result.map_err(|source| SandboxError::io(command.display(), source))?,
                Err(_) => {
                    tracing::warn!(command = %command.display(), timeout_ms = limit.as_millis() as u64, "command timed out");
                    // kill_on_drop reaps the child once the future is gone.
                    return Ok(ExecOutput {
                        exit_code: None,
                        stdout: Vec::new(),
                        stderr: Vec::new(),
                        duration_ms: start.elapsed().as_millis(),
                        timed_out: true,
                    });
                }
            },
            None => child
                .wait_with_output()
                .await
                .map_err(|source| SandboxError::io(command.display(), source))?,
        };

        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: start.elapsed().as_millis(),
            timed_out: false,
        })
    }
}
