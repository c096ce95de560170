//! External tool invocation
//!
//! Every assembler, aligner and polisher is an external program. Stages
//! describe what to run as a [`ToolInvocation`]; a [`ToolRunner`] decides how.
//! The production runner spawns processes, tests substitute a scripted one.

use anyhow::{Context, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

/// Where a tool's standard output goes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum OutputTarget {
    Discard,
    Capture,
    /// Relative paths are resolved against the working directory
    File(PathBuf),
}

/// A fully described external command
#[derive(Debug, Clone, Serialize)]
pub struct ToolInvocation {
    /// Short name used in logs and audit records
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub stdout: OutputTarget,
}

impl ToolInvocation {
    pub fn new(label: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            stdout: OutputTarget::Discard,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn capture_stdout(mut self) -> Self {
        self.stdout = OutputTarget::Capture;
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = OutputTarget::File(path.into());
        self
    }

    /// Shell-style rendering for logs and run details
    pub fn command_line(&self) -> String {
        let mut line = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        if let OutputTarget::File(path) = &self.stdout {
            line.push_str(&format!(" > {}", path.display()));
        }
        line
    }
}

/// What came back from a tool
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// `None` when the process could not be started or was killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Output standing in for a tool that never ran
    pub fn not_started(reason: impl Into<String>) -> Self {
        Self {
            exit_code: None,
            stderr: reason.into(),
            ..Self::default()
        }
    }
}

/// Executes tool invocations inside a working directory
pub trait ToolRunner: Send + Sync {
    fn run(&self, invocation: &ToolInvocation, work_dir: &Path) -> Result<ToolOutput>;
}

/// Runs tools as child processes
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    /// Directories searched before the inherited `PATH`
    path_prefix: Vec<PathBuf>,
}

impl ProcessRunner {
    pub fn new(path_prefix: Vec<PathBuf>) -> Self {
        Self { path_prefix }
    }

    fn search_path(&self) -> Result<Option<OsString>> {
        if self.path_prefix.is_empty() {
            return Ok(None);
        }
        let inherited = std::env::var_os("PATH").unwrap_or_default();
        let joined = std::env::join_paths(
            self.path_prefix
                .iter()
                .cloned()
                .chain(std::env::split_paths(&inherited)),
        )
        .context("Failed to build PATH from path prefix")?;
        Ok(Some(joined))
    }
}

impl ToolRunner for ProcessRunner {
    fn run(&self, invocation: &ToolInvocation, work_dir: &Path) -> Result<ToolOutput> {
        let start = Instant::now();

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(path) = self.search_path()? {
            cmd.env("PATH", path);
        }
        match &invocation.stdout {
            OutputTarget::Discard => {
                cmd.stdout(Stdio::null());
            }
            OutputTarget::Capture => {
                cmd.stdout(Stdio::piped());
            }
            OutputTarget::File(path) => {
                let path = work_dir.join(path);
                let file = File::create(&path)
                    .with_context(|| format!("Failed to create {}", path.display()))?;
                cmd.stdout(Stdio::from(file));
            }
        }

        debug!("spawning {}", invocation.program);
        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", invocation.program))?;
        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for {}", invocation.program))?;

        Ok(ToolOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_rendering() {
        let inv = ToolInvocation::new("racon", "racon")
            .args(["-t", "4", "-u"])
            .arg("reads.fq")
            .stdout_to("contigs.racon.fasta");
        assert_eq!(
            inv.command_line(),
            "racon -t 4 -u reads.fq > contigs.racon.fasta"
        );
    }

    #[test]
    fn test_not_started() {
        let out = ToolOutput::not_started("no such program");
        assert!(!out.success());
        assert_eq!(out.exit_code, None);
    }

    #[cfg(unix)]
    #[test]
    fn test_process_runner_captures_and_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::default();

        let echo = ToolInvocation::new("echo", "echo").arg("hello").capture_stdout();
        let out = runner.run(&echo, dir.path()).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");

        let missing = ToolInvocation::new("missing", "definitely-not-a-real-tool-7f3a");
        assert!(runner.run(&missing, dir.path()).is_err());
    }
}
