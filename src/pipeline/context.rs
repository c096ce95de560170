//! Per-run pipeline context
//!
//! Holds what every stage needs and used to be process-wide state: the
//! directory layout, output prefix, resource limits, the run clock, the tool
//! runner and the audit log of every tool invocation. Created once at start
//! and passed by reference.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::tools::{ToolInvocation, ToolOutput, ToolRunner};

/// Audit entry for one external tool invocation
#[derive(Debug, Clone, Serialize)]
pub struct ToolRecord {
    pub label: String,
    pub command_line: String,
    pub exit_code: Option<i32>,
    pub elapsed_secs: f64,
    pub started_at: DateTime<Utc>,
    /// Present when the tool could not be run at all
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch_error: Option<String>,
}

pub struct PipelineContext {
    pub work_dir: PathBuf,
    pub save_dir: PathBuf,
    pub details_dir: PathBuf,
    /// Empty or ending in `_`
    pub prefix: String,
    pub threads: usize,
    pub memory_gb: usize,
    started: Instant,
    runner: Arc<dyn ToolRunner>,
    tool_log: Mutex<Vec<ToolRecord>>,
}

impl PipelineContext {
    /// Fresh `<output_base>_work` with `save/` and `save/details/` inside
    pub fn create(
        output_base: &Path,
        prefix: &str,
        threads: usize,
        memory_gb: usize,
        runner: Arc<dyn ToolRunner>,
    ) -> Result<Self> {
        let mut name = output_base
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "asm_forge".into());
        name.push("_work");
        let work_dir = output_base.with_file_name(name);

        if work_dir.exists() {
            std::fs::remove_dir_all(&work_dir)
                .with_context(|| format!("Failed to clear {}", work_dir.display()))?;
        }
        std::fs::create_dir_all(&work_dir)
            .with_context(|| format!("Failed to create {}", work_dir.display()))?;
        let work_dir = work_dir
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", work_dir.display()))?;

        Self::in_work_dir(work_dir, prefix, threads, memory_gb, runner)
    }

    /// Context over an existing working directory
    pub fn in_work_dir(
        work_dir: PathBuf,
        prefix: &str,
        threads: usize,
        memory_gb: usize,
        runner: Arc<dyn ToolRunner>,
    ) -> Result<Self> {
        let save_dir = work_dir.join("save");
        let details_dir = save_dir.join("details");
        std::fs::create_dir_all(&details_dir)
            .with_context(|| format!("Failed to create {}", details_dir.display()))?;

        info!("📁 Working directory: {}", work_dir.display());
        Ok(Self {
            work_dir,
            save_dir,
            details_dir,
            prefix: normalize_prefix(prefix),
            threads: threads.max(1),
            memory_gb,
            started: Instant::now(),
            runner,
            tool_log: Mutex::new(Vec::new()),
        })
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Path of a bare file name inside the working directory
    pub fn work_path(&self, name: impl AsRef<Path>) -> PathBuf {
        self.work_dir.join(name)
    }

    /// Prefixed path inside the details directory
    pub fn details_path(&self, name: &str) -> PathBuf {
        self.details_dir.join(format!("{}{}", self.prefix, name))
    }

    /// Run a tool in the working directory. Never fails: a tool that cannot
    /// be launched comes back as an output without an exit code.
    pub fn run_tool(&self, invocation: &ToolInvocation) -> ToolOutput {
        let command_line = invocation.command_line();
        info!("⚙️  [{}] {}", invocation.label, command_line);
        let started_at = Utc::now();

        let (output, launch_error) = match self.runner.run(invocation, &self.work_dir) {
            Ok(output) => (output, None),
            Err(e) => {
                let reason = format!("{e:#}");
                warn!("❌ [{}] could not run: {}", invocation.label, reason);
                (ToolOutput::not_started(reason.clone()), Some(reason))
            }
        };

        info!(
            "[{}] return code {:?} after {:.1}s",
            invocation.label,
            output.exit_code,
            output.elapsed.as_secs_f64()
        );
        self.tool_log.lock().push(ToolRecord {
            label: invocation.label.clone(),
            command_line,
            exit_code: output.exit_code,
            elapsed_secs: output.elapsed.as_secs_f64(),
            started_at,
            launch_error,
        });
        output
    }

    pub fn tool_records(&self) -> Vec<ToolRecord> {
        self.tool_log.lock().clone()
    }

    /// Move a file from the working directory into details with the prefix
    pub fn move_to_details(&self, name: &str, dest_name: &str) -> Result<PathBuf> {
        let src = self.work_path(name);
        let dest = self.details_path(dest_name);
        move_file(&src, &dest)?;
        Ok(dest)
    }
}

/// `rename`, falling back to copy-and-delete across filesystems
pub fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest)
        .with_context(|| format!("Failed to move {} to {}", src.display(), dest.display()))?;
    std::fs::remove_file(src).with_context(|| format!("Failed to remove {}", src.display()))?;
    Ok(())
}

/// Prefixes end in `_` unless empty
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.is_empty() || prefix.ends_with('_') {
        prefix.to_string()
    } else {
        format!("{prefix}_")
    }
}

/// Size of a file in bytes, zero when absent
pub fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tools::ProcessRunner;
    use tempfile::tempdir;

    #[test]
    fn test_prefix_normalization() {
        assert_eq!(normalize_prefix(""), "");
        assert_eq!(normalize_prefix("run"), "run_");
        assert_eq!(normalize_prefix("run_"), "run_");
    }

    #[test]
    fn test_create_layout_recreates_work_dir() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("out");
        let stale = dir.path().join("out_work");
        std::fs::create_dir(&stale).unwrap();
        std::fs::write(stale.join("old.txt"), "x").unwrap();

        let ctx = PipelineContext::create(&base, "s1", 2, 8, Arc::new(ProcessRunner::default())).unwrap();
        assert!(ctx.work_dir.ends_with("out_work"));
        assert!(ctx.details_dir.is_dir());
        assert!(!ctx.work_path("old.txt").exists());
        assert_eq!(ctx.prefix, "s1_");
        assert!(ctx.details_path("run_details.json").ends_with("save/details/s1_run_details.json"));
    }

    #[test]
    fn test_launch_failure_is_recorded() {
        let dir = tempdir().unwrap();
        let ctx = PipelineContext::in_work_dir(
            dir.path().to_path_buf(),
            "",
            1,
            1,
            Arc::new(ProcessRunner::default()),
        )
        .unwrap();
        let out = ctx.run_tool(&ToolInvocation::new("ghost", "no-such-tool-7f3a"));
        assert!(!out.success());
        let records = ctx.tool_records();
        assert_eq!(records.len(), 1);
        assert!(records[0].launch_error.is_some());
    }
}
