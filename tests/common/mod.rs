//! Shared fixtures: read file writers and a scripted tool runner

#![allow(dead_code)]

use asm_forge::pipeline::{ToolInvocation, ToolOutput, ToolRunner};
use parking_lot::Mutex;
use std::path::Path;
use std::time::Duration;

type Script = Box<dyn Fn(&ToolInvocation, &Path) -> (Option<i32>, String) + Send + Sync>;

/// Tool runner that fabricates outputs instead of launching programs.
///
/// Each script is matched by program name; it may create files in the
/// working directory and returns the exit code. Unscripted programs exit 1.
pub struct ScriptedRunner {
    scripts: Vec<(String, Script)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            scripts: Vec::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn on<F>(self, program: &str, script: F) -> Self
    where
        F: Fn(&ToolInvocation, &Path) -> Option<i32> + Send + Sync + 'static,
    {
        self.on_with_stderr(program, move |inv, work_dir| (script(inv, work_dir), String::new()))
    }

    /// Like `on`, for programs whose stderr is read back by the pipeline
    pub fn on_with_stderr<F>(mut self, program: &str, script: F) -> Self
    where
        F: Fn(&ToolInvocation, &Path) -> (Option<i32>, String) + Send + Sync + 'static,
    {
        self.scripts.push((program.to_string(), Box::new(script)));
        self
    }

    /// Command lines seen so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl ToolRunner for ScriptedRunner {
    fn run(&self, invocation: &ToolInvocation, work_dir: &Path) -> anyhow::Result<ToolOutput> {
        self.calls.lock().push(invocation.command_line());
        let (exit_code, stderr) = self
            .scripts
            .iter()
            .find(|(program, _)| *program == invocation.program)
            .map(|(_, script)| script(invocation, work_dir))
            .unwrap_or((Some(1), String::new()));
        Ok(ToolOutput {
            exit_code,
            stderr,
            elapsed: Duration::from_millis(5),
            ..ToolOutput::default()
        })
    }
}

pub fn fastq_records(ids: &[String], read_len: usize) -> String {
    ids.iter()
        .map(|id| format!("{id}\n{}\n+\n{}\n", "ACGT".repeat(read_len / 4 + 1)[..read_len].to_string(), "I".repeat(read_len)))
        .collect()
}

/// Write `n` reads with Illumina-style headers ending in `/mate`
pub fn write_illumina_fastq(path: &Path, n: usize, mate: u8, read_len: usize) {
    let ids: Vec<String> = (0..n)
        .map(|i| format!("@M00123:8:000000000-A1B2C:1:1101:{}:2000/{}", 1000 + i, mate))
        .collect();
    std::fs::write(path, fastq_records(&ids, read_len)).unwrap();
}

/// Write `n` long reads with Nanopore-style headers
pub fn write_nanopore_fastq(path: &Path, n: usize, read_len: usize) {
    let ids: Vec<String> = (0..n)
        .map(|i| format!("@d5edc711-3388-4510-ace0-5d39d0d7{i:04} runid=999acb6b read={i} ch=446 start_time=2017"))
        .collect();
    std::fs::write(path, fastq_records(&ids, read_len)).unwrap();
}

/// Write a FASTA file of `(name, length)` contigs
pub fn write_contigs(path: &Path, contigs: &[(&str, usize)]) {
    let text: String = contigs
        .iter()
        .map(|(name, len)| format!(">{name}\n{}\n", "ACGT".repeat(len / 4 + 1)[..*len].to_string()))
        .collect();
    std::fs::write(path, text).unwrap();
}
