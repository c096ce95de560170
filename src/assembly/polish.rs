//! Contig polishing
//!
//! Long reads polish with Racon, short reads with Pilon. Both run through the
//! [`Polisher`] trait so the iteration policy in [`polish_with_read_sets`] is
//! independent of the tool behind it.
//!
//! # Loop policy
//! - Each live read set gets up to `max_iterations` rounds
//! - A failed round ends polishing with that read set, the contigs from the
//!   last good round stay current
//! - With `stop_when_unchanged`, a round reporting zero changes ends the loop

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::alignment::{contig_stem, Aligner};
use crate::core::ReadSet;
use crate::pipeline::context::{file_size, PipelineContext};
use crate::pipeline::tools::ToolInvocation;

/// Outputs smaller than this are treated as empty
pub const MIN_POLISHED_SIZE: u64 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Polished {
    /// Polished contigs, relative to the working directory
    pub contigs: String,
    /// Corrections made, when the polisher reports them
    pub changes: Option<usize>,
}

pub trait Polisher: Send + Sync {
    fn name(&self) -> &'static str;

    fn polish(&self, ctx: &PipelineContext, contigs: &str, reads: &ReadSet) -> Result<Polished>;
}

/// Audit entry for one polishing round
#[derive(Debug, Clone, Serialize)]
pub struct PolishRound {
    pub polisher: String,
    pub read_set: String,
    /// 1-based
    pub iteration: usize,
    pub input: String,
    pub output: Option<String>,
    pub changes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Run `polisher` over each read set in turn and return the final contigs
pub fn polish_with_read_sets(
    ctx: &PipelineContext,
    polisher: &dyn Polisher,
    read_sets: &[&ReadSet],
    mut contigs: String,
    max_iterations: usize,
    stop_when_unchanged: bool,
    rounds: &mut Vec<PolishRound>,
) -> String {
    for reads in read_sets {
        for iteration in 1..=max_iterations {
            info!(
                "🧽 {} round {}/{} with {} on {}",
                polisher.name(),
                iteration,
                max_iterations,
                reads.id,
                contigs
            );
            let mut round = PolishRound {
                polisher: polisher.name().to_string(),
                read_set: reads.id.clone(),
                iteration,
                input: contigs.clone(),
                output: None,
                changes: None,
                failure: None,
            };

            let result = polisher.polish(ctx, &contigs, reads).and_then(|polished| {
                let size = file_size(&ctx.work_path(&polished.contigs));
                if size < MIN_POLISHED_SIZE {
                    bail!("{} output {} is only {} bytes", polisher.name(), polished.contigs, size);
                }
                Ok(polished)
            });

            match result {
                Ok(polished) => {
                    round.output = Some(polished.contigs.clone());
                    round.changes = polished.changes;
                    rounds.push(round);
                    contigs = polished.contigs;
                    if stop_when_unchanged && polished.changes == Some(0) {
                        info!("✅ {} made no changes, done with {}", polisher.name(), reads.id);
                        break;
                    }
                }
                Err(e) => {
                    warn!("{} failed with {}: {:#}", polisher.name(), reads.id, e);
                    round.failure = Some(format!("{e:#}"));
                    rounds.push(round);
                    break;
                }
            }
        }
    }
    contigs
}

/// Long-read polishing with minimap2 + racon
#[derive(Debug, Default, Clone, Copy)]
pub struct Racon;

impl Polisher for Racon {
    fn name(&self) -> &'static str {
        "racon"
    }

    fn polish(&self, ctx: &PipelineContext, contigs: &str, reads: &ReadSet) -> Result<Polished> {
        let sam = Aligner::new(ctx).map_long(contigs, reads)?;
        let output = format!("{}.racon.fasta", contig_stem(contigs));
        let reads_file = reads
            .files
            .first()
            .with_context(|| format!("read set {} has no files", reads.id))?;

        let racon = ToolInvocation::new("racon", "racon")
            .arg("-t")
            .arg(ctx.threads.to_string())
            .args(["-u", reads_file.as_str(), sam.as_str(), contigs])
            .stdout_to(&output);
        let result = ctx.run_tool(&racon);
        if !result.success() {
            bail!("racon returned {:?}", result.exit_code);
        }
        Ok(Polished {
            contigs: output,
            changes: None,
        })
    }
}

/// Short-read polishing with bowtie2 + pilon
#[derive(Debug, Clone)]
pub struct Pilon {
    /// `.jar` path, or an executable wrapper script
    pub program: Option<PathBuf>,
    pub memory_gb: usize,
}

impl Pilon {
    pub fn new(program: Option<PathBuf>, memory_gb: usize) -> Self {
        Self { program, memory_gb }
    }

    fn invocation(&self, program: &Path) -> ToolInvocation {
        let program = program.display().to_string();
        if program.ends_with(".jar") {
            ToolInvocation::new("pilon", "java")
                .arg(format!("-Xmx{}G", self.memory_gb.max(1)))
                .args(["-jar", program.as_str()])
        } else {
            ToolInvocation::new("pilon", program)
        }
    }
}

impl Polisher for Pilon {
    fn name(&self) -> &'static str {
        "pilon"
    }

    fn polish(&self, ctx: &PipelineContext, contigs: &str, reads: &ReadSet) -> Result<Polished> {
        let program = match &self.program {
            Some(p) if p.exists() => p,
            Some(p) => bail!("jarfile {} not found when processing {}, giving up", p.display(), reads.id),
            None => bail!("no pilon jar configured, cannot polish with {}", reads.id),
        };

        let aligner = Aligner::new(ctx);
        let bam = aligner.sam_to_bam(&aligner.map_short(contigs, reads)?)?;
        let prefix = format!("{}.pilon", contig_stem(contigs));
        let reads_flag = if reads.is_pair() || reads.interleaved {
            "--frags"
        } else {
            "--unpaired"
        };

        let pilon = self
            .invocation(program)
            .args(["--genome", contigs, reads_flag, bam.as_str()])
            .args(["--outdir", ".", "--output", prefix.as_str(), "--changes"])
            .arg("--threads")
            .arg(ctx.threads.to_string());
        let result = ctx.run_tool(&pilon);
        if !result.success() {
            bail!("pilon returned {:?}", result.exit_code);
        }

        let changes_file = ctx.work_path(format!("{prefix}.changes"));
        let changes = std::fs::read_to_string(&changes_file)
            .with_context(|| format!("Failed to read {}", changes_file.display()))?
            .lines()
            .count();
        info!("pilon made {} changes", changes);
        Ok(Polished {
            contigs: format!("{prefix}.fasta"),
            changes: Some(changes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pilon_invocation_kind() {
        let jar = Pilon::new(None, 32).invocation(Path::new("/opt/pilon.jar"));
        assert_eq!(jar.command_line(), "java -Xmx32G -jar /opt/pilon.jar");
        let script = Pilon::new(None, 32).invocation(Path::new("/usr/bin/pilon"));
        assert_eq!(script.program, "/usr/bin/pilon");
    }
}
