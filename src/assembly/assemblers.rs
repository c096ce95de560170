//! Assembler invocations
//!
//! Builds the command for Unicycler, Canu or the SPAdes family from the live
//! read sets, runs it, and collects contigs and graph under canonical names:
//! `contigs.fasta` in the working directory and
//! `<prefix>assembly_graph.gfa` in the details directory.

use bio::io::fasta;
use regex::Regex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use super::dataset::{build_dataset, write_dataset};
use super::recipe::Recipe;
use crate::core::Platform;
use crate::pipeline::context::{file_size, move_file, PipelineContext};
use crate::pipeline::tools::ToolInvocation;
use crate::reads::ReadRegistry;

pub const CONTIGS_FILE: &str = "contigs.fasta";
const DATASET_FILE: &str = "spades_dataset.yaml";

/// Assembler inputs that do not come from the registry
#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub genome_size: String,
    pub min_contig_length: usize,
    pub trusted_contigs: Option<PathBuf>,
    pub untrusted_contigs: Option<PathBuf>,
}

impl Default for AssemblyOptions {
    fn default() -> Self {
        Self {
            genome_size: "5m".to_string(),
            min_contig_length: 300,
            trusted_contigs: None,
            untrusted_contigs: None,
        }
    }
}

/// What the assembler run looked like, for run details
#[derive(Debug, Clone, Default, Serialize)]
pub struct AssemblyRecord {
    pub assembler: String,
    pub command_line: String,
    pub elapsed_secs: f64,
    pub assembly_elapsed_time: String,
    pub contigs_size: Option<u64>,
    pub restarted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AssemblyOutcome {
    /// `contigs.fasta` when the assembler produced contigs
    pub contigs: Option<String>,
    pub graph: Option<PathBuf>,
    /// 1-based positions of contigs the assembler marked circular
    pub circular_contigs: Vec<usize>,
    pub record: AssemblyRecord,
    pub problems: Vec<String>,
}

impl AssemblyOutcome {
    /// No contigs; `problem` is appended to the problems collected so far
    fn failed(mut record: AssemblyRecord, mut problems: Vec<String>, problem: impl Into<String>) -> Self {
        let problem = problem.into();
        warn!("❌ {}", problem);
        record.outcome = Some(problem.clone());
        problems.push(problem);
        Self {
            record,
            problems,
            ..Self::default()
        }
    }
}

/// Human-readable run time
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 3600.0 {
        format!("{:.1} minutes", secs / 60.0)
    } else {
        format!("{:.2} hours", secs / 3600.0)
    }
}

/// Run the assembler for a resolved recipe
pub fn assemble(
    ctx: &PipelineContext,
    recipe: Recipe,
    registry: &ReadRegistry,
    options: &AssemblyOptions,
) -> AssemblyOutcome {
    info!("🚀 Assembling with {}", recipe);
    match recipe {
        Recipe::Unicycler => run_unicycler(ctx, registry, options),
        Recipe::Canu => run_canu(ctx, registry, options),
        r if r.is_spades() => run_spades(ctx, recipe, registry, options),
        other => AssemblyOutcome::failed(
            AssemblyRecord::default(),
            Vec::new(),
            format!("recipe {other} must be resolved before assembly"),
        ),
    }
}

fn record_for(assembler: &str, invocation: &ToolInvocation, elapsed: Duration) -> AssemblyRecord {
    AssemblyRecord {
        assembler: assembler.to_string(),
        command_line: invocation.command_line(),
        elapsed_secs: elapsed.as_secs_f64(),
        assembly_elapsed_time: format_elapsed(elapsed),
        ..AssemblyRecord::default()
    }
}

/// Move a tool output into details under `<prefix><dest>` if it exists
fn keep_in_details(ctx: &PipelineContext, name: &str, dest: &str) -> Option<PathBuf> {
    if !ctx.work_path(name).exists() {
        return None;
    }
    match ctx.move_to_details(name, dest) {
        Ok(path) => Some(path),
        Err(e) => {
            warn!("could not keep {}: {:#}", name, e);
            None
        }
    }
}

/// Rename the assembler's contigs to the canonical name
fn adopt_contigs(ctx: &PipelineContext, produced: &str, outcome: &mut AssemblyOutcome) {
    let target = ctx.work_path(CONTIGS_FILE);
    if produced != CONTIGS_FILE {
        if let Err(e) = move_file(&ctx.work_path(produced), &target) {
            outcome.problems.push(format!("could not rename {produced}: {e:#}"));
            return;
        }
    }
    outcome.record.contigs_size = Some(file_size(&target));
    outcome.contigs = Some(CONTIGS_FILE.to_string());
}

pub fn run_unicycler(ctx: &PipelineContext, registry: &ReadRegistry, options: &AssemblyOptions) -> AssemblyOutcome {
    let mut problems = Vec::new();
    let mut short_pair: Option<(String, String)> = None;
    let mut unpaired: Option<String> = None;
    let mut long: Option<String> = None;

    for set in registry.live_read_sets() {
        let replaced = match (set.is_short(), set.files.as_slice()) {
            (true, [a, b]) => short_pair.replace((a.clone(), b.clone())).map(|(a, b)| format!("{a}:{b}")),
            (true, [f]) => unpaired.replace(f.clone()),
            (false, [f, ..]) => long.replace(f.clone()),
            _ => None,
        };
        if let Some(dropped) = replaced {
            problems.push(format!(
                "unicycler takes one read set per class, {} replaces {}",
                set.id, dropped
            ));
        }
    }

    let mut inv = ToolInvocation::new("unicycler", "unicycler")
        .arg("-t")
        .arg(ctx.threads.to_string())
        .args(["-o", "."]);
    if options.min_contig_length > 0 {
        inv = inv.arg("--min_fasta_length").arg(options.min_contig_length.to_string());
    }
    inv = inv.args(["--keep", "0", "--no_pilon"]);
    if let Some((a, b)) = &short_pair {
        inv = inv.args(["--short1", a.as_str(), "--short2", b.as_str()]);
    }
    if let Some(u) = &unpaired {
        inv = inv.args(["--unpaired", u.as_str()]);
    }
    if let Some(l) = &long {
        inv = inv.args(["--long", l.as_str()]);
    }
    if short_pair.is_none() && unpaired.is_none() && long.is_none() {
        let record = record_for("unicycler", &inv, Duration::ZERO);
        return AssemblyOutcome::failed(record, problems, "no read sets available for unicycler");
    }

    let output = ctx.run_tool(&inv);
    let mut outcome = AssemblyOutcome {
        record: record_for("unicycler", &inv, output.elapsed),
        problems,
        ..AssemblyOutcome::default()
    };
    let log = keep_in_details(ctx, "unicycler.log", "unicycler.log");

    let assembly = ctx.work_path("assembly.fasta");
    if !assembly.exists() {
        let log_name = log.map(|p| p.display().to_string()).unwrap_or_default();
        return AssemblyOutcome::failed(
            outcome.record,
            outcome.problems,
            format!("Unicycler failed to generate assembly file. Check {log_name}"),
        );
    }

    outcome.circular_contigs = std::fs::read_to_string(&assembly)
        .map(|text| circular_positions(&text))
        .unwrap_or_default();
    outcome.graph = keep_in_details(ctx, "assembly.gfa", "assembly_graph.gfa");
    adopt_contigs(ctx, "assembly.fasta", &mut outcome);
    outcome
}

/// 1-based positions of FASTA headers marked `circular=true`
pub fn circular_positions(assembly: &str) -> Vec<usize> {
    fasta::Reader::new(assembly.as_bytes())
        .records()
        .map_while(|record| record.ok())
        .enumerate()
        .filter(|(_, record)| record.desc().is_some_and(|desc| desc.contains("circular=true")))
        .map(|(i, _)| i + 1)
        .collect()
}

pub fn run_canu(ctx: &PipelineContext, registry: &ReadRegistry, options: &AssemblyOptions) -> AssemblyOutcome {
    let mut problems = Vec::new();
    let mut pacbio = Vec::new();
    for platform in [Platform::PacBio, Platform::Fasta] {
        for set in registry.live_for(platform) {
            if platform == Platform::Fasta {
                problems.push(format!(
                    "submitting fasta reads to canu, but calling them \"pacbio\": {}",
                    set.id
                ));
            }
            pacbio.extend(set.files.iter().cloned());
        }
    }
    let nanopore: Vec<String> = registry
        .live_for(Platform::Nanopore)
        .iter()
        .flat_map(|set| set.files.iter().cloned())
        .collect();

    let mut inv = ToolInvocation::new("canu", "canu")
        .args(["-d", ".", "-p", "canu", "useGrid=false"])
        .arg(format!("genomeSize={}", options.genome_size))
        .arg(format!("maxMemory={}", ctx.memory_gb))
        .arg(format!("maxThreads={}", ctx.threads))
        .arg("stopOnReadQuality=false");
    if !pacbio.is_empty() {
        inv = inv.arg("-pacbio-raw").args(pacbio.iter().cloned());
    }
    if !nanopore.is_empty() {
        inv = inv.arg("-nanopore-raw").args(nanopore.iter().cloned());
    }
    if pacbio.is_empty() && nanopore.is_empty() {
        return AssemblyOutcome::failed(
            record_for("canu", &inv, Duration::ZERO),
            problems,
            "no long read files available for canu",
        );
    }

    let output = ctx.run_tool(&inv);
    let mut outcome = AssemblyOutcome {
        record: record_for("canu", &inv, output.elapsed),
        problems,
        ..AssemblyOutcome::default()
    };
    keep_in_details(ctx, "canu.report", "canu_report.txt");

    if !ctx.work_path("canu.contigs.fasta").exists() {
        return AssemblyOutcome::failed(
            outcome.record,
            outcome.problems,
            format!("Canu failed to generate contigs file. Check {}canu_report.txt", ctx.prefix),
        );
    }
    outcome.graph = keep_in_details(ctx, "canu.contigs.gfa", "assembly_graph.gfa");
    adopt_contigs(ctx, "canu.contigs.fasta", &mut outcome);
    outcome
}

fn kmer_dir_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^K(\d+)$").ok()).as_ref()
}

/// K-mer sizes of the `K<n>` checkpoint directories, ascending
pub fn checkpoint_kmers(names: impl IntoIterator<Item = String>) -> Vec<u32> {
    let Some(pattern) = kmer_dir_pattern() else {
        return Vec::new();
    };
    let mut kmers: Vec<u32> = names
        .into_iter()
        .filter_map(|name| pattern.captures(&name).and_then(|c| c[1].parse().ok()))
        .collect();
    kmers.sort_unstable();
    kmers
}

/// Restart arguments that skip the highest k, if enough checkpoints exist
pub fn restart_arguments(kmers: &[u32]) -> Option<(String, String)> {
    if kmers.len() < 2 {
        return None;
    }
    let remaining = &kmers[..kmers.len() - 1];
    let restart_from = format!("k{}", remaining[remaining.len() - 1]);
    let list = remaining.iter().map(u32::to_string).collect::<Vec<_>>().join(",");
    Some((restart_from, list))
}

pub fn run_spades(
    ctx: &PipelineContext,
    recipe: Recipe,
    registry: &ReadRegistry,
    options: &AssemblyOptions,
) -> AssemblyOutcome {
    let mut problems = Vec::new();
    let has_iontorrent = !registry.live_for(Platform::IonTorrent).is_empty();
    if has_iontorrent && !registry.live_for(Platform::Illumina).is_empty() {
        problems.push(
            "SPAdes is not meant to process both Illumina and IonTorrent reads in the same run".to_string(),
        );
    }

    let dataset = build_dataset(registry);
    if let Err(e) = write_dataset(&dataset, &ctx.work_path(DATASET_FILE)) {
        return AssemblyOutcome::failed(AssemblyRecord::default(), problems, format!("{e:#}"));
    }

    let threads = ctx.threads.to_string();
    let memory = ctx.memory_gb.to_string();
    let mut inv = ToolInvocation::new("spades", "spades.py").args(["--threads", threads.as_str(), "-o", "."]);
    if let Some(flag) = recipe.spades_mode_flag() {
        inv = inv.arg(flag);
    }
    if has_iontorrent {
        inv = inv.arg("--iontorrent");
    }
    inv = inv.args(["--dataset", DATASET_FILE]);
    if let Some(trusted) = &options.trusted_contigs {
        inv = inv.arg("--trusted-contigs").arg(trusted.display().to_string());
    }
    if let Some(untrusted) = &options.untrusted_contigs {
        inv = inv.arg("--untrusted-contigs").arg(untrusted.display().to_string());
    }
    if ctx.memory_gb > 0 {
        inv = inv.args(["-m", memory.as_str()]);
    }

    let output = ctx.run_tool(&inv);
    let mut elapsed = output.elapsed;
    let mut record = record_for("spades", &inv, elapsed);

    if !output.success() && !ctx.work_path(CONTIGS_FILE).exists() {
        problems.push(format!(
            "spades return code = {:?}, see if we can restart",
            output.exit_code
        ));
        let names = std::fs::read_dir(&ctx.work_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.path().is_dir())
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if let Some((restart_from, kmers)) = restart_arguments(&checkpoint_kmers(names)) {
            let mut restart = ToolInvocation::new("spades restart", "spades.py").args([
                "-o",
                ".",
                "--restart-from",
                restart_from.as_str(),
                "-k",
                kmers.as_str(),
                "--threads",
                threads.as_str(),
            ]);
            if ctx.memory_gb > 0 {
                restart = restart.args(["-m", memory.as_str()]);
            }
            let retry = ctx.run_tool(&restart);
            elapsed += retry.elapsed;
            record = record_for("spades", &inv, elapsed);
            record.command_line = format!("{}; {}", inv.command_line(), restart.command_line());
            record.restarted = true;
        }
    }

    let mut outcome = AssemblyOutcome {
        record,
        problems,
        ..AssemblyOutcome::default()
    };
    let log = keep_in_details(ctx, "spades.log", "spades.log");
    outcome.graph = keep_in_details(ctx, "assembly_graph_with_scaffolds.gfa", "assembly_graph.gfa");

    if !ctx.work_path(CONTIGS_FILE).exists() {
        let log_name = log.map(|p| p.display().to_string()).unwrap_or_default();
        let mut failed = AssemblyOutcome::failed(
            outcome.record,
            outcome.problems,
            format!("SPAdes failed to generate contigs file. Check {log_name}"),
        );
        failed.graph = outcome.graph;
        return failed;
    }
    adopt_contigs(ctx, CONTIGS_FILE, &mut outcome);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circular_positions() {
        let fasta = ">1 length=100 circular=true\nACGT\n>2 length=50\nAC\n>3 circular=true\nA\n";
        assert_eq!(circular_positions(fasta), vec![1, 3]);
    }

    #[test]
    fn test_restart_skips_highest_k() {
        let kmers = checkpoint_kmers(
            ["K21", "K55", "K33", "misc", "K77x"]
                .into_iter()
                .map(String::from),
        );
        assert_eq!(kmers, vec![21, 33, 55]);
        assert_eq!(
            restart_arguments(&kmers),
            Some(("k33".to_string(), "21,33".to_string()))
        );
        assert_eq!(restart_arguments(&[21]), None);
    }

    #[test]
    fn test_elapsed_formatting() {
        assert_eq!(format_elapsed(Duration::from_secs(90)), "1.5 minutes");
        assert_eq!(format_elapsed(Duration::from_secs(7200)), "2.00 hours");
    }
}
