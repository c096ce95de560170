//! End-to-end assembly run
//!
//! Read intake (platform lists, accession groups, anonymous pairing),
//! optional trimming, the assembly stages, post-assembly assessment and the
//! run-details record.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::context::{move_file, PipelineContext};
use super::post_assembly::{run_bandage, run_quast, QuastReports};
use super::run_details::{run_details_path, FinalArtifacts, RunDetails};
use super::tools::ToolRunner;
use crate::assembly::{AssemblyStats, OrchestratorSettings, Recipe, Stage, StageOrchestrator};
use crate::core::Platform;
use crate::qc::ReadSampler;
use crate::reads::{
    group_by_accession, trim_short_reads, AccessionFiles, PairFinder, PairingOutcome, ReadRegistry,
    RegisterOptions,
};

/// Read inputs as given on the command line
#[derive(Debug, Clone, Default)]
pub struct ReadInputs {
    pub illumina: Vec<String>,
    pub iontorrent: Vec<String>,
    pub pacbio: Vec<String>,
    pub nanopore: Vec<String>,
    pub fasta: Vec<String>,
    /// Files without platform or pairing, or named after a run accession
    pub anonymous: Vec<String>,
    /// Items to treat as interleaved paired-end files
    pub interleaved: Vec<String>,
}

impl ReadInputs {
    pub fn is_empty(&self) -> bool {
        self.illumina.is_empty()
            && self.iontorrent.is_empty()
            && self.pacbio.is_empty()
            && self.nanopore.is_empty()
            && self.fasta.is_empty()
            && self.anonymous.is_empty()
    }

    fn by_platform(&self) -> [(Platform, &[String]); 5] {
        [
            (Platform::Illumina, &self.illumina),
            (Platform::IonTorrent, &self.iontorrent),
            (Platform::PacBio, &self.pacbio),
            (Platform::Nanopore, &self.nanopore),
            (Platform::Fasta, &self.fasta),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub prefix: String,
    pub threads: usize,
    pub memory_gb: usize,
    pub bytes_to_sample: usize,
    pub trim: bool,
    pub quast: bool,
    pub bandage: bool,
    pub assembly: OrchestratorSettings,
    /// Log file written by the subscriber, recorded in run details
    pub log_file: Option<PathBuf>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("p3_assembly"),
            prefix: String::new(),
            threads: 4,
            memory_gb: 250,
            bytes_to_sample: crate::core::DEFAULT_BYTES_TO_SAMPLE,
            trim: false,
            quast: false,
            bandage: false,
            assembly: OrchestratorSettings::default(),
            log_file: None,
        }
    }
}

/// What the caller needs after a run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub work_dir: PathBuf,
    pub recipe: Recipe,
    pub final_stage: Stage,
    pub contigs: Option<PathBuf>,
    pub contig_stats: Option<AssemblyStats>,
    pub read_sets: usize,
    pub problems: Vec<String>,
    pub run_details: Option<PathBuf>,
    pub elapsed: Duration,
}

pub struct AssemblyPipeline {
    options: PipelineOptions,
    runner: Arc<dyn ToolRunner>,
}

impl AssemblyPipeline {
    pub fn new(options: PipelineOptions, runner: Arc<dyn ToolRunner>) -> Self {
        Self { options, runner }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Record where the subscriber writes the run log
    pub fn set_log_file(&mut self, path: PathBuf) {
        self.options.log_file = Some(path);
    }

    /// Create the fresh working directory layout for a run
    pub fn prepare(&self) -> Result<PipelineContext> {
        PipelineContext::create(
            &self.options.output_dir,
            &self.options.prefix,
            self.options.threads,
            self.options.memory_gb,
            Arc::clone(&self.runner),
        )
    }

    pub fn run(&self, inputs: &ReadInputs) -> Result<RunSummary> {
        let ctx = self.prepare()?;
        Ok(self.run_in(&ctx, inputs))
    }

    /// Run every stage inside an existing context. Stage failures end up in
    /// the summary and run details, never as errors.
    pub fn run_in(&self, ctx: &PipelineContext, inputs: &ReadInputs) -> RunSummary {
        let started_at = Utc::now();
        info!("🚀 Starting assembly run in {}", ctx.work_dir.display());

        let sampler = ReadSampler::new(self.options.bytes_to_sample);
        let mut registry = ReadRegistry::with_sampler(&ctx.work_dir, sampler);
        let pairing = self.register_inputs(ctx, &mut registry, inputs);
        info!("📚 {} read sets registered", registry.len());

        let trimmed = if self.options.trim {
            trim_short_reads(ctx, &mut registry)
        } else {
            Vec::new()
        };

        let report = StageOrchestrator::new(ctx, self.options.assembly.clone()).run(&registry);
        let succeeded = report.succeeded();

        let mut artifacts = FinalArtifacts {
            log_file: self.options.log_file.clone(),
            below_threshold_contigs: report
                .contig_filtering
                .as_ref()
                .and_then(|f| f.below_threshold_file.clone()),
            ..FinalArtifacts::default()
        };
        let mut problems: Vec<String> = registry.problems().to_vec();
        problems.extend(report.problems.iter().cloned());

        let mut quast: Option<QuastReports> = None;
        if let Some(contigs) = report.contigs.as_ref().filter(|_| succeeded) {
            if self.options.quast {
                quast = Some(run_quast(ctx, contigs, self.options.assembly.min_contig_length));
            }
            let saved = ctx.save_dir.join(format!("{}contigs.fasta", ctx.prefix));
            match move_file(&ctx.work_path(contigs), &saved) {
                Ok(()) => {
                    info!("🧬 Final contigs: {}", saved.display());
                    artifacts.contigs = Some(saved);
                }
                Err(e) => problems.push(format!("could not save final contigs: {e:#}")),
            }
        }

        let graph = ctx.details_path("assembly_graph.gfa");
        if graph.exists() {
            if self.options.bandage && succeeded {
                artifacts.graph_plot = run_bandage(ctx, &graph);
            }
            artifacts.assembly_graph = Some(graph);
        }

        let details = RunDetails {
            version: env!("CARGO_PKG_VERSION"),
            started_at,
            finished_at: Utc::now(),
            elapsed_secs: ctx.elapsed().as_secs_f64(),
            work_dir: &ctx.work_dir,
            prefix: &ctx.prefix,
            threads: ctx.threads,
            memory_gb: ctx.memory_gb,
            reads: &registry,
            pairing: pairing.as_ref(),
            trimmed_read_sets: &trimmed,
            assembly: &report,
            quast: quast.as_ref(),
            tools: ctx.tool_records(),
            artifacts: &artifacts,
        };
        let details_path = run_details_path(ctx);
        let run_details = match details.write(&details_path) {
            Ok(()) => Some(details_path),
            Err(e) => {
                warn!("{:#}", e);
                problems.push(format!("{e:#}"));
                None
            }
        };

        RunSummary {
            work_dir: ctx.work_dir.clone(),
            recipe: report.recipe,
            final_stage: report.final_stage,
            contigs: artifacts.contigs,
            contig_stats: report.contig_filtering.filter(|_| succeeded).map(|f| f.kept_stats),
            read_sets: registry.len(),
            problems,
            run_details,
            elapsed: ctx.elapsed(),
        }
    }

    fn register_inputs(
        &self,
        ctx: &PipelineContext,
        registry: &mut ReadRegistry,
        inputs: &ReadInputs,
    ) -> Option<PairingOutcome> {
        let is_interleaved = |item: &str| inputs.interleaved.iter().any(|i| i == item);

        for (platform, items) in inputs.by_platform() {
            for item in items {
                let options = RegisterOptions {
                    platform: Some(platform),
                    interleaved: platform.is_short_read() && is_interleaved(item),
                    supersedes: None,
                };
                if let Err(e) = registry.register(item, options) {
                    warn!("{} not registered: {}", item, e);
                }
            }
        }

        if inputs.anonymous.is_empty() {
            return None;
        }
        let (accessions, rest) = group_by_accession(&inputs.anonymous);
        for (accession, files) in accessions {
            registry.register_accession(&AccessionFiles {
                accession,
                files,
                platform: None,
                layout: None,
            });
        }
        if rest.is_empty() {
            return None;
        }

        let finder = match PairFinder::new(*registry.sampler(), ctx.threads) {
            Ok(finder) => finder,
            Err(e) => {
                registry.add_problem(format!("could not start pair finder: {e:#}"));
                for item in &rest {
                    if let Err(e) = registry.register(item, RegisterOptions::default()) {
                        warn!("{} not registered: {}", item, e);
                    }
                }
                return None;
            }
        };

        let outcome = finder.find_pairs(&rest);
        for problem in &outcome.problems {
            registry.add_problem(problem.clone());
        }
        for note in &outcome.transformations {
            registry.add_transformation(note.clone());
        }
        for spec in outcome.pairs.iter().chain(&outcome.singles) {
            let platform = outcome.platform_of(spec);
            let options = RegisterOptions {
                platform: (platform != Platform::Unknown).then_some(platform),
                interleaved: is_interleaved(spec),
                supersedes: None,
            };
            if let Err(e) = registry.register(spec, options) {
                warn!("{} not registered: {}", spec, e);
            }
        }
        Some(outcome)
    }
}
