//! Assembly stage orchestration
//!
//! Drives one run through an explicit state machine:
//!
//! ```text
//! SelectRecipe -> Assemble -> PolishLong -> PolishShort -> FilterContigs -> Done
//!                    |
//!                    +-> Failed (no contigs)
//! ```
//!
//! Every transition is recorded with its reason so the run details show how
//! the run progressed and where it stopped.

use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

use super::assemblers::{assemble, AssemblyOptions, AssemblyRecord};
use super::contig_filter::{filter_contigs, ContigCoverage, FilterReport, FilterThresholds};
use super::coverage::{CoverageEstimator, CoverageTable};
use super::polish::{polish_with_read_sets, Pilon, PolishRound, Polisher, Racon};
use super::recipe::{select_recipe, Recipe};
use crate::core::{Platform, ReadSet};
use crate::pipeline::context::{file_size, PipelineContext};
use crate::reads::ReadRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    SelectRecipe,
    Assemble,
    PolishLong,
    PolishShort,
    FilterContigs,
    Done,
    Failed,
}

impl Stage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub reason: String,
    /// Seconds since the run started
    pub elapsed_secs: f64,
}

/// Assembly, polishing and filtering settings for one run
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub recipe: Recipe,
    pub genome_size: String,
    pub min_contig_length: usize,
    pub min_contig_coverage: f64,
    pub trusted_contigs: Option<PathBuf>,
    pub untrusted_contigs: Option<PathBuf>,
    pub racon_iterations: usize,
    pub pilon_iterations: usize,
    pub pilon_jar: Option<PathBuf>,
    pub pilon_memory_gb: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            recipe: Recipe::Auto,
            genome_size: "5m".to_string(),
            min_contig_length: 300,
            min_contig_coverage: 5.0,
            trusted_contigs: None,
            untrusted_contigs: None,
            racon_iterations: 2,
            pilon_iterations: 2,
            pilon_jar: None,
            pilon_memory_gb: 32,
        }
    }
}

impl OrchestratorSettings {
    pub fn assembly_options(&self) -> AssemblyOptions {
        AssemblyOptions {
            genome_size: self.genome_size.clone(),
            min_contig_length: self.min_contig_length,
            trusted_contigs: self.trusted_contigs.clone(),
            untrusted_contigs: self.untrusted_contigs.clone(),
        }
    }

    pub fn thresholds(&self) -> FilterThresholds {
        FilterThresholds {
            min_length: self.min_contig_length,
            min_coverage: self.min_contig_coverage,
        }
    }
}

/// Everything the assembly stages produced
#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub recipe: Recipe,
    pub assembly: Option<AssemblyRecord>,
    pub polishing: Vec<PolishRound>,
    pub contig_filtering: Option<FilterReport>,
    pub short_read_baseline_depth: Option<f64>,
    pub long_read_baseline_depth: Option<f64>,
    pub circular_contigs: Vec<usize>,
    pub stage_trail: Vec<StageTransition>,
    pub problems: Vec<String>,
    pub post_assembly_transformations: Vec<String>,
    /// Final contigs in the working directory
    pub contigs: Option<String>,
    pub graph: Option<PathBuf>,
    pub final_stage: Stage,
}

impl AssemblyReport {
    fn new(recipe: Recipe) -> Self {
        Self {
            recipe,
            assembly: None,
            polishing: Vec::new(),
            contig_filtering: None,
            short_read_baseline_depth: None,
            long_read_baseline_depth: None,
            circular_contigs: Vec::new(),
            stage_trail: Vec::new(),
            problems: Vec::new(),
            post_assembly_transformations: Vec::new(),
            contigs: None,
            graph: None,
            final_stage: Stage::SelectRecipe,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.final_stage == Stage::Done && self.contigs.is_some()
    }
}

pub struct StageOrchestrator<'a> {
    ctx: &'a PipelineContext,
    settings: OrchestratorSettings,
    long_polisher: Box<dyn Polisher>,
    short_polisher: Box<dyn Polisher>,
}

impl<'a> StageOrchestrator<'a> {
    /// Orchestrator polishing with Racon and Pilon
    pub fn new(ctx: &'a PipelineContext, settings: OrchestratorSettings) -> Self {
        let pilon = Pilon::new(settings.pilon_jar.clone(), settings.pilon_memory_gb);
        Self::with_polishers(ctx, settings, Box::new(Racon), Box::new(pilon))
    }

    pub fn with_polishers(
        ctx: &'a PipelineContext,
        settings: OrchestratorSettings,
        long_polisher: Box<dyn Polisher>,
        short_polisher: Box<dyn Polisher>,
    ) -> Self {
        Self {
            ctx,
            settings,
            long_polisher,
            short_polisher,
        }
    }

    pub fn run(&self, registry: &ReadRegistry) -> AssemblyReport {
        let mut report = AssemblyReport::new(self.settings.recipe);
        let mut stage = Stage::SelectRecipe;

        while !stage.is_terminal() {
            let (next, reason) = match stage {
                Stage::SelectRecipe => self.select(registry, &mut report),
                Stage::Assemble => self.assemble(registry, &mut report),
                Stage::PolishLong => self.polish_long(registry, &mut report),
                Stage::PolishShort => self.polish_short(registry, &mut report),
                Stage::FilterContigs => self.filter(registry, &mut report),
                Stage::Done | Stage::Failed => break,
            };
            info!("➡️  {:?} -> {:?}: {}", stage, next, reason);
            report.stage_trail.push(StageTransition {
                from: stage,
                to: next,
                reason,
                elapsed_secs: self.ctx.elapsed().as_secs_f64(),
            });
            stage = next;
        }

        report.final_stage = stage;
        if stage == Stage::Failed {
            report.contigs = None;
        }
        report
    }

    fn select(&self, registry: &ReadRegistry, report: &mut AssemblyReport) -> (Stage, String) {
        report.recipe = select_recipe(self.settings.recipe, registry);
        let reason = if self.settings.recipe == Recipe::Auto {
            format!("auto selected {}", report.recipe)
        } else {
            format!("requested {}", report.recipe)
        };
        (Stage::Assemble, reason)
    }

    fn assemble(&self, registry: &ReadRegistry, report: &mut AssemblyReport) -> (Stage, String) {
        let outcome = assemble(self.ctx, report.recipe, registry, &self.settings.assembly_options());
        report.assembly = Some(outcome.record);
        report.problems.extend(outcome.problems);
        report.circular_contigs = outcome.circular_contigs;
        report.graph = outcome.graph;

        match outcome.contigs {
            Some(contigs) if file_size(&self.ctx.work_path(&contigs)) > 0 => {
                let reason = format!("{} produced {}", report.recipe, contigs);
                report.contigs = Some(contigs);
                (Stage::PolishLong, reason)
            }
            Some(contigs) => (Stage::Failed, format!("{} produced an empty {}", report.recipe, contigs)),
            None => (Stage::Failed, format!("{} produced no contigs", report.recipe)),
        }
    }

    fn polish_long(&self, registry: &ReadRegistry, report: &mut AssemblyReport) -> (Stage, String) {
        let sets: Vec<&ReadSet> = registry
            .live_read_sets()
            .into_iter()
            .filter(|set| set.is_long() && set.platform != Platform::Fasta)
            .collect();
        let reason = self.polish(
            self.long_polisher.as_ref(),
            &sets,
            self.settings.racon_iterations,
            false,
            report,
        );
        (Stage::PolishShort, reason)
    }

    fn polish_short(&self, registry: &ReadRegistry, report: &mut AssemblyReport) -> (Stage, String) {
        let sets: Vec<&ReadSet> = registry
            .live_read_sets()
            .into_iter()
            .filter(|set| set.is_short() && set.platform != Platform::Fasta)
            .collect();
        let reason = self.polish(
            self.short_polisher.as_ref(),
            &sets,
            self.settings.pilon_iterations,
            true,
            report,
        );
        (Stage::FilterContigs, reason)
    }

    fn polish(
        &self,
        polisher: &dyn Polisher,
        sets: &[&ReadSet],
        iterations: usize,
        stop_when_unchanged: bool,
        report: &mut AssemblyReport,
    ) -> String {
        let Some(contigs) = report.contigs.clone() else {
            return "no contigs to polish".to_string();
        };
        if iterations == 0 || sets.is_empty() {
            return format!("{} skipped", polisher.name());
        }

        let first_round = report.polishing.len();
        let polished = polish_with_read_sets(
            self.ctx,
            polisher,
            sets,
            contigs,
            iterations,
            stop_when_unchanged,
            &mut report.polishing,
        );
        for round in &report.polishing[first_round..] {
            match (&round.output, &round.failure) {
                (Some(output), _) => report.post_assembly_transformations.push(format!(
                    "{} iteration {} with {}: {} -> {}",
                    round.polisher, round.iteration, round.read_set, round.input, output
                )),
                (None, Some(failure)) => report.problems.push(format!(
                    "{} iteration {} with {} failed: {}",
                    round.polisher, round.iteration, round.read_set, failure
                )),
                (None, None) => {}
            }
        }
        let rounds = report.polishing.len() - first_round;
        report.contigs = Some(polished.clone());
        format!("{} ran {} rounds, contigs now {}", polisher.name(), rounds, polished)
    }

    fn coverage_pass(&self, contigs: &str, sets: &[&ReadSet], label: &str) -> (Option<CoverageTable>, Vec<String>) {
        let mut problems = Vec::new();
        if sets.is_empty() {
            return (None, problems);
        }
        match CoverageEstimator::depth_pass(self.ctx, contigs, sets, label, &mut problems) {
            Ok(table) => (table, problems),
            Err(e) => {
                problems.push(format!("{label} coverage failed: {e:#}"));
                (None, problems)
            }
        }
    }

    fn filter(&self, registry: &ReadRegistry, report: &mut AssemblyReport) -> (Stage, String) {
        let Some(contigs) = report.contigs.clone() else {
            return (Stage::Failed, "no contigs to filter".to_string());
        };
        let live = registry.live_read_sets();
        let short_sets: Vec<&ReadSet> = live.iter().copied().filter(|s| s.is_short()).collect();
        let long_sets: Vec<&ReadSet> = live
            .iter()
            .copied()
            .filter(|s| s.is_long() && s.platform != Platform::Fasta)
            .collect();

        let ((short, short_problems), (long, long_problems)) = rayon::join(
            || self.coverage_pass(&contigs, &short_sets, "short_read"),
            || self.coverage_pass(&contigs, &long_sets, "long_read"),
        );
        report.problems.extend(short_problems);
        report.problems.extend(long_problems);
        report.short_read_baseline_depth = short.as_ref().map(|t| t.baseline);
        report.long_read_baseline_depth = long.as_ref().map(|t| t.baseline);

        let coverage = ContigCoverage {
            short: short.as_ref(),
            long: long.as_ref(),
        };
        let thresholds = self.settings.thresholds();
        match filter_contigs(self.ctx, &contigs, coverage, &report.circular_contigs, &thresholds) {
            Ok((Some(filtered), filter_report)) => {
                let reason = format!(
                    "kept {} of {} contigs",
                    filter_report.contigs_kept,
                    filter_report.contigs_kept + filter_report.contigs_below_threshold
                );
                report.post_assembly_transformations.push(format!(
                    "filter contigs: length >= {}, coverage >= {}: {} -> {}",
                    thresholds.min_length, thresholds.min_coverage, contigs, filtered
                ));
                report.contig_filtering = Some(filter_report);
                report.contigs = Some(filtered);
                (Stage::Done, reason)
            }
            Ok((None, filter_report)) => {
                let problem = format!(
                    "no contigs of {} passed filtering (length >= {}, coverage >= {})",
                    contigs, thresholds.min_length, thresholds.min_coverage
                );
                warn!("{}", problem);
                report.problems.push(problem.clone());
                report.contig_filtering = Some(filter_report);
                report.contigs = None;
                (Stage::Failed, problem)
            }
            Err(e) => {
                let problem = format!("contig filtering of {contigs} failed: {e:#}");
                warn!("{}", problem);
                report.problems.push(problem.clone());
                report.contigs = None;
                (Stage::Failed, problem)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tools::{ToolInvocation, ToolOutput, ToolRunner};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct FailingRunner;

    impl ToolRunner for FailingRunner {
        fn run(&self, _invocation: &ToolInvocation, _work_dir: &Path) -> anyhow::Result<ToolOutput> {
            Ok(ToolOutput {
                exit_code: Some(1),
                ..ToolOutput::default()
            })
        }
    }

    #[test]
    fn test_assembly_without_contigs_fails_run() {
        let input = tempdir().unwrap();
        let work = tempdir().unwrap();
        let reads = input.path().join("long.fastq");
        let seq = "ACGT".repeat(300);
        std::fs::write(&reads, format!("@r1\n{seq}\n+\n{}\n", "I".repeat(seq.len()))).unwrap();

        let ctx = PipelineContext::in_work_dir(work.path().to_path_buf(), "", 1, 1, Arc::new(FailingRunner)).unwrap();
        let mut registry = ReadRegistry::new(&ctx.work_dir);
        registry
            .register(
                reads.to_str().unwrap(),
                crate::reads::RegisterOptions::platform(Platform::Nanopore),
            )
            .unwrap();

        let report = StageOrchestrator::new(&ctx, OrchestratorSettings::default()).run(&registry);
        assert_eq!(report.recipe, Recipe::Canu);
        assert_eq!(report.final_stage, Stage::Failed);
        assert!(!report.succeeded());
        let stages: Vec<Stage> = report.stage_trail.iter().map(|t| t.to).collect();
        assert_eq!(stages, vec![Stage::Assemble, Stage::Failed]);
        assert!(!report.problems.is_empty());
    }
}
