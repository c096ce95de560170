//! Assembly stages
//!
//! Recipe selection, assembler invocation, polishing, coverage estimation and
//! contig filtering, tied together by [`StageOrchestrator`].

pub mod alignment;
pub mod assemblers;
pub mod contig_filter;
pub mod coverage;
pub mod dataset;
pub mod orchestrator;
pub mod polish;
pub mod recipe;

// Re-export the orchestration surface
pub use assemblers::{assemble, AssemblyOptions, AssemblyOutcome, AssemblyRecord, CONTIGS_FILE};
pub use contig_filter::{filter_contigs, AssemblyStats, ContigCoverage, FilterReport, FilterThresholds};
pub use coverage::{ContigDepth, CoverageEstimator, CoverageTable};
pub use orchestrator::{AssemblyReport, OrchestratorSettings, Stage, StageOrchestrator, StageTransition};
pub use polish::{Pilon, PolishRound, Polished, Polisher, Racon};
pub use recipe::{select_recipe, Recipe};
