//! Pipeline plumbing
//!
//! Run context, the external tool seam, post-assembly assessment, run details
//! and the end-to-end [`AssemblyPipeline`].

pub mod assembly_pipeline;
pub mod context;
pub mod post_assembly;
pub mod run_details;
pub mod tools;

pub use assembly_pipeline::{AssemblyPipeline, PipelineOptions, ReadInputs, RunSummary};
pub use context::{PipelineContext, ToolRecord};
pub use post_assembly::{run_bandage, run_quast, QuastReports};
pub use run_details::{FinalArtifacts, RunDetails, RUN_DETAILS_FILE};
pub use tools::{OutputTarget, ProcessRunner, ToolInvocation, ToolOutput, ToolRunner};
