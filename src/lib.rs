//! # asm-forge - Read Intake and Genome Assembly Orchestration
//!
//! Classifies and pairs sequencing read files, registers them as read sets,
//! and drives external assemblers, polishers and aligners through a staged
//! pipeline that always leaves an auditable record of what was attempted.

pub mod assembly;
pub mod cli;
pub mod core;
pub mod pipeline;
pub mod qc;
pub mod reads;
pub mod utils;

// Re-export commonly used types at crate level
pub use crate::assembly::{AssemblyReport, Recipe, Stage, StageOrchestrator};
pub use crate::core::{Platform, ReadSet};
pub use crate::pipeline::{AssemblyPipeline, PipelineContext, ReadInputs, RunSummary};
pub use crate::reads::{PairFinder, ReadRegistry, RegisterOptions};

/// Result type used throughout the crate
pub type Result<T> = anyhow::Result<T>;

/// Error type used throughout the crate
pub type Error = anyhow::Error;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crate_result_type() -> Result<()> {
        let success: Result<i32> = Ok(42);
        let error: Result<i32> = Err(anyhow::anyhow!("test error"));

        assert_eq!(success?, 42);
        assert!(error.unwrap_err().to_string().contains("test error"));
        Ok(())
    }

    #[test]
    fn test_module_exports() {
        let set = ReadSet::new("reads.fq", vec!["reads.fq".to_string()], None);
        assert!(set.is_live());
        assert_eq!(set.platform, Platform::Unknown);
        assert_eq!(Recipe::default(), Recipe::Auto);
    }
}
