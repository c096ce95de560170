//! Structured run-details record
//!
//! One JSON document per run with everything a downstream report needs: the
//! registry snapshot, the pairing pass, trimming, the assembly stages, every
//! tool invocation and the final artifacts.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

use super::context::{PipelineContext, ToolRecord};
use super::post_assembly::QuastReports;
use crate::assembly::AssemblyReport;
use crate::reads::{PairingOutcome, ReadRegistry};

pub const RUN_DETAILS_FILE: &str = "run_details.json";

/// Paths of what the run left in the save directory
#[derive(Debug, Clone, Default, Serialize)]
pub struct FinalArtifacts {
    pub contigs: Option<PathBuf>,
    pub assembly_graph: Option<PathBuf>,
    pub graph_plot: Option<PathBuf>,
    pub below_threshold_contigs: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
pub struct RunDetails<'a> {
    pub version: &'static str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub work_dir: &'a Path,
    pub prefix: &'a str,
    pub threads: usize,
    pub memory_gb: usize,
    pub reads: &'a ReadRegistry,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pairing: Option<&'a PairingOutcome>,
    pub trimmed_read_sets: &'a [String],
    pub assembly: &'a AssemblyReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quast: Option<&'a QuastReports>,
    pub tools: Vec<ToolRecord>,
    pub artifacts: &'a FinalArtifacts,
}

impl<'a> RunDetails<'a> {
    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run details")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run details to {}", path.display()))?;
        info!("💾 Run details saved to {}", path.display());
        Ok(())
    }
}

/// Where run details go for this context
pub fn run_details_path(ctx: &PipelineContext) -> PathBuf {
    ctx.details_path(RUN_DETAILS_FILE)
}
