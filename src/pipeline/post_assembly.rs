//! Post-assembly quality assessment
//!
//! Quast statistics over the final contigs and a Bandage rendering of the
//! assembly graph. Both are optional and never fail the run.

use indexmap::IndexMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::context::{move_file, PipelineContext};
use super::tools::ToolInvocation;

const QUAST_DIR: &str = "quast_out";

/// Quast outputs and their names under the details directory
const QUAST_REPORTS: [(&str, &str); 5] = [
    ("report.html", "quast_report.html"),
    ("report.tsv", "quast_report.tsv"),
    ("report.txt", "quast_report.txt"),
    ("transposed_report.txt", "quast_transposed_report.txt"),
    ("transposed_report.tsv", "quast_transposed_report.tsv"),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct QuastReports {
    pub exit_code: Option<i32>,
    pub reports: Vec<PathBuf>,
    /// Metric name -> value, from `report.tsv`
    pub metrics: IndexMap<String, String>,
}

/// Parse Quast's two-column `report.tsv`
pub fn parse_quast_tsv(text: &str) -> IndexMap<String, String> {
    text.lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('\t')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .filter(|(key, _)| key != "Assembly")
        .collect()
}

pub fn run_quast(ctx: &PipelineContext, contigs: &str, min_contig_length: usize) -> QuastReports {
    let quast = ToolInvocation::new("quast", "quast.py")
        .args(["-o", QUAST_DIR])
        .arg("-t")
        .arg(ctx.threads.to_string())
        .arg("--min-contig")
        .arg(min_contig_length.to_string())
        .arg(contigs);
    let output = ctx.run_tool(&quast);
    let mut result = QuastReports {
        exit_code: output.exit_code,
        ..QuastReports::default()
    };

    let quast_dir = ctx.work_path(QUAST_DIR);
    if let Ok(text) = std::fs::read_to_string(quast_dir.join("report.tsv")) {
        result.metrics = parse_quast_tsv(&text);
    }
    for (name, dest_name) in QUAST_REPORTS {
        let src = quast_dir.join(name);
        if !src.exists() {
            continue;
        }
        let dest = ctx.details_path(dest_name);
        match move_file(&src, &dest) {
            Ok(()) => result.reports.push(dest),
            Err(e) => warn!("could not keep quast {}: {:#}", name, e),
        }
    }
    info!("📊 Quast kept {} reports", result.reports.len());
    result
}

/// `x.gfa` -> `x.plot.svg`
pub fn bandage_plot_path(graph: &Path) -> PathBuf {
    graph.with_extension("plot.svg")
}

/// Render the assembly graph. Returns the image when Bandage produced one.
pub fn run_bandage(ctx: &PipelineContext, graph: &Path) -> Option<PathBuf> {
    let plot = bandage_plot_path(graph);
    let bandage = ToolInvocation::new("bandage", "Bandage")
        .arg("image")
        .arg(graph.display().to_string())
        .arg(plot.display().to_string());
    let output = ctx.run_tool(&bandage);
    if output.success() && plot.exists() {
        info!("🖼️  Assembly graph plot: {}", plot.display());
        Some(plot)
    } else {
        warn!("Bandage did not produce {}", plot.display());
        None
    }
}
