//! Length and coverage filtering of final contigs
//!
//! Contigs are renamed `<prefix>contig_<n>` and annotated with their length,
//! coverage and circularity. Those below threshold are diverted to an archive
//! file rather than dropped.

use anyhow::{Context, Result};
use bio::io::fasta;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use super::coverage::CoverageTable;
use crate::pipeline::context::{file_size, PipelineContext};

pub const BELOW_THRESHOLD_FILE: &str = "contigs_below_length_coverage_threshold.fasta";
const LINE_WIDTH: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FilterThresholds {
    pub min_length: usize,
    pub min_coverage: f64,
}

/// Depth tables from the short and long read passes, when they ran
#[derive(Debug, Clone, Copy, Default)]
pub struct ContigCoverage<'a> {
    pub short: Option<&'a CoverageTable>,
    pub long: Option<&'a CoverageTable>,
}

/// Summary statistics over a contig set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyStats {
    pub total_length: usize,
    pub num_contigs: usize,
    pub n50: usize,
    pub n90: usize,
    pub largest_contig: usize,
}

impl AssemblyStats {
    pub fn from_lengths(lengths: &[usize]) -> Self {
        Self {
            total_length: lengths.iter().sum(),
            num_contigs: lengths.len(),
            n50: Self::calculate_nx(lengths, 50),
            n90: Self::calculate_nx(lengths, 90),
            largest_contig: lengths.iter().copied().max().unwrap_or(0),
        }
    }

    /// Length of the contig at which `percent` of the total is reached
    pub fn calculate_nx(lengths: &[usize], percent: usize) -> usize {
        if lengths.is_empty() {
            return 0;
        }
        let mut sorted = lengths.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));

        let target = sorted.iter().sum::<usize>() * percent / 100;
        let mut cumulative = 0;
        for &length in &sorted {
            cumulative += length;
            if cumulative >= target {
                return length;
            }
        }
        0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FilterReport {
    pub thresholds: FilterThresholds,
    pub coverage_notes: Vec<String>,
    pub contigs_kept: usize,
    pub contigs_below_threshold: usize,
    /// Header lines of diverted contigs
    pub below_threshold: Vec<String>,
    /// Header lines of circular contigs
    pub circular: Vec<String>,
    pub kept_stats: AssemblyStats,
    pub below_threshold_file: Option<PathBuf>,
}

/// Keep rule: long enough, and covered enough when coverage is known
pub fn contig_passes(length: usize, coverage: Option<f64>, thresholds: &FilterThresholds) -> bool {
    length >= thresholds.min_length && coverage.map_or(true, |c| c >= thresholds.min_coverage)
}

/// `contigs.racon.pilon.fasta` -> `contigs_depth_cov_filtered.fasta`
pub fn filtered_name(input: &str) -> String {
    let base = input.split('.').next().unwrap_or(input);
    format!("{base}_depth_cov_filtered.fasta")
}

fn describe(
    length: usize,
    short: Option<(f64, f64)>,
    long: Option<(f64, f64)>,
    circular: bool,
) -> String {
    let mut info = format!("length {length:5}");
    if let Some((mean, norm)) = short {
        info.push_str(&format!(" coverage {mean:.1} normalized_cov {norm:.2}"));
    }
    if let Some((mean, norm)) = long {
        info.push_str(&format!(" longread_coverage {mean:.1} normalized_longread_cov {norm:.2}"));
    }
    if circular {
        info.push_str(" circular=true");
    }
    info
}

/// Filter `input` into `output`; diverted contigs go to `archive`.
/// `circular` holds 1-based contig positions in the input.
pub fn filter_contig_file(
    input: &Path,
    output: &Path,
    archive: &Path,
    prefix: &str,
    coverage: ContigCoverage<'_>,
    circular: &[usize],
    thresholds: &FilterThresholds,
) -> Result<FilterReport> {
    let ContigCoverage { short, long } = coverage;
    let reader = fasta::Reader::from_file(input)
        .with_context(|| format!("Failed to open contigs {}", input.display()))?;
    let out = File::create(output).with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(out);
    let mut diverted: Vec<(String, String, Vec<u8>)> = Vec::new();

    let mut coverage_notes = Vec::new();
    match (short, long) {
        (None, None) => coverage_notes.push("No read coverage information available".to_string()),
        (s, l) => {
            if s.is_some() {
                coverage_notes.push("Short read coverage information available".to_string());
            }
            if l.is_some() {
                coverage_notes.push("Long read coverage information available".to_string());
            }
        }
    }

    let mut kept_lengths = Vec::new();
    let mut circular_headers = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Failed to parse {}", input.display()))?;
        let position = index + 1;
        let seq = record.seq();
        let name = format!("{prefix}contig_{position}");

        let short_depth = short
            .and_then(|t| t.get(record.id()))
            .map(|d| (d.mean_depth, d.normalized_depth));
        let long_depth = long
            .and_then(|t| t.get(record.id()))
            .map(|d| (d.mean_depth, d.normalized_depth));
        let coverage = match (short_depth, long_depth) {
            (None, None) => None,
            (s, l) => Some(s.map_or(0.0, |d| d.0).max(l.map_or(0.0, |d| d.0))),
        };
        let is_circular = circular.contains(&position);
        let description = describe(seq.len(), short_depth, long_depth, is_circular);
        if is_circular {
            circular_headers.push(format!("{name} {description}"));
        }

        if contig_passes(seq.len(), coverage, thresholds) {
            writeln!(writer, ">{name} {description}")?;
            for chunk in seq.chunks(LINE_WIDTH) {
                writer.write_all(chunk)?;
                writer.write_all(b"\n")?;
            }
            kept_lengths.push(seq.len());
        } else {
            diverted.push((name, description, seq.to_vec()));
        }
    }
    writer.flush()?;

    let below_threshold_file = if diverted.is_empty() {
        None
    } else {
        let file = File::create(archive).with_context(|| format!("Failed to create {}", archive.display()))?;
        let mut archive_writer = fasta::Writer::new(BufWriter::new(file));
        for (name, description, seq) in &diverted {
            archive_writer.write(name, Some(description.as_str()), seq)?;
        }
        archive_writer.flush()?;
        Some(archive.to_path_buf())
    };

    let report = FilterReport {
        thresholds: *thresholds,
        coverage_notes,
        contigs_kept: kept_lengths.len(),
        contigs_below_threshold: diverted.len(),
        below_threshold: diverted.iter().map(|(n, d, _)| format!("{n} {d}")).collect(),
        circular: circular_headers,
        kept_stats: AssemblyStats::from_lengths(&kept_lengths),
        below_threshold_file,
    };
    info!(
        "🔍 Kept {} contigs (N50 {}), {} below threshold",
        report.contigs_kept, report.kept_stats.n50, report.contigs_below_threshold
    );
    Ok(report)
}

/// Filter contigs inside the working directory. The output name is `None`
/// when nothing usable was written.
pub fn filter_contigs(
    ctx: &PipelineContext,
    input: &str,
    coverage: ContigCoverage<'_>,
    circular: &[usize],
    thresholds: &FilterThresholds,
) -> Result<(Option<String>, FilterReport)> {
    let output = filtered_name(input);
    let report = filter_contig_file(
        &ctx.work_path(input),
        &ctx.work_path(&output),
        &ctx.details_dir.join(BELOW_THRESHOLD_FILE),
        &ctx.prefix,
        coverage,
        circular,
        thresholds,
    )?;
    if file_size(&ctx.work_path(&output)) < 10 {
        return Ok((None, report));
    }
    Ok((Some(output), report))
}
