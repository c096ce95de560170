//! Per-contig read depth
//!
//! Turns `samtools depth -a` output into mean depth per contig plus a depth
//! normalised to the genome's single-copy level. The single-copy baseline is
//! the length-weighted mean of contigs whose depth lies within 0.5x-1.5x of
//! the overall mean, so plasmids and contaminants do not skew it.

use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use serde::Serialize;
use std::io::BufRead;
use tracing::{debug, info};

use super::alignment::Aligner;
use crate::core::ReadSet;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::tools::ToolInvocation;

const BASELINE_LOWER: f64 = 0.5;
const BASELINE_UPPER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ContigDepth {
    pub mean_depth: f64,
    pub normalized_depth: f64,
    /// Positions seen in the depth stream
    pub length: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CoverageTable {
    pub contigs: IndexMap<String, ContigDepth>,
    /// Depth treated as 1x
    pub baseline: f64,
    pub total_positions: usize,
}

impl CoverageTable {
    /// `None` for contigs absent from the depth stream
    pub fn get(&self, contig: &str) -> Option<&ContigDepth> {
        self.contigs.get(contig)
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CoverageEstimator;

impl CoverageEstimator {
    /// Parse depth records: contig, position, then one depth column per BAM
    pub fn estimate<R: BufRead>(reader: R) -> Result<CoverageTable> {
        let mut sums: IndexMap<String, (f64, usize)> = IndexMap::new();
        let mut total_depth = 0.0;
        let mut total_positions = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.context("Failed to read depth stream")?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < 3 {
                bail!("Number of fields is less than 3 at line {}: {}", line_no + 1, line);
            }
            let mut depth = 0.0;
            for field in &fields[2..] {
                depth += field
                    .parse::<f64>()
                    .with_context(|| format!("Bad depth value {:?} at line {}", field, line_no + 1))?;
            }
            let entry = sums.entry(fields[0].to_string()).or_insert((0.0, 0));
            entry.0 += depth;
            entry.1 += 1;
            total_depth += depth;
            total_positions += 1;
        }

        let overall_mean = if total_positions > 0 {
            total_depth / total_positions as f64
        } else {
            0.0
        };
        let (lower, upper) = (overall_mean * BASELINE_LOWER, overall_mean * BASELINE_UPPER);

        let mut one_x_sum = 0.0;
        let mut one_x_len = 0usize;
        for (sum, len) in sums.values() {
            let mean = sum / *len as f64;
            if (lower..=upper).contains(&mean) {
                one_x_sum += mean * *len as f64;
                one_x_len += len;
            }
        }
        let baseline = if one_x_len > 0 && one_x_sum > 0.0 {
            one_x_sum / one_x_len as f64
        } else {
            1.0
        };
        debug!(
            "depth over {} positions, mean {:.2}, baseline {:.2}",
            total_positions, overall_mean, baseline
        );

        let contigs = sums
            .into_iter()
            .map(|(name, (sum, len))| {
                let mean_depth = sum / len as f64;
                (
                    name,
                    ContigDepth {
                        mean_depth,
                        normalized_depth: mean_depth / baseline,
                        length: len,
                    },
                )
            })
            .collect();

        Ok(CoverageTable {
            contigs,
            baseline,
            total_positions,
        })
    }

    pub fn estimate_str(depth: &str) -> Result<CoverageTable> {
        Self::estimate(depth.as_bytes())
    }

    /// Align every read set, then run one `samtools depth` over all BAMs.
    /// `Ok(None)` when no alignment succeeded.
    pub fn depth_pass(
        ctx: &PipelineContext,
        contigs: &str,
        read_sets: &[&ReadSet],
        label: &str,
        problems: &mut Vec<String>,
    ) -> Result<Option<CoverageTable>> {
        let aligner = Aligner::new(ctx);
        let mut bams = Vec::new();
        for reads in read_sets {
            match aligner.bam_for(contigs, reads) {
                Ok(bam) => bams.push(bam),
                Err(e) => problems.push(format!("{label} alignment of {} failed: {e:#}", reads.id)),
            }
        }
        if bams.is_empty() {
            return Ok(None);
        }

        let depth_file = format!("{label}_depth.txt");
        let depth = ToolInvocation::new("samtools depth", "samtools")
            .args(["depth", "-a"])
            .args(bams.iter().cloned())
            .stdout_to(&depth_file);
        let output = ctx.run_tool(&depth);
        if !output.success() {
            bail!("samtools depth returned {:?}", output.exit_code);
        }

        let path = ctx.work_path(&depth_file);
        let file = std::fs::File::open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let table = Self::estimate(std::io::BufReader::new(file))?;
        info!(
            "📊 {} coverage for {} contigs, 1x depth {:.1}",
            label,
            table.contigs.len(),
            table.baseline
        );
        Ok(Some(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plasmid_excluded_from_baseline() {
        let mut depth = String::new();
        for pos in 1..=1000 {
            depth.push_str(&format!("chrom\t{pos}\t20\n"));
        }
        for pos in 1..=100 {
            depth.push_str(&format!("plasmid\t{pos}\t200\n"));
        }
        let table = CoverageEstimator::estimate_str(&depth).unwrap();
        assert!((table.baseline - 20.0).abs() < 1e-9);
        assert!((table.get("plasmid").unwrap().normalized_depth - 10.0).abs() < 1e-9);
        assert!(table.get("missing").is_none());
    }

    #[test]
    fn test_multiple_depth_columns_are_summed() {
        let table = CoverageEstimator::estimate_str("c1\t1\t3\t4\nc1\t2\t5\t2\n").unwrap();
        assert!((table.get("c1").unwrap().mean_depth - 7.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_line_is_error() {
        assert!(CoverageEstimator::estimate_str("c1\t1\n").is_err());
    }

    #[test]
    fn test_zero_depth_defaults_baseline_to_one() {
        let table = CoverageEstimator::estimate_str("c1\t1\t0\nc1\t2\t0\n").unwrap();
        assert_eq!(table.baseline, 1.0);
        assert_eq!(table.get("c1").unwrap().normalized_depth, 0.0);
    }
}
