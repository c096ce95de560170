//! Adapter and quality trimming of short reads before assembly
//!
//! Each trimmed read set is registered as superseding its source, so every
//! later stage sees only the trimmed files.

use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::core::{Platform, ReadSet};
use crate::pipeline::context::{move_file, PipelineContext};
use crate::pipeline::tools::ToolInvocation;
use crate::reads::registry::{ReadRegistry, RegisterOptions};

struct TrimPatterns {
    paired_output: Regex,
    single_output: Regex,
    report: Regex,
}

fn patterns() -> Option<&'static TrimPatterns> {
    static PATTERNS: OnceLock<Option<TrimPatterns>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some(TrimPatterns {
                paired_output: Regex::new(r"Writing validated paired-end read \d reads to (\S+)").ok()?,
                single_output: Regex::new(r"Writing final adapter and quality trimmed output to (\S+)").ok()?,
                report: Regex::new(r"Writing report to '(.*report\.txt)'").ok()?,
            })
        })
        .as_ref()
}

/// Trimmed output files named in trim_galore's stderr
pub fn trimmed_outputs(stderr: &str, paired: bool) -> Vec<String> {
    let Some(p) = patterns() else {
        return Vec::new();
    };
    if paired {
        p.paired_output
            .captures_iter(stderr)
            .map(|c| c[1].to_string())
            .collect()
    } else {
        p.single_output
            .captures(stderr)
            .map(|c| vec![c[1].to_string()])
            .unwrap_or_default()
    }
}

/// Trimming reports named in trim_galore's stderr
pub fn trimming_reports(stderr: &str) -> Vec<String> {
    patterns()
        .map(|p| p.report.captures_iter(stderr).map(|c| c[1].to_string()).collect())
        .unwrap_or_default()
}

fn trim_invocation(set: &ReadSet, threads: usize) -> ToolInvocation {
    let inv = ToolInvocation::new("trim_galore", "trim_galore")
        .arg("-j")
        .arg(threads.to_string())
        .args(["-o", "."]);
    match set.files.as_slice() {
        [a, b] => inv.arg("--paired").arg(a.as_str()).arg(b.as_str()),
        files => inv.args(files.iter().cloned()),
    }
}

/// Trim every live short-read set and register the results as replacements.
/// Returns the ids of the new read sets.
pub fn trim_short_reads(ctx: &PipelineContext, registry: &mut ReadRegistry) -> Vec<String> {
    let targets: Vec<ReadSet> = registry
        .live_read_sets()
        .into_iter()
        .filter(|set| set.is_short() && set.platform != Platform::Fasta)
        .cloned()
        .collect();
    info!("✂️  Trimming {} short read sets", targets.len());

    let mut derived = Vec::new();
    for set in targets {
        let output = ctx.run_tool(&trim_invocation(&set, ctx.threads));
        let paired = set.is_pair();
        let outputs = trimmed_outputs(&output.stderr, paired);
        if outputs.is_empty() || (paired && outputs.len() < 2) {
            let problem = "trim_galore did not name trimmed reads output files in stderr";
            warn!("{}: {}", set.id, problem);
            if let Some(entry) = registry.get_mut(&set.id) {
                entry.add_problem(problem);
            }
            continue;
        }

        for report in trimming_reports(&output.stderr) {
            let src = ctx.work_path(&report);
            let Some(name) = src.file_name() else {
                continue;
            };
            if let Err(e) = move_file(&src, &ctx.details_dir.join(name)) {
                warn!("could not move trimming report {}: {:#}", report, e);
            }
        }

        let delimiter = set.delimiter.map(|d| d.as_char()).unwrap_or(':');
        let spec = outputs[..outputs.len().min(2)]
            .iter()
            .map(|f| ctx.work_path(f).display().to_string())
            .collect::<Vec<_>>()
            .join(&delimiter.to_string());
        registry.add_transformation(format!(
            "trim_galore, input {}, output {}",
            set.id,
            outputs.join(":")
        ));

        let options = RegisterOptions {
            platform: Some(set.platform),
            interleaved: set.interleaved,
            supersedes: Some(set.id.clone()),
        };
        match registry.register(&spec, options) {
            Ok(id) => derived.push(id),
            Err(e) => {
                if let Some(entry) = registry.get_mut(&set.id) {
                    entry.add_problem(format!("trimmed reads could not be registered: {e}"));
                }
            }
        }
    }
    derived
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAIRED_STDERR: &str = "\
Writing report to '/w/s_1.fq_trimming_report.txt'
Writing validated paired-end read 1 reads to s_1_val_1.fq
Writing validated paired-end read 2 reads to s_2_val_2.fq
Writing report to 's_2.fq_trimming_report.txt'
";

    #[test]
    fn test_paired_output_names() {
        assert_eq!(
            trimmed_outputs(PAIRED_STDERR, true),
            vec!["s_1_val_1.fq", "s_2_val_2.fq"]
        );
        assert_eq!(trimming_reports(PAIRED_STDERR).len(), 2);
    }

    #[test]
    fn test_single_output_name() {
        let stderr = "Writing final adapter and quality trimmed output to r_trimmed.fq\n";
        assert_eq!(trimmed_outputs(stderr, false), vec!["r_trimmed.fq"]);
        assert!(trimmed_outputs("nothing here", false).is_empty());
    }

    #[test]
    fn test_invocation_arguments() {
        let set = ReadSet::new(
            "a.fq:b.fq".to_string(),
            vec!["a.fq".to_string(), "b.fq".to_string()],
            Some(crate::core::PairDelimiter::PairedEnd),
        );
        assert_eq!(
            trim_invocation(&set, 8).command_line(),
            "trim_galore -j 8 -o . --paired a.fq b.fq"
        );
    }
}
