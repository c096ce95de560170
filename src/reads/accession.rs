//! SRA run accession intake
//!
//! Local FASTQ files downloaded for one run accession, plus whatever the
//! retrieval collaborator knows about the library, become a single read set.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use crate::core::{Platform, MAX_SHORT_READ_LENGTH};
use crate::qc::file_reader::concatenate_reads;
use crate::reads::registry::{ReadRegistry, RegisterOptions};

/// Library layout as reported by run metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LibraryLayout {
    Single,
    Paired,
}

/// Files of one accession with optional metadata hints
#[derive(Debug, Clone)]
pub struct AccessionFiles {
    pub accession: String,
    pub files: Vec<PathBuf>,
    pub platform: Option<Platform>,
    pub layout: Option<LibraryLayout>,
}

fn accession_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^([SED]RR\d+)").ok())
        .as_ref()
}

/// Run accession a file name starts with, if any
pub fn sra_accession(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    accession_pattern()?
        .captures(name)
        .map(|caps| caps[1].to_string())
}

/// Split anonymous items into accession groups and everything else
pub fn group_by_accession(items: &[String]) -> (BTreeMap<String, Vec<PathBuf>>, Vec<String>) {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    let mut rest = Vec::new();
    for item in items {
        let path = PathBuf::from(item);
        match sra_accession(&path) {
            Some(acc) if !item.contains([':', '%']) => groups.entry(acc).or_default().push(path),
            _ => rest.push(item.clone()),
        }
    }
    for files in groups.values_mut() {
        files.sort();
    }
    (groups, rest)
}

impl ReadRegistry {
    /// Register the files of one accession as a single read set.
    ///
    /// Returns `None` when nothing could be registered; the reason is in
    /// the registry problems.
    pub fn register_accession(&mut self, run: &AccessionFiles) -> Option<String> {
        let names: Vec<String> = run.files.iter().map(|p| p.display().to_string()).collect();
        self.add_transformation(format!("accession intake {}: {}", run.accession, names.join(",")));

        if run.files.is_empty() {
            self.add_problem(format!("for {} no fastq file found", run.accession));
            return None;
        }
        if run
            .files
            .iter()
            .any(|f| sra_accession(f).as_deref() != Some(run.accession.as_str()))
        {
            self.add_problem(format!(
                "not all files for {} begin with the accession: {}",
                run.accession,
                names.join(",")
            ));
            return None;
        }

        let layout = run.layout.unwrap_or(match run.files.len() {
            2 => LibraryLayout::Paired,
            _ => LibraryLayout::Single,
        });

        let mut spec = None;
        if layout == LibraryLayout::Paired {
            match run.files.len() {
                2 => {
                    let mut pair = names.clone();
                    pair.sort();
                    spec = Some(pair.join(":"));
                }
                n => {
                    self.add_problem(format!(
                        "for PAIRED library {}, number of files was {}, expected 2",
                        run.accession, n
                    ));
                    if n == 1 {
                        self.add_problem(format!(
                            "interpret library {} as single-end",
                            run.accession
                        ));
                        spec = Some(names[0].clone());
                    }
                }
            }
        }

        let spec = match spec {
            Some(spec) => spec,
            None if run.files.len() == 1 => names[0].clone(),
            None => {
                let dest = self.work_dir().join(format!("{}.fastq", run.accession));
                if let Err(e) = concatenate_reads(&run.files, &dest) {
                    self.add_problem(format!(
                        "could not concatenate files of {}: {:#}",
                        run.accession, e
                    ));
                    return None;
                }
                self.add_transformation(format!(
                    "for library {}, list of files was {}, concatenated to {}.fastq",
                    run.accession,
                    names.join(","),
                    run.accession
                ));
                dest.display().to_string()
            }
        };

        let platform = match run.platform {
            Some(platform) => platform,
            None => self.platform_from_sample(&run.files[0]),
        };
        info!("🧾 Accession {} registered as {} ({})", run.accession, spec, platform);

        self.register(&spec, RegisterOptions::platform(platform)).ok()
    }

    /// Short reads are illumina, long reads pacbio, by sampled mean length
    fn platform_from_sample(&mut self, file: &Path) -> Platform {
        match self.sampler().sample(file) {
            Ok(sample) if sample.avg_read_length <= MAX_SHORT_READ_LENGTH as f64 => Platform::Illumina,
            Ok(_) => Platform::PacBio,
            Err(e) => {
                self.add_problem(format!(
                    "could not sample {}: {:#}, assuming illumina",
                    file.display(),
                    e
                ));
                Platform::Illumina
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sra_accession() {
        assert_eq!(sra_accession(Path::new("/data/SRR123_1.fastq")), Some("SRR123".to_string()));
        assert_eq!(sra_accession(Path::new("ERR9.fq.gz")), Some("ERR9".to_string()));
        assert_eq!(sra_accession(Path::new("sample_SRR1.fq")), None);
    }

    #[test]
    fn test_grouping() {
        let items = vec![
            "SRR5_2.fastq".to_string(),
            "other.fq".to_string(),
            "SRR5_1.fastq".to_string(),
            "DRR7.fastq".to_string(),
        ];
        let (groups, rest) = group_by_accession(&items);
        assert_eq!(rest, vec!["other.fq"]);
        assert_eq!(groups.len(), 2);
        assert_eq!(
            groups["SRR5"],
            vec![PathBuf::from("SRR5_1.fastq"), PathBuf::from("SRR5_2.fastq")]
        );
    }
}
