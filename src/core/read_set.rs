//! Read Set Data Types
//!
//! The unit the pipeline reasons about: one registered sequencing library
//! (single file, file pair, or interleaved file) plus everything learned
//! about it while studying its contents.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reads whose longest observed length is below this are "short".
pub const MAX_SHORT_READ_LENGTH: usize = 600;

/// Default number of bytes read when sampling a file.
pub const DEFAULT_BYTES_TO_SAMPLE: usize = 20_000;

/// Sequencing technology tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Illumina,
    #[serde(rename = "iontorrent")]
    IonTorrent,
    #[serde(rename = "pacbio")]
    PacBio,
    Nanopore,
    Fasta,
    Unknown,
}

impl Platform {
    /// Platforms that own a slot in the registry's platform index
    pub const INDEXED: [Platform; 5] = [
        Platform::Illumina,
        Platform::IonTorrent,
        Platform::PacBio,
        Platform::Nanopore,
        Platform::Fasta,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Illumina => "illumina",
            Self::IonTorrent => "iontorrent",
            Self::PacBio => "pacbio",
            Self::Nanopore => "nanopore",
            Self::Fasta => "fasta",
            Self::Unknown => "unknown",
        }
    }

    /// Illumina and IonTorrent produce short reads
    pub fn is_short_read(&self) -> bool {
        matches!(self, Self::Illumina | Self::IonTorrent)
    }

    /// PacBio and Nanopore produce long reads
    pub fn is_long_read(&self) -> bool {
        matches!(self, Self::PacBio | Self::Nanopore)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "illumina" => Ok(Self::Illumina),
            "iontorrent" | "ion_torrent" => Ok(Self::IonTorrent),
            "pacbio" | "pacbio_smrt" => Ok(Self::PacBio),
            "nanopore" | "oxford_nanopore" => Ok(Self::Nanopore),
            "fasta" => Ok(Self::Fasta),
            "unknown" | "na" => Ok(Self::Unknown),
            other => Err(anyhow::anyhow!("unrecognised platform: {other}")),
        }
    }
}

/// Library layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Layout {
    #[serde(rename = "single-end")]
    SingleEnd,
    #[serde(rename = "paired-end")]
    PairedEnd,
    #[default]
    #[serde(rename = "na")]
    NotApplicable,
}

/// Short/long classification derived from the longest observed read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LengthClass {
    Short,
    Long,
    #[default]
    #[serde(rename = "na")]
    NotApplicable,
}

impl LengthClass {
    pub fn from_max_length(max_len: usize) -> Self {
        if max_len < MAX_SHORT_READ_LENGTH {
            Self::Short
        } else {
            Self::Long
        }
    }
}

/// Delimiter joining the two files of a pair in a registration spec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairDelimiter {
    /// `a:b`
    PairedEnd,
    /// `a%b`
    MatePair,
}

impl PairDelimiter {
    pub fn as_char(&self) -> char {
        match self {
            Self::PairedEnd => ':',
            Self::MatePair => '%',
        }
    }

    /// `:` wins when both delimiters occur
    pub fn detect(spec: &str) -> Option<Self> {
        if spec.contains(':') {
            Some(Self::PairedEnd)
        } else if spec.contains('%') {
            Some(Self::MatePair)
        } else {
            None
        }
    }
}

/// Statistics gathered by a full pass over a read set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadStats {
    pub avg_len: f64,
    pub min_len: usize,
    pub max_len: usize,
    pub num_reads: usize,
    pub sample_read_id: String,
}

/// A registered read set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadSet {
    /// Canonical registered name
    pub id: String,
    /// Bare file names inside the working directory
    pub files: Vec<String>,
    pub delimiter: Option<PairDelimiter>,
    pub platform: Platform,
    pub inferred_platform: Option<Platform>,
    pub layout: Layout,
    pub interleaved: bool,
    pub length_class: LengthClass,
    pub stats: Option<ReadStats>,
    /// `Some(false)` once a mate-ID mismatch was seen in a paired study
    pub ids_paired: Option<bool>,
    pub problems: Vec<String>,
    pub supersedes: Option<String>,
    pub superseded_by: Option<String>,
}

impl ReadSet {
    pub fn new(id: impl Into<String>, files: Vec<String>, delimiter: Option<PairDelimiter>) -> Self {
        Self {
            id: id.into(),
            files,
            delimiter,
            platform: Platform::Unknown,
            inferred_platform: None,
            layout: Layout::NotApplicable,
            interleaved: false,
            length_class: LengthClass::NotApplicable,
            stats: None,
            ids_paired: None,
            problems: Vec::new(),
            supersedes: None,
            superseded_by: None,
        }
    }

    /// Superseded sets are kept for audit only
    pub fn is_live(&self) -> bool {
        self.superseded_by.is_none()
    }

    pub fn is_pair(&self) -> bool {
        self.files.len() == 2
    }

    pub fn is_mate_pair(&self) -> bool {
        self.delimiter == Some(PairDelimiter::MatePair)
    }

    pub fn is_short(&self) -> bool {
        self.length_class == LengthClass::Short
    }

    pub fn is_long(&self) -> bool {
        self.length_class == LengthClass::Long
    }

    pub fn add_problem(&mut self, problem: impl Into<String>) {
        self.problems.push(problem.into());
    }

    /// File-name stem used to derive names of per-read-set tool outputs
    pub fn file_stem(&self) -> String {
        let first = self.files.first().map(String::as_str).unwrap_or(&self.id);
        first.split('.').next().unwrap_or(first).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_class_threshold() {
        assert_eq!(LengthClass::from_max_length(599), LengthClass::Short);
        assert_eq!(LengthClass::from_max_length(600), LengthClass::Long);
    }

    #[test]
    fn test_delimiter_detection() {
        assert_eq!(PairDelimiter::detect("a.fq:b.fq"), Some(PairDelimiter::PairedEnd));
        assert_eq!(PairDelimiter::detect("a.fq%b.fq"), Some(PairDelimiter::MatePair));
        assert_eq!(PairDelimiter::detect("a.fq"), None);
    }

    #[test]
    fn test_platform_round_trip_names() {
        for platform in Platform::INDEXED {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
        assert!("sanger".parse::<Platform>().is_err());
    }

    #[test]
    fn test_file_stem() {
        let set = ReadSet::new("r_1.fastq.gz:r_2.fastq.gz", vec!["r_1.fastq.gz".into(), "r_2.fastq.gz".into()], Some(PairDelimiter::PairedEnd));
        assert_eq!(set.file_stem(), "r_1");
        assert!(set.is_pair());
        assert!(!set.is_mate_pair());
        assert!(set.is_live());
    }
}
