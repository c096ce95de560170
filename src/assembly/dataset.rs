//! SPAdes dataset manifest
//!
//! Lists every live read set by library type using bare file names from the
//! working directory. Written as JSON, which spades.py reads as YAML.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::core::Platform;
use crate::reads::ReadRegistry;

/// One library entry of the manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DatasetLibrary {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orientation: Option<String>,
    #[serde(rename = "single reads", skip_serializing_if = "Vec::is_empty")]
    pub single_reads: Vec<String>,
    #[serde(rename = "interlaced reads", skip_serializing_if = "Vec::is_empty")]
    pub interlaced_reads: Vec<String>,
    #[serde(rename = "left reads", skip_serializing_if = "Vec::is_empty")]
    pub left_reads: Vec<String>,
    #[serde(rename = "right reads", skip_serializing_if = "Vec::is_empty")]
    pub right_reads: Vec<String>,
}

impl DatasetLibrary {
    fn single(kind: &str, files: Vec<String>) -> Self {
        Self {
            kind: kind.to_string(),
            single_reads: files,
            ..Self::default()
        }
    }
}

/// Build the manifest from the live platform index
pub fn build_dataset(registry: &ReadRegistry) -> Vec<DatasetLibrary> {
    let mut single = Vec::new();
    let mut interlaced = Vec::new();
    let (mut left, mut right) = (Vec::new(), Vec::new());
    let (mut mate_left, mut mate_right) = (Vec::new(), Vec::new());

    let short_sets = registry
        .live_for(Platform::Illumina)
        .into_iter()
        .chain(registry.live_for(Platform::IonTorrent));
    for set in short_sets {
        match set.files.as_slice() {
            [a, b] if set.is_mate_pair() => {
                mate_left.push(a.clone());
                mate_right.push(b.clone());
            }
            [a, b] => {
                left.push(a.clone());
                right.push(b.clone());
            }
            [f] if set.interleaved => interlaced.push(f.clone()),
            files => single.extend(files.iter().cloned()),
        }
    }

    let mut libraries = Vec::new();
    if !single.is_empty() {
        libraries.push(DatasetLibrary::single("single", single));
    }
    if !interlaced.is_empty() {
        libraries.push(DatasetLibrary {
            kind: "paired-end".to_string(),
            interlaced_reads: interlaced,
            ..DatasetLibrary::default()
        });
    }
    if !left.is_empty() {
        libraries.push(DatasetLibrary {
            kind: "paired-end".to_string(),
            orientation: Some("fr".to_string()),
            left_reads: left,
            right_reads: right,
            ..DatasetLibrary::default()
        });
    }
    if !mate_left.is_empty() {
        libraries.push(DatasetLibrary {
            kind: "mate-pairs".to_string(),
            orientation: Some("rf".to_string()),
            left_reads: mate_left,
            right_reads: mate_right,
            ..DatasetLibrary::default()
        });
    }

    for (platform, kind) in [
        (Platform::PacBio, "pacbio"),
        (Platform::Nanopore, "nanopore"),
        (Platform::Fasta, "untrusted-contigs"),
    ] {
        let files: Vec<String> = registry
            .live_for(platform)
            .iter()
            .filter_map(|set| set.files.first().cloned())
            .collect();
        if !files.is_empty() {
            libraries.push(DatasetLibrary::single(kind, files));
        }
    }
    libraries
}

pub fn write_dataset(libraries: &[DatasetLibrary], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(libraries).context("Failed to serialize dataset")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write dataset manifest {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_keys() {
        let lib = DatasetLibrary {
            kind: "paired-end".to_string(),
            orientation: Some("fr".to_string()),
            left_reads: vec!["a_1.fq".to_string()],
            right_reads: vec!["a_2.fq".to_string()],
            ..DatasetLibrary::default()
        };
        let value = serde_json::to_value(&lib).unwrap();
        assert_eq!(value["type"], "paired-end");
        assert_eq!(value["left reads"][0], "a_1.fq");
        assert!(value.get("single reads").is_none());
    }

    #[test]
    fn test_empty_registry_gives_empty_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ReadRegistry::new(dir.path());
        assert!(build_dataset(&registry).is_empty());
    }
}
