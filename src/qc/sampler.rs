//! Bounded-prefix read sampling
//!
//! Reads only the first few kilobytes of a read file to guess its format,
//! collect a handful of read identifiers and estimate read length. Used for
//! classification before any full pass is made.

use anyhow::{Context, Result};
use bio::io::{fasta, fastq};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use std::path::Path;
use tracing::debug;

use crate::core::{infer_platform, Platform, DEFAULT_BYTES_TO_SAMPLE};
use crate::qc::file_reader::{open_reads, SequenceFormat};

/// What a bounded prefix revealed about a read file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadSample {
    pub format: SequenceFormat,
    /// Identifier (first header token) of every complete record in the prefix
    pub read_ids: Vec<String>,
    /// Full first header line, used for platform inference
    pub first_header: Option<String>,
    pub avg_read_length: f64,
    pub max_read_length: usize,
    pub problems: Vec<String>,
}

impl ReadSample {
    /// Platform guess from the first header and the average sampled read
    /// length
    pub fn platform(&self) -> Platform {
        match &self.first_header {
            Some(header) => infer_platform(header, self.avg_read_length as usize),
            None => Platform::Unknown,
        }
    }

    pub fn is_fasta(&self) -> bool {
        self.format == SequenceFormat::Fasta
    }
}

/// Reads a fixed-size prefix of each file it is asked about
#[derive(Debug, Clone, Copy)]
pub struct ReadSampler {
    bytes_to_sample: usize,
}

impl Default for ReadSampler {
    fn default() -> Self {
        Self::new(DEFAULT_BYTES_TO_SAMPLE)
    }
}

impl ReadSampler {
    pub fn new(bytes_to_sample: usize) -> Self {
        Self { bytes_to_sample }
    }

    pub fn bytes_to_sample(&self) -> usize {
        self.bytes_to_sample
    }

    /// Sample the start of `path`.
    ///
    /// A record cut off by the byte limit is discarded. An empty or
    /// unrecognised file yields a sample with format `Unknown` and a problem,
    /// not an error; only I/O failures are errors.
    pub fn sample(&self, path: &Path) -> Result<ReadSample> {
        let reader = open_reads(path)?;
        let mut limited = reader.take(self.bytes_to_sample as u64);
        let mut buffer = Vec::with_capacity(self.bytes_to_sample);
        limited
            .read_to_end(&mut buffer)
            .with_context(|| format!("Failed to sample {}", path.display()))?;

        let mut probe = [0u8; 1];
        let reached_eof = limited.into_inner().read(&mut probe)? == 0;

        let text = String::from_utf8_lossy(&buffer);
        let sample = Self::parse_prefix(&text, reached_eof, &path.display().to_string());
        debug!(
            "Sampled {}: format {:?}, {} ids, avg length {:.1}",
            path.display(),
            sample.format,
            sample.read_ids.len(),
            sample.avg_read_length
        );
        Ok(sample)
    }

    fn parse_prefix(text: &str, reached_eof: bool, label: &str) -> ReadSample {
        // A prefix cut by the byte limit ends in a partial line
        let text = if reached_eof {
            text
        } else {
            text.rfind('\n').map_or("", |end| &text[..=end])
        };
        let body = text.trim_start_matches(['\n', '\r']);

        let mut problems = Vec::new();
        if body.lines().take(2).count() < 2 {
            problems.push(format!(
                "text sample of {} (length {}) lacks at least 2 lines",
                label,
                text.len()
            ));
        }

        let first_line = body.lines().next().map(|l| l.trim_end_matches('\r'));
        let format = first_line
            .map(SequenceFormat::from_first_line)
            .unwrap_or(SequenceFormat::Unknown);

        let records: Vec<(String, usize)> = match format {
            SequenceFormat::Fastq => fastq::Reader::new(Cursor::new(body.as_bytes()))
                .records()
                .map_while(|r| r.ok())
                .map(|r| (format!("@{}", r.id()), r.seq().len()))
                .collect(),
            SequenceFormat::Fasta => {
                let mut records: Vec<(String, usize)> = fasta::Reader::new(Cursor::new(body.as_bytes()))
                    .records()
                    .map_while(|r| r.ok())
                    .map(|r| (format!(">{}", r.id()), r.seq().len()))
                    .collect();
                // The last sequence may continue past the prefix
                if !reached_eof {
                    records.pop();
                }
                records
            }
            SequenceFormat::Unknown => {
                problems.push(format!("{label} does not start with a FASTQ or FASTA header"));
                Vec::new()
            }
        };

        let avg_read_length = if records.is_empty() {
            0.0
        } else {
            records.iter().map(|(_, len)| len).sum::<usize>() as f64 / records.len() as f64
        };
        let max_read_length = records.iter().map(|(_, len)| *len).max().unwrap_or(0);

        ReadSample {
            format,
            read_ids: records.into_iter().map(|(id, _)| id).collect(),
            first_header: match format {
                SequenceFormat::Unknown => None,
                _ => first_line.map(str::to_string),
            },
            avg_read_length,
            max_read_length,
            problems,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fastq(n: usize, len: usize) -> String {
        (0..n)
            .map(|i| format!("@read{i}/1\n{}\n+\n{}\n", "A".repeat(len), "I".repeat(len)))
            .collect()
    }

    #[test]
    fn test_whole_file_fits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.fastq");
        std::fs::write(&path, fastq(3, 100)).unwrap();

        let sample = ReadSampler::default().sample(&path).unwrap();
        assert_eq!(sample.format, SequenceFormat::Fastq);
        assert_eq!(sample.read_ids, vec!["@read0/1", "@read1/1", "@read2/1"]);
        assert_eq!(sample.avg_read_length, 100.0);
        assert!(sample.problems.is_empty());
    }

    #[test]
    fn test_partial_record_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.fastq");
        // 113 bytes per record, so a 250 byte prefix cuts the third
        std::fs::write(&path, fastq(10, 50)).unwrap();

        let sample = ReadSampler::new(250).sample(&path).unwrap();
        assert_eq!(sample.read_ids.len(), 2);
        assert_eq!(sample.max_read_length, 50);
    }

    #[test]
    fn test_fasta_last_record_needs_eof() {
        let complete = ReadSampler::parse_prefix(">c1\nACGT\nAC\n>c2\nAAA\n", true, "t");
        assert_eq!(complete.format, SequenceFormat::Fasta);
        assert_eq!(complete.read_ids, vec![">c1", ">c2"]);
        assert_eq!(complete.avg_read_length, 4.5);

        let truncated = ReadSampler::parse_prefix(">c1\nACGT\nAC\n>c2\nAAA\nAA", false, "t");
        assert_eq!(truncated.read_ids, vec![">c1"]);
        assert_eq!(truncated.avg_read_length, 6.0);
        assert!(truncated.is_fasta());
    }

    #[test]
    fn test_platform_follows_average_length() {
        // One long outlier among short reads keeps the set short
        let mut text = String::new();
        for (i, len) in [150, 150, 150, 900].iter().enumerate() {
            text.push_str(&format!(
                "@M00123:8:000000000-A1B2C:1:1101:{}:2000/1\n{}\n+\n{}\n",
                1000 + i,
                "A".repeat(*len),
                "I".repeat(*len)
            ));
        }
        let sample = ReadSampler::parse_prefix(&text, true, "t");
        assert_eq!(sample.max_read_length, 900);
        assert_eq!(sample.avg_read_length, 337.5);
        assert_eq!(sample.platform(), Platform::Illumina);
    }

    #[test]
    fn test_leading_blank_lines_and_unknown() {
        let sample = ReadSampler::parse_prefix("\n\n@r1\nAC\n+\nII\n", true, "t");
        assert_eq!(sample.read_ids, vec!["@r1"]);

        let junk = ReadSampler::parse_prefix("hello\nworld\n", true, "t");
        assert_eq!(junk.format, SequenceFormat::Unknown);
        assert_eq!(junk.platform(), Platform::Unknown);
        assert!(!junk.problems.is_empty());
    }
}
