//! Full-pass read statistics
//!
//! Streams entire read files once, gathering length statistics and checking
//! the internal consistency of records: mate identifiers of paired files,
//! sequence/quality length agreement, and whether a single file is secretly
//! interleaved. Inconsistencies are reported as problems, never as errors.

use anyhow::{Context, Result};
use bio::io::{fasta, fastq};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::path::Path;
use tracing::{debug, info};

use crate::core::{
    infer_platform, read_id, read_ids_are_mates, Layout, LengthClass, Platform, ReadStats,
};
use crate::qc::file_reader::{open_reads, SequenceFormat};

/// Everything a study pass learned, ready to be applied to a read set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyReport {
    pub format: SequenceFormat,
    pub stats: Option<ReadStats>,
    pub inferred_platform: Option<Platform>,
    pub length_class: LengthClass,
    pub layout: Layout,
    pub interleaved: bool,
    pub ids_paired: Option<bool>,
    pub problems: Vec<String>,
}

impl StudyReport {
    fn empty(format: SequenceFormat, layout: Layout) -> Self {
        Self {
            format,
            stats: None,
            inferred_platform: None,
            length_class: LengthClass::NotApplicable,
            layout,
            interleaved: false,
            ids_paired: None,
            problems: Vec::new(),
        }
    }
}

/// One FASTQ record reduced to what the study needs
struct RecordSummary {
    header: String,
    seq_len: usize,
    qual_len: usize,
}

impl RecordSummary {
    fn from_record(record: &fastq::Record) -> Self {
        let header = match record.desc() {
            Some(desc) => format!("@{} {}", record.id(), desc),
            None => format!("@{}", record.id()),
        };
        Self {
            header,
            seq_len: record.seq().len(),
            qual_len: record.qual().len(),
        }
    }
}

type FastqRecords = fastq::Records<Box<dyn BufRead + Send>>;

/// Blank lines ahead of the first header would trip the record parsers
fn skip_blank_lines<R: BufRead>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let buf = reader.fill_buf()?;
        let blanks = buf.iter().take_while(|b| matches!(b, b'\n' | b'\r')).count();
        if blanks == 0 {
            return Ok(());
        }
        reader.consume(blanks);
    }
}

fn open_records(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let mut reader = open_reads(path)?;
    skip_blank_lines(&mut reader).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(reader)
}

fn fastq_records(path: &Path) -> Result<FastqRecords> {
    Ok(fastq::Reader::from_bufread(open_records(path)?).records())
}

/// `Ok(None)` at end of input. A record cut short ends the file with a problem.
fn next_summary(
    records: &mut FastqRecords,
    path: &Path,
    problems: &mut Vec<String>,
) -> Result<Option<RecordSummary>> {
    match records.next() {
        None => Ok(None),
        Some(Ok(record)) => Ok(Some(RecordSummary::from_record(&record))),
        Some(Err(fastq::Error::IncompleteRecord)) => {
            problems.push(format!("incomplete last record in {}", path.display()));
            Ok(None)
        }
        Some(Err(e)) => Err(e).with_context(|| format!("Failed to parse FASTQ {}", path.display())),
    }
}

/// Running min/max/total over read lengths
#[derive(Debug, Default)]
struct LengthTally {
    count: usize,
    total: usize,
    min: Option<usize>,
    max: usize,
}

impl LengthTally {
    fn add(&mut self, len: usize) {
        self.count += 1;
        self.total += len;
        self.min = Some(self.min.map_or(len, |m| m.min(len)));
        self.max = self.max.max(len);
    }

    fn stats(&self, num_reads: usize, sample_read_id: String) -> Option<ReadStats> {
        if self.count == 0 {
            return None;
        }
        Some(ReadStats {
            avg_len: self.total as f64 / self.count as f64,
            min_len: self.min.unwrap_or(0),
            max_len: self.max,
            num_reads,
            sample_read_id,
        })
    }
}

/// Full-file statistics for FASTQ/FASTA read sets, single or paired
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadStatEngine;

impl ReadStatEngine {
    pub fn new() -> Self {
        Self
    }

    /// Study a file pair in lock-step.
    ///
    /// The first mate-ID mismatch is reported and clears `ids_paired`; later
    /// mismatches are not checked. Every record whose sequence and quality
    /// lengths differ gets its own problem.
    pub fn study_paired(&self, file1: &Path, file2: &Path) -> Result<StudyReport> {
        if first_line_format(file1)? == SequenceFormat::Fasta {
            let mut report = self.study_fasta(&[file1, file2])?;
            report.problems.push(format!(
                "paired files {} and {} are FASTA, studied as contigs",
                file1.display(),
                file2.display()
            ));
            return Ok(report);
        }

        info!(
            "🔬 Studying paired reads {} + {}",
            file1.display(),
            file2.display()
        );
        let mut left = fastq_records(file1)?;
        let mut right = fastq_records(file2)?;

        let mut report = StudyReport::empty(SequenceFormat::Fastq, Layout::PairedEnd);
        let mut ids_paired = true;
        let mut tally = LengthTally::default();
        let mut sample_header = String::new();
        let mut pairs = 0usize;

        loop {
            let r1 = next_summary(&mut left, file1, &mut report.problems)?;
            let r2 = next_summary(&mut right, file2, &mut report.problems)?;
            let (r1, r2) = match (r1, r2) {
                (Some(r1), Some(r2)) => (r1, r2),
                (None, None) => break,
                (Some(_), None) | (None, Some(_)) => {
                    report.problems.push(format!(
                        "files {} and {} hold different numbers of reads (stopped after {})",
                        file1.display(),
                        file2.display(),
                        pairs
                    ));
                    break;
                }
            };
            pairs += 1;
            if pairs == 1 {
                sample_header = r1.header.clone();
            }

            if ids_paired && !read_ids_are_mates(read_id(&r1.header), read_id(&r2.header)) {
                ids_paired = false;
                report.problems.push(format!(
                    "id_mismatch at read {}: {} vs {}",
                    pairs,
                    read_id(&r1.header),
                    read_id(&r2.header)
                ));
            }

            for record in [&r1, &r2] {
                if record.seq_len != record.qual_len {
                    report.problems.push(format!(
                        "sequence and quality strings differ in length at read {} {}",
                        pairs,
                        read_id(&record.header)
                    ));
                }
                tally.add(record.seq_len);
            }
        }

        report.ids_paired = Some(ids_paired);
        if pairs == 0 {
            report.problems.push(format!("no reads found in {}", file1.display()));
            return Ok(report);
        }

        report.stats = tally.stats(pairs, read_id(&sample_header).to_string());
        report.inferred_platform = Some(infer_platform(&sample_header, tally.max));
        report.length_class = LengthClass::from_max_length(tally.max);
        if report.length_class == LengthClass::Long {
            report.problems.push(format!(
                "paired reads appear to be long, expected short: {}:{}",
                file_label(file1),
                file_label(file2)
            ));
        }

        debug!("Paired study: {} pairs, max length {}", pairs, tally.max);
        Ok(report)
    }

    /// Study a single FASTQ file, probing for interleaved mates.
    ///
    /// Each odd-indexed record is compared with the record before it; the file
    /// counts as interleaved only when at least one comparison was made and
    /// every comparison found mates.
    pub fn study_single(&self, file: &Path) -> Result<StudyReport> {
        if first_line_format(file)? == SequenceFormat::Fasta {
            return self.study_fasta(&[file]);
        }

        info!("🔬 Studying single-end reads {}", file.display());
        let mut records = fastq_records(file)?;

        let mut report = StudyReport::empty(SequenceFormat::Fastq, Layout::SingleEnd);
        let mut tally = LengthTally::default();
        let mut sample_header = String::new();
        let mut previous_id = String::new();
        let mut mate_checks = 0usize;
        let mut mates_agree = true;
        let mut count = 0usize;

        while let Some(record) = next_summary(&mut records, file, &mut report.problems)? {
            let id = read_id(&record.header).to_string();
            if count == 0 {
                sample_header = record.header.clone();
            }
            if count % 2 == 1 && mates_agree {
                mate_checks += 1;
                mates_agree = read_ids_are_mates(&previous_id, &id);
            }

            if record.seq_len != record.qual_len {
                report.problems.push(format!(
                    "sequence and quality strings differ in length at read {} {}",
                    count + 1,
                    id
                ));
            }
            tally.add(record.seq_len);
            previous_id = id;
            count += 1;
        }

        if count == 0 {
            report.problems.push(format!("no reads found in {}", file.display()));
            return Ok(report);
        }

        report.interleaved = mate_checks > 0 && mates_agree;
        report.stats = tally.stats(count, read_id(&sample_header).to_string());
        report.inferred_platform = Some(infer_platform(&sample_header, tally.max));
        report.length_class = LengthClass::from_max_length(tally.max);

        debug!(
            "Single study: {} reads, max length {}, interleaved {}",
            count, tally.max, report.interleaved
        );
        Ok(report)
    }

    /// Study one or more FASTA files as a single collection of sequences.
    ///
    /// FASTA input is always classed as long.
    pub fn study_fasta(&self, files: &[&Path]) -> Result<StudyReport> {
        let mut report = StudyReport::empty(SequenceFormat::Fasta, Layout::NotApplicable);
        let mut tally = LengthTally::default();
        let mut sample_header: Option<String> = None;
        let mut count = 0usize;

        for file in files {
            info!("🔬 Studying FASTA {}", file.display());
            for record in fasta::Reader::from_bufread(open_records(file)?).records() {
                let record = record.with_context(|| format!("Failed to parse FASTA {}", file.display()))?;
                if sample_header.is_none() {
                    sample_header = Some(match record.desc() {
                        Some(desc) => format!(">{} {}", record.id(), desc),
                        None => format!(">{}", record.id()),
                    });
                }
                tally.add(record.seq().len());
                count += 1;
            }
        }

        let Some(header) = sample_header else {
            report.problems.push(format!(
                "no sequences found in {}",
                files
                    .iter()
                    .map(|f| f.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            return Ok(report);
        };

        report.stats = tally.stats(count, read_id(&header).to_string());
        report.inferred_platform = Some(infer_platform(&header, tally.max));
        report.length_class = LengthClass::Long;
        Ok(report)
    }
}

/// Short/long conflict between observed reads and the platform they were
/// registered under
pub fn length_class_conflict(expected: Platform, observed: LengthClass, label: &str) -> Option<String> {
    match observed {
        LengthClass::Long if expected.is_short_read() => Some(format!(
            "reads appear to be long, expected short for {expected}: {label}"
        )),
        LengthClass::Short if expected.is_long_read() => Some(format!(
            "reads appear to be short, expected long for {expected}: {label}"
        )),
        _ => None,
    }
}

fn first_line_format(path: &Path) -> Result<SequenceFormat> {
    let reader = open_reads(path)?;
    for line in reader.lines() {
        let line = line.with_context(|| format!("Failed to read {}", path.display()))?;
        if !line.trim().is_empty() {
            return Ok(SequenceFormat::from_first_line(&line));
        }
    }
    Ok(SequenceFormat::Unknown)
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
