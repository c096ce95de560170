//! QC File Reader Module
//!
//! Opens sequencing files for reading regardless of compression.
//! Supports FASTQ and FASTA formats, plain, gzipped or bzip2-compressed.
//!
//! # Features
//! - Compression detection from the file extension
//! - Multi-member gzip streams (as produced by `cat a.gz b.gz`)
//! - bzip2 decompression into the working directory
//! - Format detection from extension or first line

use anyhow::{Context, Result};
use bzip2::read::BzDecoder;
use flate2::read::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Compression wrapper of a read file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Bzip2,
}

impl Compression {
    /// Detect compression from extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") | Some("gzip") => Self::Gzip,
            Some("bz2") | Some("bzip2") => Self::Bzip2,
            _ => Self::None,
        }
    }
}

/// Sequence format of a read file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceFormat {
    Fastq,
    Fasta,
    #[serde(rename = "na")]
    Unknown,
}

impl SequenceFormat {
    /// Detect format from extension, looking through a compression suffix
    pub fn from_path(path: &Path) -> Self {
        let inner = match Compression::from_path(path) {
            Compression::None => path.to_path_buf(),
            _ => path.with_extension(""),
        };

        match inner.extension().and_then(|ext| ext.to_str()) {
            Some("fastq") | Some("fq") => Self::Fastq,
            Some("fasta") | Some("fa") | Some("fas") | Some("fna") => Self::Fasta,
            _ => Self::Unknown,
        }
    }

    /// Detect format from the first non-empty line of content
    pub fn from_first_line(line: &str) -> Self {
        match line.as_bytes().first() {
            Some(b'@') => Self::Fastq,
            Some(b'>') => Self::Fasta,
            _ => Self::Unknown,
        }
    }
}

/// Open a read file as a buffered line source, decompressing on the fly
pub fn open_reads(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open read file {}", path.display()))?;

    let reader: Box<dyn BufRead + Send> = match Compression::from_path(path) {
        Compression::Gzip => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        Compression::Bzip2 => Box::new(BufReader::new(BzDecoder::new(file))),
        Compression::None => Box::new(BufReader::new(file)),
    };
    Ok(reader)
}

/// Decompress a `.bz2` file into `dest_dir`, returning the new path.
///
/// The output keeps the file name minus its `.bz2` suffix.
pub fn decompress_bz2(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    let name = src
        .file_stem()
        .with_context(|| format!("No file name in {}", src.display()))?;
    let dest = dest_dir.join(name);

    info!("📦 Decompressing {} -> {}", src.display(), dest.display());
    let input = File::open(src)
        .with_context(|| format!("Failed to open bz2 file {}", src.display()))?;
    let mut decoder = BzDecoder::new(input);
    let output = File::create(&dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = BufWriter::new(output);
    let bytes = io::copy(&mut decoder, &mut writer)
        .with_context(|| format!("Failed to decompress {}", src.display()))?;
    writer.flush()?;

    debug!("Decompressed {} bytes", bytes);
    Ok(dest)
}

/// Concatenate several read files (any compression) into one plain file
pub fn concatenate_reads(sources: &[PathBuf], dest: &Path) -> Result<u64> {
    let output = File::create(dest)
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut writer = BufWriter::new(output);

    let mut total = 0;
    for source in sources {
        let mut reader = open_reads(source)?;
        total += io::copy(&mut reader, &mut writer)
            .with_context(|| format!("Failed to append {}", source.display()))?;
    }
    writer.flush()?;

    info!(
        "📎 Concatenated {} files into {} ({} bytes)",
        sources.len(),
        dest.display(),
        total
    );
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_compression_detection() {
        assert_eq!(Compression::from_path(Path::new("r.fastq.gz")), Compression::Gzip);
        assert_eq!(Compression::from_path(Path::new("r.fastq.bz2")), Compression::Bzip2);
        assert_eq!(Compression::from_path(Path::new("r.fastq")), Compression::None);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(SequenceFormat::from_path(Path::new("r.fq.gz")), SequenceFormat::Fastq);
        assert_eq!(SequenceFormat::from_path(Path::new("c.fasta")), SequenceFormat::Fasta);
        assert_eq!(SequenceFormat::from_path(Path::new("x.txt")), SequenceFormat::Unknown);
        assert_eq!(SequenceFormat::from_first_line("@r1"), SequenceFormat::Fastq);
        assert_eq!(SequenceFormat::from_first_line(">c1"), SequenceFormat::Fasta);
        assert_eq!(SequenceFormat::from_first_line(""), SequenceFormat::Unknown);
    }

    #[test]
    fn test_open_gzip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fastq.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
        encoder.write_all(b"@r1\nACGT\n+\nIIII\n").unwrap();
        encoder.finish().unwrap();

        let mut text = String::new();
        open_reads(&path).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "@r1\nACGT\n+\nIIII\n");
    }

    #[test]
    fn test_decompress_bz2() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("reads.fastq.bz2");
        let mut encoder = bzip2::write::BzEncoder::new(File::create(&src).unwrap(), bzip2::Compression::default());
        encoder.write_all(b"@r1\nACGT\n+\nIIII\n").unwrap();
        encoder.finish().unwrap();

        let out_dir = dir.path().join("work");
        std::fs::create_dir(&out_dir).unwrap();
        let dest = decompress_bz2(&src, &out_dir).unwrap();
        assert_eq!(dest.file_name().unwrap(), "reads.fastq");
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "@r1\nACGT\n+\nIIII\n");
    }

    #[test]
    fn test_concatenate_reads() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.fastq");
        let b = dir.path().join("b.fastq");
        std::fs::write(&a, "@a\nA\n+\nI\n").unwrap();
        std::fs::write(&b, "@b\nC\n+\nI\n").unwrap();
        let dest = dir.path().join("all.fastq");

        concatenate_reads(&[a, b], &dest).unwrap();
        assert_eq!(std::fs::read_to_string(dest).unwrap(), "@a\nA\n+\nI\n@b\nC\n+\nI\n");
    }
}
