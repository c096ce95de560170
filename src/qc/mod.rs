//! Read Inspection Module
//!
//! Cheap and full passes over read files:
//! - Compression-aware opening (gzip, bzip2)
//! - Bounded-prefix sampling for quick classification
//! - Full-file statistics with pairing and length consistency checks

pub mod file_reader;
pub mod read_stats;
pub mod sampler;

pub use file_reader::{concatenate_reads, decompress_bz2, open_reads, Compression, SequenceFormat};
pub use read_stats::{ReadStatEngine, StudyReport};
pub use sampler::{ReadSample, ReadSampler};
