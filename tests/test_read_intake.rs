//! Read intake tests
//!
//! Platform inference, read id mate matching, registry bookkeeping and
//! anonymous file pairing against real files in temporary directories.

mod common;

use asm_forge::core::{infer_platform, read_ids_are_mates, Platform};
use asm_forge::qc::ReadSampler;
use asm_forge::reads::{PairFinder, ReadRegistry, RegisterOptions};
use common::{write_illumina_fastq, write_nanopore_fastq};
use tempfile::TempDir;

fn spec_for(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).display().to_string()
}

#[cfg(test)]
pub mod read_id_properties {
    use super::*;

    fn random_id(len: usize) -> String {
        const ALPHABET: &[u8] = b"ACGTMN0123456789:_-";
        (0..len)
            .map(|_| ALPHABET[fastrand::usize(..ALPHABET.len())] as char)
            .collect()
    }

    #[test]
    fn test_identical_ids_are_always_mates() {
        fastrand::seed(7);
        for _ in 0..200 {
            let id = random_id(fastrand::usize(1..40));
            assert!(read_ids_are_mates(&id, &id));
        }
    }

    #[test]
    fn test_one_two_swap_marks_mates() {
        fastrand::seed(11);
        for _ in 0..200 {
            let stem = random_id(fastrand::usize(0..30));
            let tail = random_id(fastrand::usize(0..10));
            let r1 = format!("{stem}1{tail}");
            let r2 = format!("{stem}2{tail}");
            assert!(read_ids_are_mates(&r1, &r2), "{r1} vs {r2}");

            let r3 = format!("{stem}3{tail}");
            assert!(!read_ids_are_mates(&r1, &r3), "{r1} vs {r3}");
        }
    }

    #[test]
    fn test_fasta_header_classification() {
        assert_eq!(infer_platform(">read1", 150), Platform::Fasta);
        assert_eq!(infer_platform(">contig_1 length=5000", 5000), Platform::Fasta);
    }

    #[test]
    fn test_long_reads_never_short_platform() {
        let header = "@M00123:8:000000000-A1B2C:1:1101:1000:2000/1";
        assert_eq!(infer_platform(header, 150), Platform::Illumina);
        assert_ne!(infer_platform(header, 5000), Platform::Illumina);
    }
}

#[cfg(test)]
pub mod registry_tests {
    use super::*;

    #[test]
    fn test_duplicate_spec_leaves_one_entry_and_a_problem() {
        let input = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_illumina_fastq(&input.path().join("reads.fq"), 20, 1, 150);
        let spec = spec_for(&input, "reads.fq");

        let mut registry = ReadRegistry::new(work.path());
        registry
            .register(&spec, RegisterOptions::platform(Platform::Illumina))
            .unwrap();
        let problems_before = registry.problems().len();

        let second = registry.register(&spec, RegisterOptions::platform(Platform::Illumina));
        assert!(second.is_err());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.problems().len(), problems_before + 1);
    }

    #[test]
    fn test_pair_spec_order_does_not_change_id() {
        let input = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_illumina_fastq(&input.path().join("s_1.fq"), 20, 1, 150);
        write_illumina_fastq(&input.path().join("s_2.fq"), 20, 2, 150);
        let a = spec_for(&input, "s_1.fq");
        let b = spec_for(&input, "s_2.fq");

        let mut registry = ReadRegistry::new(work.path());
        let forward = registry
            .register(&format!("{a}:{b}"), RegisterOptions::platform(Platform::Illumina))
            .unwrap();
        let reverse = registry
            .register(&format!("{b}:{a}"), RegisterOptions::platform(Platform::Illumina))
            .unwrap();

        assert_eq!(forward, reverse);
        assert_eq!(registry.len(), 1);
        let set = registry.get(&forward).unwrap();
        assert!(set.is_pair());
        assert!(set.is_short());
        assert_eq!(registry.platform_ids(Platform::Illumina), &[forward.clone()]);
    }

    #[test]
    fn test_missing_file_is_rejected() {
        let work = TempDir::new().unwrap();
        let mut registry = ReadRegistry::new(work.path());
        let result = registry.register("/no/such/reads.fq", RegisterOptions::default());
        assert!(result.is_err());
        assert!(registry.is_empty());
        assert_eq!(registry.problems().len(), 1);
    }

    #[test]
    fn test_long_reads_are_classified_long() {
        let input = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        write_nanopore_fastq(&input.path().join("ont.fq"), 5, 1200);

        let mut registry = ReadRegistry::new(work.path());
        let id = registry
            .register(&spec_for(&input, "ont.fq"), RegisterOptions::platform(Platform::Nanopore))
            .unwrap();
        let set = registry.get(&id).unwrap();
        assert!(set.is_long());
        assert!(!registry.has_live_short_reads());
        assert_eq!(registry.live_for(Platform::Nanopore).len(), 1);
    }
}

#[cfg(test)]
pub mod pairing_tests {
    use super::*;

    fn finder() -> PairFinder {
        PairFinder::new(ReadSampler::new(20_000), 2).unwrap()
    }

    #[test]
    fn test_numbered_files_pair_up() {
        let input = TempDir::new().unwrap();
        write_illumina_fastq(&input.path().join("sample_1.fq"), 30, 1, 150);
        write_illumina_fastq(&input.path().join("sample_2.fq"), 30, 2, 150);
        let items = vec![spec_for(&input, "sample_2.fq"), spec_for(&input, "sample_1.fq")];

        let outcome = finder().find_pairs(&items);
        assert_eq!(outcome.pairs.len(), 1);
        assert!(outcome.singles.is_empty());
        assert_eq!(
            outcome.pairs[0],
            format!("{}:{}", spec_for(&input, "sample_1.fq"), spec_for(&input, "sample_2.fq"))
        );
        assert_eq!(outcome.platform_of(&outcome.pairs[0]), Platform::Illumina);
    }

    #[test]
    fn test_multi_digit_numbers_do_not_pair() {
        let input = TempDir::new().unwrap();
        write_illumina_fastq(&input.path().join("sample_11.fq"), 30, 1, 150);
        write_illumina_fastq(&input.path().join("sample_12.fq"), 30, 2, 150);
        let items = vec![spec_for(&input, "sample_11.fq"), spec_for(&input, "sample_12.fq")];

        let outcome = finder().find_pairs(&items);
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.singles.len(), 2);
    }

    #[test]
    fn test_discordant_platforms_fall_back_to_singles() {
        let input = TempDir::new().unwrap();
        write_illumina_fastq(&input.path().join("mix_1.fq"), 10, 1, 150);
        write_nanopore_fastq(&input.path().join("mix_2.fq"), 5, 1200);
        let items = vec![spec_for(&input, "mix_1.fq"), spec_for(&input, "mix_2.fq")];

        let outcome = finder().find_pairs(&items);
        assert!(outcome.pairs.is_empty());
        assert_eq!(outcome.singles.len(), 2);
        assert!(outcome.problems.iter().any(|p| p.contains("Discordant")));
    }

    #[test]
    fn test_mismatched_read_ids_reject_the_pair() {
        let input = TempDir::new().unwrap();
        write_illumina_fastq(&input.path().join("x_1.fq"), 10, 1, 150);
        // Second file comes from a different run
        let ids: Vec<String> = (0..10)
            .map(|i| format!("@M00999:1:000000000-ZZZZZ:1:2202:{}:3000/2", 5000 + i))
            .collect();
        std::fs::write(input.path().join("x_2.fq"), common::fastq_records(&ids, 150)).unwrap();
        let items = vec![spec_for(&input, "x_1.fq"), spec_for(&input, "x_2.fq")];

        let outcome = finder().find_pairs(&items);
        assert!(outcome.pairs.is_empty());
        assert!(outcome.problems.iter().any(|p| p.starts_with("Read IDs do not match")));
    }
}
