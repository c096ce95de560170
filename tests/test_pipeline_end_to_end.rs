//! End-to-end pipeline tests
//!
//! Full runs from read files to saved contigs and run details, with every
//! external program replaced by a scripted runner.

mod common;

use asm_forge::assembly::Stage;
use asm_forge::pipeline::{AssemblyPipeline, PipelineOptions, ReadInputs, ToolRunner};
use asm_forge::Recipe;
use common::{write_illumina_fastq, write_nanopore_fastq, ScriptedRunner};
use std::sync::Arc;
use tempfile::TempDir;

fn unicycler_runner() -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner::new().on("unicycler", |_, work_dir| {
        let body = format!(
            ">1 length=3000 depth=1.00x circular=true\n{}\n>2 length=200 depth=1.00x\n{}\n",
            "ACGT".repeat(750),
            "GATC".repeat(50)
        );
        std::fs::write(work_dir.join("assembly.fasta"), body).ok()?;
        std::fs::write(work_dir.join("assembly.gfa"), "H\tVN:Z:1.0\nS\t1\tACGT\n").ok()?;
        std::fs::write(work_dir.join("unicycler.log"), "done\n").ok()?;
        Some(0)
    }))
}

fn options(base: &TempDir, prefix: &str) -> PipelineOptions {
    PipelineOptions {
        output_dir: base.path().join("run"),
        prefix: prefix.to_string(),
        threads: 2,
        memory_gb: 8,
        ..PipelineOptions::default()
    }
}

#[cfg(test)]
pub mod end_to_end_tests {
    use super::*;

    #[test]
    fn test_hybrid_run_saves_contigs_and_details() {
        let base = TempDir::new().unwrap();
        let reads = TempDir::new().unwrap();
        write_illumina_fastq(&reads.path().join("sample_1.fq"), 40, 1, 150);
        write_illumina_fastq(&reads.path().join("sample_2.fq"), 40, 2, 150);
        write_nanopore_fastq(&reads.path().join("ont.fq"), 5, 1500);

        let inputs = ReadInputs {
            anonymous: vec![
                reads.path().join("sample_1.fq").display().to_string(),
                reads.path().join("sample_2.fq").display().to_string(),
            ],
            nanopore: vec![reads.path().join("ont.fq").display().to_string()],
            ..ReadInputs::default()
        };

        let runner = unicycler_runner();
        let pipeline = AssemblyPipeline::new(options(&base, "demo"), Arc::clone(&runner) as Arc<dyn ToolRunner>);
        let summary = pipeline.run(&inputs).unwrap();

        assert_eq!(summary.read_sets, 2);
        assert_eq!(summary.recipe, Recipe::Unicycler);
        assert_eq!(summary.final_stage, Stage::Done);

        let contigs = summary.contigs.clone().unwrap();
        assert_eq!(contigs, summary.work_dir.join("save").join("demo_contigs.fasta"));
        let saved = std::fs::read_to_string(&contigs).unwrap();
        assert!(saved.starts_with(">demo_contig_1 "));
        assert!(saved.contains("circular=true"));
        assert!(!saved.contains("demo_contig_2"));

        let stats = summary.contig_stats.clone().unwrap();
        assert_eq!(stats.num_contigs, 1);
        assert_eq!(stats.total_length, 3000);

        let details_path = summary.run_details.clone().unwrap();
        assert!(details_path.ends_with("save/details/demo_run_details.json"));
        let details: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&details_path).unwrap()).unwrap();
        assert_eq!(details["assembly"]["recipe"], "unicycler");
        assert_eq!(details["assembly"]["final_stage"], "done");
        assert!(details["pairing"]["pairs"].as_array().unwrap().len() == 1);
        assert!(details["tools"]
            .as_array()
            .unwrap()
            .iter()
            .any(|tool| tool["label"] == "unicycler"));

        assert!(summary
            .work_dir
            .join("save/details/demo_assembly_graph.gfa")
            .exists());
        assert!(runner.calls().iter().any(|call| call.starts_with("unicycler ")));
        // Racon, Pilon and the depth passes were never scripted
        assert!(!summary.problems.is_empty());
    }

    #[test]
    fn test_run_without_reads_records_failure() {
        let base = TempDir::new().unwrap();
        let pipeline = AssemblyPipeline::new(options(&base, ""), unicycler_runner());
        let summary = pipeline.run(&ReadInputs::default()).unwrap();

        assert_eq!(summary.read_sets, 0);
        assert_eq!(summary.recipe, Recipe::Canu);
        assert_eq!(summary.final_stage, Stage::Failed);
        assert!(summary.contigs.is_none());
        assert!(summary.contig_stats.is_none());

        let details_path = summary.run_details.unwrap();
        let details: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(details_path).unwrap()).unwrap();
        assert_eq!(details["assembly"]["final_stage"], "failed");
    }

    #[test]
    fn test_run_with_no_surviving_contigs_saves_nothing() {
        let base = TempDir::new().unwrap();
        let reads = TempDir::new().unwrap();
        write_nanopore_fastq(&reads.path().join("ont.fq"), 5, 1500);
        let inputs = ReadInputs {
            nanopore: vec![reads.path().join("ont.fq").display().to_string()],
            ..ReadInputs::default()
        };

        let runner = Arc::new(ScriptedRunner::new().on("canu", |_, work_dir| {
            let body = format!(">tig00000001 len=100\n{}\n", "ACGT".repeat(25));
            std::fs::write(work_dir.join("canu.contigs.fasta"), body).ok()?;
            std::fs::write(work_dir.join("canu.contigs.gfa"), "H\tVN:Z:1.0\n").ok()?;
            Some(0)
        }));
        let mut opts = options(&base, "tiny");
        opts.quast = true;
        opts.bandage = true;
        opts.assembly.min_contig_length = 300;
        let pipeline = AssemblyPipeline::new(opts, Arc::clone(&runner) as Arc<dyn ToolRunner>);
        let summary = pipeline.run(&inputs).unwrap();

        assert_eq!(summary.recipe, Recipe::Canu);
        assert_eq!(summary.final_stage, Stage::Failed);
        assert!(summary.contigs.is_none());
        assert!(summary.contig_stats.is_none());
        assert!(!summary.work_dir.join("save/tiny_contigs.fasta").exists());
        let calls = runner.calls();
        assert!(!calls.iter().any(|call| call.starts_with("quast.py ")));
        assert!(!calls.iter().any(|call| call.starts_with("Bandage ")));

        let details_path = summary.run_details.clone().unwrap();
        let details: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&details_path).unwrap()).unwrap();
        assert_eq!(details["assembly"]["final_stage"], "failed");
        assert!(details["assembly"]["contigs"].is_null());
    }

    #[test]
    fn test_rerun_replaces_work_directory() {
        let base = TempDir::new().unwrap();
        let pipeline = AssemblyPipeline::new(options(&base, ""), unicycler_runner());

        let first = pipeline.prepare().unwrap();
        let stale = first.work_path("stale.txt");
        std::fs::write(&stale, "old").unwrap();

        let second = pipeline.prepare().unwrap();
        assert_eq!(first.work_dir, second.work_dir);
        assert!(!stale.exists());
        assert!(second.details_dir.exists());
    }
}
