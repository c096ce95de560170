//! Command-line interface
//!
//! `asm-forge assemble` runs the pipeline; `asm-forge config` writes the
//! default configuration. Flags override values loaded from configuration
//! files and the environment.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::assembly::{Recipe, Stage};
use crate::pipeline::{AssemblyPipeline, ProcessRunner, ReadInputs, RunSummary};
use crate::utils::configuration::{ConfigurationManager, PipelineConfiguration, LOG_FILE_NAME};

#[derive(Parser)]
#[command(name = "asm-forge")]
#[command(about = "Read classification, pairing and genome assembly orchestration")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register reads, assemble, polish and filter contigs
    Assemble(AssembleArgs),

    /// Write the default configuration as TOML
    Config {
        #[arg(short, long, default_value = "asm-forge.toml")]
        output: PathBuf,
    },
}

#[derive(Args, Debug, Default)]
pub struct AssembleArgs {
    /// Illumina reads: file, `f1:f2` paired-end or `f1%f2` mate-pair
    #[arg(long, num_args = 1.., conflicts_with = "iontorrent")]
    pub illumina: Vec<String>,

    /// IonTorrent reads: file, `f1:f2` or `f1%f2`
    #[arg(long, num_args = 1..)]
    pub iontorrent: Vec<String>,

    #[arg(long, num_args = 1..)]
    pub pacbio: Vec<String>,

    #[arg(long, num_args = 1..)]
    pub nanopore: Vec<String>,

    /// Contigs or reads in FASTA format
    #[arg(long, num_args = 1..)]
    pub fasta: Vec<String>,

    /// Files of unknown platform and pairing, or named by SRA run accession
    #[arg(long = "anonymous-reads", num_args = 1..)]
    pub anonymous_reads: Vec<String>,

    /// Items (as given to --illumina/--iontorrent) that are interleaved pairs
    #[arg(long, num_args = 1..)]
    pub interleaved: Vec<String>,

    #[arg(long, value_enum)]
    pub recipe: Option<Recipe>,

    #[arg(long)]
    pub racon_iterations: Option<usize>,

    #[arg(long)]
    pub pilon_iterations: Option<usize>,

    #[arg(long, value_name = "JAR")]
    pub pilon_jar: Option<PathBuf>,

    /// Prefix for saved output files
    #[arg(long)]
    pub prefix: Option<String>,

    /// Genome size estimate for Canu, e.g. 5m
    #[arg(long)]
    pub genome_size: Option<String>,

    #[arg(long)]
    pub min_contig_length: Option<usize>,

    #[arg(long)]
    pub min_contig_coverage: Option<f64>,

    #[arg(long, value_name = "FASTA")]
    pub trusted_contigs: Option<PathBuf>,

    #[arg(long, value_name = "FASTA")]
    pub untrusted_contigs: Option<PathBuf>,

    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Memory limit in GB
    #[arg(short, long)]
    pub memory: Option<usize>,

    /// Trim short reads with trim_galore before assembly
    #[arg(long)]
    pub trim: bool,

    /// Run Quast on the final contigs
    #[arg(long)]
    pub quast: bool,

    /// Plot the assembly graph with Bandage
    #[arg(long)]
    pub bandage: bool,

    /// Directories searched for tools before PATH (colon separated)
    #[arg(long, value_delimiter = ':')]
    pub path_prefix: Vec<PathBuf>,

    /// Base name of the working directory (`<dir>_work`)
    #[arg(short = 'd', long = "output-directory")]
    pub output_directory: Option<PathBuf>,
}

impl AssembleArgs {
    /// Overlay command-line values onto loaded configuration
    pub fn apply(&self, config: &mut PipelineConfiguration) {
        let general = &mut config.general;
        if let Some(dir) = &self.output_directory {
            general.output_dir = dir.clone();
        }
        if let Some(prefix) = &self.prefix {
            general.prefix = prefix.clone();
        }
        if let Some(threads) = self.threads {
            general.threads = threads;
        }
        if let Some(memory) = self.memory {
            general.memory_gb = memory;
        }
        if !self.path_prefix.is_empty() {
            general.path_prefix = self.path_prefix.clone();
        }

        let assembly = &mut config.assembly;
        if let Some(recipe) = self.recipe {
            assembly.recipe = recipe;
        }
        if let Some(size) = &self.genome_size {
            assembly.genome_size = size.clone();
        }
        if let Some(length) = self.min_contig_length {
            assembly.min_contig_length = length;
        }
        if let Some(coverage) = self.min_contig_coverage {
            assembly.min_contig_coverage = coverage;
        }
        if self.trusted_contigs.is_some() {
            assembly.trusted_contigs = self.trusted_contigs.clone();
        }
        if self.untrusted_contigs.is_some() {
            assembly.untrusted_contigs = self.untrusted_contigs.clone();
        }
        assembly.trim |= self.trim;
        assembly.quast |= self.quast;
        assembly.bandage |= self.bandage;

        let polishing = &mut config.polishing;
        if let Some(n) = self.racon_iterations {
            polishing.racon_iterations = n;
        }
        if let Some(n) = self.pilon_iterations {
            polishing.pilon_iterations = n;
        }
        if self.pilon_jar.is_some() {
            polishing.pilon_jar = self.pilon_jar.clone();
        }
    }

    pub fn read_inputs(&self) -> ReadInputs {
        ReadInputs {
            illumina: self.illumina.clone(),
            iontorrent: self.iontorrent.clone(),
            pacbio: self.pacbio.clone(),
            nanopore: self.nanopore.clone(),
            fasta: self.fasta.clone(),
            anonymous: self.anonymous_reads.clone(),
            interleaved: self.interleaved.clone(),
        }
    }
}

impl Cli {
    /// Run the selected command
    pub fn execute(self) -> Result<()> {
        let mut manager = ConfigurationManager::load(self.config.as_deref())?;
        if self.verbose {
            manager.config_mut().logging.level = "debug".to_string();
        }

        match &self.command {
            Commands::Config { output } => {
                manager.save_config(output)?;
                println!("{} {}", "✅ Configuration written to".green(), output.display());
                Ok(())
            }
            Commands::Assemble(args) => {
                args.apply(manager.config_mut());
                manager.validate_configuration()?;
                run_assembly(&manager, &args.read_inputs())
            }
        }
    }
}

fn run_assembly(manager: &ConfigurationManager, inputs: &ReadInputs) -> Result<()> {
    let config = manager.config();
    let runner = Arc::new(ProcessRunner::new(config.general.path_prefix.clone()));
    let mut pipeline = AssemblyPipeline::new(config.pipeline_options(), runner);
    let ctx = pipeline
        .prepare()
        .context("Failed to create the working directory")?;

    let log_file = config
        .logging
        .file
        .clone()
        .unwrap_or_else(|| ctx.details_path(LOG_FILE_NAME));
    let _guard = manager.setup_logging(Some(&log_file))?;
    pipeline.set_log_file(log_file);

    if inputs.is_empty() {
        info!("No read inputs given, nothing will be assembled");
    }
    let summary = pipeline.run_in(&ctx, inputs);
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "═══ asm-forge run summary ═══".bold());
    println!("   Working directory: {}", summary.work_dir.display());
    println!("   Read sets:         {}", summary.read_sets);
    println!("   Recipe:            {}", summary.recipe);

    let stage = format!("{:?}", summary.final_stage);
    let stage = if summary.final_stage == Stage::Done {
        stage.as_str().green()
    } else {
        stage.as_str().red()
    };
    println!("   Final stage:       {}", stage);

    match &summary.contigs {
        Some(contigs) => println!("   Contigs:           {}", contigs.display().to_string().as_str().green()),
        None => println!("   Contigs:           {}", "none produced".red()),
    }
    if let Some(stats) = &summary.contig_stats {
        println!(
            "   {} contigs, {} bp total, N50 {} bp, largest {} bp",
            stats.num_contigs, stats.total_length, stats.n50, stats.largest_contig
        );
    }
    if let Some(details) = &summary.run_details {
        println!("   Run details:       {}", details.display());
    }
    if !summary.problems.is_empty() {
        println!("   {}", format!("{} problems recorded:", summary.problems.len()).as_str().yellow());
        for problem in summary.problems.iter().take(10) {
            println!("     - {}", problem);
        }
    }
    println!("   Elapsed:           {:.1}s", summary.elapsed.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_flags_override_config() {
        let cli = Cli::try_parse_from([
            "asm-forge",
            "assemble",
            "--illumina",
            "a_1.fq:a_2.fq",
            "--nanopore",
            "long.fq",
            "--recipe",
            "meta-spades",
            "-t",
            "16",
            "--min-contig-coverage",
            "2.5",
            "--trim",
            "-d",
            "out",
        ])
        .unwrap();
        let Commands::Assemble(args) = cli.command else {
            panic!("expected assemble");
        };

        let mut config = PipelineConfiguration::default();
        args.apply(&mut config);
        assert_eq!(config.general.threads, 16);
        assert_eq!(config.general.output_dir, PathBuf::from("out"));
        assert_eq!(config.assembly.recipe, Recipe::MetaSpades);
        assert_eq!(config.assembly.min_contig_coverage, 2.5);
        assert!(config.assembly.trim);
        assert_eq!(config.general.memory_gb, 250);

        let inputs = args.read_inputs();
        assert_eq!(inputs.illumina, vec!["a_1.fq:a_2.fq".to_string()]);
        assert_eq!(inputs.nanopore.len(), 1);
    }

    #[test]
    fn test_illumina_and_iontorrent_conflict() {
        let parsed = Cli::try_parse_from([
            "asm-forge",
            "assemble",
            "--illumina",
            "a.fq",
            "--iontorrent",
            "b.fq",
        ]);
        assert!(parsed.is_err());
    }
}
