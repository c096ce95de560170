//! Read-to-contig alignment
//!
//! Thin wrappers over minimap2, bowtie2 and samtools. All file names are
//! relative to the working directory.

use anyhow::{bail, Result};

use crate::core::ReadSet;
use crate::pipeline::context::PipelineContext;
use crate::pipeline::tools::{ToolInvocation, ToolOutput};

/// `contigs.racon.fasta` -> `contigs.racon`
pub fn contig_stem(contigs: &str) -> &str {
    contigs.strip_suffix(".fasta").unwrap_or(contigs)
}

fn require_success(tool: &str, output: &ToolOutput) -> Result<()> {
    if output.success() {
        return Ok(());
    }
    match output.exit_code {
        Some(code) => bail!("{tool} returned {code}"),
        None => bail!("{tool} did not run: {}", output.stderr.trim()),
    }
}

pub struct Aligner<'a> {
    ctx: &'a PipelineContext,
}

impl<'a> Aligner<'a> {
    pub fn new(ctx: &'a PipelineContext) -> Self {
        Self { ctx }
    }

    /// Map long reads with minimap2, returning the SAM file name
    pub fn map_long(&self, contigs: &str, reads: &ReadSet) -> Result<String> {
        let threads = self.ctx.threads.to_string();
        let stem = contig_stem(contigs);
        let index = format!("{stem}.mmi");
        let sam = format!("{stem}_{}.sam", reads.file_stem());

        let build = ToolInvocation::new("minimap2 index", "minimap2")
            .args(["-t", threads.as_str(), "-d", index.as_str(), contigs]);
        require_success("minimap2 index", &self.ctx.run_tool(&build))?;

        let map = ToolInvocation::new("minimap2", "minimap2")
            .args(["-t", threads.as_str(), "-a", "-o", sam.as_str(), contigs])
            .args(reads.files.iter().cloned());
        require_success("minimap2", &self.ctx.run_tool(&map))?;
        Ok(sam)
    }

    /// Map short reads with bowtie2, returning the SAM file name
    pub fn map_short(&self, contigs: &str, reads: &ReadSet) -> Result<String> {
        let threads = self.ctx.threads.to_string();
        let build = ToolInvocation::new("bowtie2-build", "bowtie2-build")
            .args(["--threads", threads.as_str(), contigs, contigs]);
        require_success("bowtie2-build", &self.ctx.run_tool(&build))?;

        let sam = format!("{contigs}_{}.sam", reads.file_stem());
        let mut map = ToolInvocation::new("bowtie2", "bowtie2").args(["-p", threads.as_str(), "-x", contigs]);
        map = match reads.files.as_slice() {
            [a, b] => map.args(["-1", a.as_str(), "-2", b.as_str()]),
            [f] if reads.interleaved => map.args(["--interleaved", f.as_str()]),
            files => map.arg("-U").arg(files.join(",")),
        };
        map = map.args(["-S", sam.as_str()]);
        require_success("bowtie2", &self.ctx.run_tool(&map))?;
        Ok(sam)
    }

    /// Convert to a sorted, indexed BAM, returning its file name
    pub fn sam_to_bam(&self, sam: &str) -> Result<String> {
        let sort_threads = (self.ctx.threads / 2).max(1).to_string();
        let base = sam.strip_suffix(".sam").unwrap_or(sam);
        let unsorted = format!("{base}_unsorted.bam");
        let sorted = format!("{base}.bam");

        let view = ToolInvocation::new("samtools view", "samtools").args([
            "view",
            "-bS",
            "-@",
            sort_threads.as_str(),
            "-o",
            unsorted.as_str(),
            sam,
        ]);
        require_success("samtools view", &self.ctx.run_tool(&view))?;

        let sort = ToolInvocation::new("samtools sort", "samtools").args([
            "sort",
            "-@",
            sort_threads.as_str(),
            "-o",
            sorted.as_str(),
            unsorted.as_str(),
        ]);
        require_success("samtools sort", &self.ctx.run_tool(&sort))?;

        let index = ToolInvocation::new("samtools index", "samtools").args(["index", sorted.as_str()]);
        require_success("samtools index", &self.ctx.run_tool(&index))?;
        Ok(sorted)
    }

    /// Short or long alignment by length class, as BAM
    pub fn bam_for(&self, contigs: &str, reads: &ReadSet) -> Result<String> {
        let sam = if reads.is_short() {
            self.map_short(contigs, reads)?
        } else {
            self.map_long(contigs, reads)?
        };
        self.sam_to_bam(&sam)
    }
}
