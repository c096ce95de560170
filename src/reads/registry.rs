//! Read set registry
//!
//! The authoritative store of every read set the run knows about, raw or
//! derived. Registration links input files into the working directory so
//! external tools can use bare file names, studies their contents, and keeps
//! a per-platform index that later stages iterate over.

use indexmap::IndexMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::{Layout, PairDelimiter, Platform, ReadSet};
use crate::qc::file_reader::{decompress_bz2, SequenceFormat};
use crate::qc::read_stats::{length_class_conflict, ReadStatEngine, StudyReport};
use crate::qc::sampler::ReadSampler;

/// Why a registration call was turned away
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("duplicate registration of reads {spec}")]
    Duplicate { spec: String },

    #[error("file does not exist: {path}")]
    MissingFile { path: PathBuf },

    #[error("malformed read spec {spec}: {reason}")]
    MalformedSpec { spec: String, reason: String },

    #[error("file name {name} is already taken in the working directory by {existing}")]
    NameCollision { name: String, existing: PathBuf },

    #[error("I/O error while registering {spec}: {message}")]
    Io { spec: String, message: String },

    #[error("failed to study {id}: {message}")]
    Study { id: String, message: String },
}

/// Optional hints supplied with a registration
#[derive(Debug, Clone, Default)]
pub struct RegisterOptions {
    pub platform: Option<Platform>,
    pub interleaved: bool,
    /// Id of the read set this one replaces downstream
    pub supersedes: Option<String>,
}

impl RegisterOptions {
    pub fn platform(platform: Platform) -> Self {
        Self {
            platform: Some(platform),
            ..Self::default()
        }
    }
}

/// A file staged in the working directory during registration
struct StagedFile {
    name: String,
    created: Vec<PathBuf>,
    transformation: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ReadRegistry {
    #[serde(skip)]
    work_dir: PathBuf,
    #[serde(skip)]
    sampler: ReadSampler,
    #[serde(skip)]
    engine: ReadStatEngine,
    reads: IndexMap<String, ReadSet>,
    #[serde(rename = "platform")]
    platform_index: BTreeMap<Platform, Vec<String>>,
    original_items: Vec<String>,
    derived_reads: Vec<String>,
    problems: Vec<String>,
    #[serde(rename = "pre_assembly_transformations")]
    transformations: Vec<String>,
}

impl ReadRegistry {
    /// Registry staging files into `work_dir`, which must already exist
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self::with_sampler(work_dir, ReadSampler::default())
    }

    pub fn with_sampler(work_dir: impl Into<PathBuf>, sampler: ReadSampler) -> Self {
        let platform_index = Platform::INDEXED.iter().map(|p| (*p, Vec::new())).collect();
        Self {
            work_dir: work_dir.into(),
            sampler,
            engine: ReadStatEngine::new(),
            reads: IndexMap::new(),
            platform_index,
            original_items: Vec::new(),
            derived_reads: Vec::new(),
            problems: Vec::new(),
            transformations: Vec::new(),
        }
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn sampler(&self) -> &ReadSampler {
        &self.sampler
    }

    /// Register a read spec: `file`, `file1:file2` (paired-end) or
    /// `file1%file2` (mate-pair).
    ///
    /// Either the complete entry becomes visible (files staged, contents
    /// studied) or the call fails and the registry keeps only a problem note.
    /// A spec resolving to an already registered id returns that id.
    pub fn register(
        &mut self,
        spec: &str,
        options: RegisterOptions,
    ) -> Result<String, RegistrationError> {
        debug!("register({spec}, {options:?})");
        if self.original_items.iter().any(|item| item == spec) {
            return self.reject(RegistrationError::Duplicate {
                spec: spec.to_string(),
            });
        }

        let (sources, delimiter) = match Self::parse_spec(spec) {
            Ok(parsed) => parsed,
            Err(e) => return self.reject(e),
        };
        if let Some(missing) = sources.iter().find(|p| !p.exists()) {
            return self.reject(RegistrationError::MissingFile {
                path: missing.clone(),
            });
        }

        let id = Self::canonical_id(&sources, delimiter);
        if self.reads.contains_key(&id) {
            self.original_items.push(spec.to_string());
            self.add_problem(format!("registered name {id} already in registry (from {spec})"));
            return Ok(id);
        }

        let mut staged = Vec::with_capacity(sources.len());
        for source in &sources {
            match self.stage_file(source, spec) {
                Ok(file) => staged.push(file),
                Err(e) => {
                    Self::roll_back(&staged);
                    return self.reject(e);
                }
            }
        }

        let files: Vec<String> = staged.iter().map(|s| s.name.clone()).collect();
        let mut read_set = ReadSet::new(id.clone(), files, delimiter);

        let superseded = options
            .supersedes
            .as_ref()
            .and_then(|old| self.reads.get(old).map(|set| (old.clone(), set.platform)));
        if let (Some(old), None) = (&options.supersedes, &superseded) {
            self.add_problem(format!("superseded read set {old} not found for {id}"));
        }
        read_set.platform = match &superseded {
            Some((_, platform)) => *platform,
            None => options.platform.unwrap_or(Platform::Unknown),
        };

        let report = match self.run_study(&read_set) {
            Ok(report) => report,
            Err(e) => {
                Self::roll_back(&staged);
                return self.reject(RegistrationError::Study {
                    id,
                    message: format!("{e:#}"),
                });
            }
        };
        Self::apply_report(&mut read_set, report, options.interleaved);

        for file in &staged {
            if let Some(note) = &file.transformation {
                self.transformations.push(note.clone());
            }
        }

        if read_set.platform == Platform::Fasta {
            self.index_push(Platform::Fasta, &id);
        } else if let Some((old, platform)) = superseded {
            self.replace_in_index(platform, &old, &id);
            if let Some(old_set) = self.reads.get_mut(&old) {
                old_set.superseded_by = Some(id.clone());
            }
            read_set.supersedes = Some(old);
            self.derived_reads.push(id.clone());
        } else if read_set.platform != Platform::Unknown {
            self.index_push(read_set.platform, &id);
        }

        info!(
            "📥 Registered {} ({}, {:?}, {:?})",
            id, read_set.platform, read_set.layout, read_set.length_class
        );
        self.reads.insert(id.clone(), read_set);
        self.original_items.push(spec.to_string());
        Ok(id)
    }

    /// Canonical id: delimiter-joined sorted bare names (`.bz2` stripped)
    pub fn canonical_id(sources: &[PathBuf], delimiter: Option<PairDelimiter>) -> String {
        let mut names: Vec<String> = sources.iter().map(|p| staged_name(p)).collect();
        names.sort();
        match delimiter {
            Some(d) => names.join(&d.as_char().to_string()),
            None => names.concat(),
        }
    }

    /// Re-run the full study of a registered read set
    pub fn study(&mut self, id: &str) -> crate::Result<()> {
        let set = self
            .reads
            .get(id)
            .ok_or_else(|| anyhow::anyhow!("read set {id} is not registered"))?;
        let report = self.run_study(set)?;
        if let Some(set) = self.reads.get_mut(id) {
            let interleaved = set.interleaved;
            Self::apply_report(set, report, interleaved);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&ReadSet> {
        self.reads.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut ReadSet> {
        self.reads.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.reads.contains_key(id)
    }

    /// All read sets in registration order, superseded ones included
    pub fn read_sets(&self) -> impl Iterator<Item = &ReadSet> {
        self.reads.values()
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Ids indexed under `platform`, in index order
    pub fn platform_ids(&self, platform: Platform) -> &[String] {
        self.platform_index
            .get(&platform)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Live read sets indexed under `platform`
    pub fn live_for(&self, platform: Platform) -> Vec<&ReadSet> {
        self.platform_ids(platform)
            .iter()
            .filter_map(|id| self.reads.get(id))
            .filter(|set| set.is_live())
            .collect()
    }

    /// Live read sets across the whole platform index
    pub fn live_read_sets(&self) -> Vec<&ReadSet> {
        Platform::INDEXED
            .iter()
            .flat_map(|p| self.live_for(*p))
            .collect()
    }

    pub fn has_live_short_reads(&self) -> bool {
        self.live_for(Platform::Illumina).len() + self.live_for(Platform::IonTorrent).len() > 0
    }

    pub fn platform_index(&self) -> &BTreeMap<Platform, Vec<String>> {
        &self.platform_index
    }

    pub fn original_items(&self) -> &[String] {
        &self.original_items
    }

    pub fn derived_reads(&self) -> &[String] {
        &self.derived_reads
    }

    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    pub fn transformations(&self) -> &[String] {
        &self.transformations
    }

    pub fn add_problem(&mut self, problem: impl Into<String>) {
        let problem = problem.into();
        warn!("⚠️  {}", problem);
        self.problems.push(problem);
    }

    pub fn add_transformation(&mut self, note: impl Into<String>) {
        let note = note.into();
        info!("🔁 {}", note);
        self.transformations.push(note);
    }

    /// Path of a staged file inside the working directory
    pub fn path_of(&self, file: &str) -> PathBuf {
        self.work_dir.join(file)
    }

    fn reject<T>(&mut self, error: RegistrationError) -> Result<T, RegistrationError> {
        self.add_problem(error.to_string());
        Err(error)
    }

    fn parse_spec(spec: &str) -> Result<(Vec<PathBuf>, Option<PairDelimiter>), RegistrationError> {
        let Some(delimiter) = PairDelimiter::detect(spec) else {
            if spec.is_empty() {
                return Err(RegistrationError::MalformedSpec {
                    spec: spec.to_string(),
                    reason: "empty".to_string(),
                });
            }
            return Ok((vec![PathBuf::from(spec)], None));
        };

        let parts: Vec<&str> = spec.split(delimiter.as_char()).collect();
        match parts.as_slice() {
            [a, b] if !a.is_empty() && !b.is_empty() => {
                Ok((vec![PathBuf::from(a), PathBuf::from(b)], Some(delimiter)))
            }
            _ => Err(RegistrationError::MalformedSpec {
                spec: spec.to_string(),
                reason: format!("expected exactly two files around '{}'", delimiter.as_char()),
            }),
        }
    }

    /// Link `source` into the working directory and decompress bz2
    fn stage_file(&self, source: &Path, spec: &str) -> Result<StagedFile, RegistrationError> {
        let io_err = |e: std::io::Error| RegistrationError::Io {
            spec: spec.to_string(),
            message: e.to_string(),
        };

        let absolute = source.canonicalize().map_err(io_err)?;
        let work_dir = self.work_dir.canonicalize().map_err(io_err)?;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RegistrationError::MalformedSpec {
                spec: spec.to_string(),
                reason: format!("{} has no file name", source.display()),
            })?;

        let mut created = Vec::new();
        let local = self.work_dir.join(&name);
        if absolute.parent() != Some(work_dir.as_path()) {
            if local.symlink_metadata().is_ok() {
                let existing = local.canonicalize().unwrap_or_else(|_| local.clone());
                if existing != absolute {
                    return Err(RegistrationError::NameCollision { name, existing });
                }
            } else {
                debug!("symlinking {} to {}", absolute.display(), local.display());
                link_file(&absolute, &local).map_err(io_err)?;
                created.push(local.clone());
            }
        }

        if !name.ends_with(".bz2") {
            return Ok(StagedFile {
                name,
                created,
                transformation: None,
            });
        }

        match decompress_bz2(&local, &self.work_dir) {
            Ok(dest) => {
                let plain = staged_name(Path::new(&name));
                created.push(dest);
                Ok(StagedFile {
                    transformation: Some(format!("decompressing bz2 file {name} to {plain}")),
                    name: plain,
                    created,
                })
            }
            Err(e) => {
                Self::remove_created(&created);
                Err(RegistrationError::Io {
                    spec: spec.to_string(),
                    message: format!("{e:#}"),
                })
            }
        }
    }

    fn roll_back(staged: &[StagedFile]) {
        for file in staged {
            Self::remove_created(&file.created);
        }
    }

    fn remove_created(created: &[PathBuf]) {
        for path in created {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("rollback could not remove {}: {}", path.display(), e);
            }
        }
    }

    fn run_study(&self, set: &ReadSet) -> crate::Result<StudyReport> {
        let paths: Vec<PathBuf> = set.files.iter().map(|f| self.path_of(f)).collect();
        match paths.as_slice() {
            [a, b] => self.engine.study_paired(a, b),
            [a] => self.engine.study_single(a),
            _ => Err(anyhow::anyhow!("read set {} has {} files", set.id, paths.len())),
        }
    }

    fn apply_report(set: &mut ReadSet, report: StudyReport, declared_interleaved: bool) {
        set.stats = report.stats;
        set.inferred_platform = report.inferred_platform;
        set.length_class = report.length_class;
        set.layout = report.layout;
        set.ids_paired = report.ids_paired;
        set.problems.extend(report.problems);

        if report.format == SequenceFormat::Fasta {
            if !matches!(set.platform, Platform::Fasta | Platform::Unknown) {
                set.add_problem(format!(
                    "{} was given as {} but holds FASTA sequences",
                    set.id, set.platform
                ));
            }
            set.platform = Platform::Fasta;
            set.interleaved = false;
            return;
        }

        if declared_interleaved && !report.interleaved {
            set.add_problem(format!(
                "{} declared interleaved but mate ids do not alternate",
                set.id
            ));
        }
        set.interleaved = declared_interleaved || report.interleaved;
        if set.interleaved && set.layout == Layout::SingleEnd {
            debug!("{} treated as interleaved pairs", set.id);
        }

        if let Some(problem) = length_class_conflict(set.platform, set.length_class, &set.id) {
            set.add_problem(problem);
        }
    }

    fn index_push(&mut self, platform: Platform, id: &str) {
        let ids = self.platform_index.entry(platform).or_default();
        if !ids.iter().any(|existing| existing == id) {
            ids.push(id.to_string());
        }
    }

    fn replace_in_index(&mut self, platform: Platform, old: &str, new: &str) {
        let ids = self.platform_index.entry(platform).or_default();
        match ids.iter().position(|existing| existing == old) {
            Some(pos) => ids[pos] = new.to_string(),
            None => {
                ids.push(new.to_string());
                self.add_problem(format!(
                    "superseded name {old} not found in {platform} index, appended {new}"
                ));
            }
        }
    }
}

/// Bare name a source file will have in the working directory
fn staged_name(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    match name.strip_suffix(".bz2") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

#[cfg(unix)]
fn link_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn link_file(target: &Path, link: &Path) -> std::io::Result<()> {
    std::fs::copy(target, link).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fastq(ids: &[&str], len: usize) -> String {
        ids.iter()
            .map(|id| format!("{id}\n{}\n+\n{}\n", "A".repeat(len), "I".repeat(len)))
            .collect()
    }

    #[test]
    fn test_canonical_id_sorted() {
        let a = vec![PathBuf::from("/x/b.fq"), PathBuf::from("/y/a.fq.bz2")];
        assert_eq!(
            ReadRegistry::canonical_id(&a, Some(PairDelimiter::MatePair)),
            "a.fq%b.fq"
        );
    }

    #[test]
    fn test_malformed_spec_rejected() {
        let dir = tempdir().unwrap();
        let mut registry = ReadRegistry::new(dir.path());
        let err = registry.register("a.fq:b.fq:c.fq", RegisterOptions::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::MalformedSpec { .. }));
        assert!(registry.is_empty());
        assert_eq!(registry.problems().len(), 1);
    }

    #[test]
    fn test_fasta_indexed_under_fasta_only() {
        let input = tempdir().unwrap();
        let work = tempdir().unwrap();
        let path = input.path().join("contigs.fasta");
        std::fs::write(&path, ">c1\nACGTACGT\n").unwrap();

        let mut registry = ReadRegistry::new(work.path());
        let id = registry
            .register(path.to_str().unwrap(), RegisterOptions::platform(Platform::PacBio))
            .unwrap();
        assert_eq!(registry.platform_ids(Platform::Fasta), &[id.clone()]);
        assert!(registry.platform_ids(Platform::PacBio).is_empty());
        assert_eq!(registry.get(&id).unwrap().platform, Platform::Fasta);
    }

    #[test]
    fn test_name_collision_rolls_back() {
        let a = tempdir().unwrap();
        let b = tempdir().unwrap();
        let work = tempdir().unwrap();
        std::fs::write(a.path().join("r.fq"), fastq(&["@r1"], 50)).unwrap();
        std::fs::write(b.path().join("r.fq"), fastq(&["@r1"], 50)).unwrap();
        std::fs::write(b.path().join("s.fq"), fastq(&["@r1"], 50)).unwrap();

        let mut registry = ReadRegistry::new(work.path());
        registry
            .register(a.path().join("r.fq").to_str().unwrap(), RegisterOptions::default())
            .unwrap();

        let spec = format!(
            "{}:{}",
            b.path().join("s.fq").display(),
            b.path().join("r.fq").display()
        );
        let err = registry.register(&spec, RegisterOptions::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::NameCollision { .. }));
        assert!(!work.path().join("s.fq").exists());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_bz2_input_decompressed() {
        use std::io::Write;
        let input = tempdir().unwrap();
        let work = tempdir().unwrap();
        let path = input.path().join("reads.fastq.bz2");
        let mut enc = bzip2::write::BzEncoder::new(
            std::fs::File::create(&path).unwrap(),
            bzip2::Compression::default(),
        );
        enc.write_all(fastq(&["@r1", "@r2"], 100).as_bytes()).unwrap();
        enc.finish().unwrap();

        let mut registry = ReadRegistry::new(work.path());
        let id = registry
            .register(path.to_str().unwrap(), RegisterOptions::platform(Platform::Illumina))
            .unwrap();
        assert_eq!(id, "reads.fastq");
        assert!(work.path().join("reads.fastq").exists());
        assert_eq!(registry.transformations().len(), 1);
        assert_eq!(registry.get(&id).unwrap().stats.as_ref().unwrap().num_reads, 2);
    }
}
