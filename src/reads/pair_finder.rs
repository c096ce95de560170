//! Pairing of anonymous read files
//!
//! Files handed over without a platform or pairing are sampled, grouped into
//! R1/R2 pairs by file name, and each proposed pair is confirmed against the
//! platform and read identifiers found in both files. Anything that does not
//! survive confirmation falls back to single-file registration.

use anyhow::Result;
use indexmap::{IndexMap, IndexSet};
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::core::{find_single_difference, read_ids_are_mates, PairDelimiter, Platform};
use crate::qc::sampler::{ReadSample, ReadSampler};

/// Result of a pairing pass, ready for registration
#[derive(Debug, Default, Serialize)]
pub struct PairingOutcome {
    /// Confirmed pair specs (`a:b` or `a%b`)
    pub pairs: Vec<String>,
    /// Files to register on their own
    pub singles: Vec<String>,
    /// Inferred platform for every pair spec and single
    pub platforms: IndexMap<String, Platform>,
    pub problems: Vec<String>,
    pub transformations: Vec<String>,
}

impl PairingOutcome {
    pub fn platform_of(&self, item: &str) -> Platform {
        self.platforms.get(item).copied().unwrap_or(Platform::Unknown)
    }
}

/// Proposes and validates paired-end groupings among anonymous files
pub struct PairFinder {
    sampler: ReadSampler,
    thread_pool: rayon::ThreadPool,
}

impl PairFinder {
    pub fn new(sampler: ReadSampler, num_threads: usize) -> Result<Self> {
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("pair-sampler-{i}"))
            .build()?;
        Ok(Self {
            sampler,
            thread_pool,
        })
    }

    /// Order `a` and `b` as (R1, R2) when their names differ only in a
    /// single `1`/`2` character that is not part of a longer number.
    /// The differing character must have something before it.
    pub fn candidate_filename_pair<'a>(a: &'a str, b: &'a str) -> Option<(&'a str, &'a str)> {
        let diff = find_single_difference(a, b)?;
        if diff.len() != 1 || diff.start == 0 {
            return None;
        }
        if a.as_bytes()[diff.start - 1].is_ascii_digit() {
            return None;
        }
        match (a.as_bytes()[diff.start], b.as_bytes()[diff.start]) {
            (b'1', b'2') => Some((a, b)),
            (b'2', b'1') => Some((b, a)),
            _ => None,
        }
    }

    /// Pair up `items`. Items already carrying a pairing delimiter are
    /// validated the same way as name-based candidates.
    pub fn find_pairs(&self, items: &[String]) -> PairingOutcome {
        let mut outcome = PairingOutcome::default();

        let mut explicit = Vec::new();
        let mut singles: Vec<String> = Vec::new();
        for item in items {
            match PairDelimiter::detect(item) {
                Some(d) => match item.split_once(d.as_char()) {
                    Some((a, b)) if !a.is_empty() && !b.is_empty() => {
                        explicit.push((a.to_string(), b.to_string(), d))
                    }
                    _ => outcome
                        .problems
                        .push(format!("failed to split file pair {item}")),
                },
                None => singles.push(item.clone()),
            }
        }

        let to_sample: IndexSet<String> = singles
            .iter()
            .cloned()
            .chain(explicit.iter().flat_map(|(a, b, _)| [a.clone(), b.clone()]))
            .collect();
        let samples = self.sample_all(&to_sample, &mut outcome);

        let platform = |file: &str| -> Platform {
            samples
                .get(file)
                .map(|s| s.platform())
                .unwrap_or(Platform::Unknown)
        };

        let mut candidates = explicit;
        for (i, first) in singles.iter().enumerate() {
            for second in &singles[i + 1..] {
                let Some((r1, r2)) = Self::candidate_filename_pair(first, second) else {
                    continue;
                };
                outcome
                    .transformations
                    .push(format!("candidate paired files: {r1}  {r2}"));
                if platform(r1) != platform(r2) {
                    outcome.problems.push(format!(
                        "Discordant fileTypes for {}({}) vs {}({})",
                        r1,
                        platform(r1),
                        r2,
                        platform(r2)
                    ));
                    continue;
                }
                candidates.push((r1.to_string(), r2.to_string(), PairDelimiter::PairedEnd));
            }
        }

        let mut paired_members: IndexSet<String> = IndexSet::new();
        let mut demoted: Vec<String> = Vec::new();
        for (r1, r2, delimiter) in candidates {
            if paired_members.contains(&r1) || paired_members.contains(&r2) {
                outcome.problems.push(format!(
                    "{r1} or {r2} already belongs to a confirmed pair, candidate ignored"
                ));
                continue;
            }

            let mut confirmed = true;
            if platform(&r1) != platform(&r2) {
                outcome.problems.push(format!(
                    "Discordant fileTypes for {}({}) vs {}({})",
                    r1,
                    platform(&r1),
                    r2,
                    platform(&r2)
                ));
                confirmed = false;
            }
            if confirmed {
                if let Some(problem) = Self::check_sampled_ids(&r1, &r2, &samples) {
                    outcome.problems.push(problem);
                    confirmed = false;
                }
            }

            if confirmed {
                let spec = format!("{}{}{}", r1, delimiter.as_char(), r2);
                info!("🔗 Paired {}", spec);
                outcome.platforms.insert(spec.clone(), platform(&r1));
                outcome.pairs.push(spec);
                paired_members.insert(r1);
                paired_members.insert(r2);
            } else {
                demoted.push(r1);
                demoted.push(r2);
            }
        }

        let leftover: IndexSet<String> = singles
            .into_iter()
            .chain(demoted)
            .filter(|f| !paired_members.contains(f))
            .collect();
        for file in leftover {
            outcome.platforms.insert(file.clone(), platform(&file));
            outcome.singles.push(file);
        }

        debug!(
            "Pairing found {} pairs and {} singles",
            outcome.pairs.len(),
            outcome.singles.len()
        );
        outcome
    }

    fn sample_all(
        &self,
        files: &IndexSet<String>,
        outcome: &mut PairingOutcome,
    ) -> IndexMap<String, ReadSample> {
        let sampler = self.sampler;
        let files: Vec<&String> = files.iter().collect();
        let results: Vec<(String, Result<ReadSample>)> = self.thread_pool.install(|| {
            files
                .par_iter()
                .map(|f| (f.to_string(), sampler.sample(Path::new(f.as_str()))))
                .collect()
        });

        let mut samples = IndexMap::new();
        for (file, result) in results {
            match result {
                Ok(sample) => {
                    outcome.transformations.push(format!(
                        "interpreting {} type as {}",
                        file,
                        sample.platform()
                    ));
                    outcome.problems.extend(sample.problems.iter().cloned());
                    samples.insert(file, sample);
                }
                Err(e) => {
                    warn!("Could not sample {}: {:#}", file, e);
                    outcome.problems.push(format!("could not sample {file}: {e:#}"));
                }
            }
        }
        samples
    }

    /// Problem text for the first sampled id pair that are not mates
    fn check_sampled_ids(
        r1: &str,
        r2: &str,
        samples: &IndexMap<String, ReadSample>,
    ) -> Option<String> {
        let (Some(s1), Some(s2)) = (samples.get(r1), samples.get(r2)) else {
            return Some(format!("no read sample for {r1} or {r2}"));
        };
        s1.read_ids
            .iter()
            .zip(s2.read_ids.iter())
            .find(|(a, b)| !read_ids_are_mates(a, b))
            .map(|(a, b)| format!("Read IDs do not match for {r1}({a}) vs {r2}({b})"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_ordering() {
        assert_eq!(
            PairFinder::candidate_filename_pair("s_R2.fq", "s_R1.fq"),
            Some(("s_R1.fq", "s_R2.fq"))
        );
        assert_eq!(
            PairFinder::candidate_filename_pair("x1.fq", "x2.fq"),
            Some(("x1.fq", "x2.fq"))
        );
    }

    #[test]
    fn test_difference_at_start_is_not_a_pair() {
        assert_eq!(PairFinder::candidate_filename_pair("1.fq", "2.fq"), None);
        assert_eq!(PairFinder::candidate_filename_pair("2_reads.fq", "1_reads.fq"), None);
    }

    #[test]
    fn test_candidate_rejections() {
        assert_eq!(PairFinder::candidate_filename_pair("s_11.fq", "s_12.fq"), None);
        assert_eq!(PairFinder::candidate_filename_pair("s_1.fq", "s_3.fq"), None);
        assert_eq!(PairFinder::candidate_filename_pair("a_1.fq", "b_2.fq"), None);
        assert_eq!(PairFinder::candidate_filename_pair("s_1.fq", "s_1.fq"), None);
    }
}
