//! Platform inference from read headers
//!
//! Pure classification over a sample header line and the longest observed
//! read length. Misclassification is expected now and then; callers record a
//! problem when the result disagrees with what they were told.

use regex::Regex;
use std::sync::OnceLock;

use super::read_set::{Platform, MAX_SHORT_READ_LENGTH};

/// Ordered (pattern, platform) rules; first match wins.
struct HeaderRules {
    short: Vec<(Regex, Platform)>,
    long: Vec<(Regex, Platform)>,
}

fn rules() -> &'static HeaderRules {
    static RULES: OnceLock<HeaderRules> = OnceLock::new();
    RULES.get_or_init(|| HeaderRules {
        short: compile(&[
            // @D00553R:173:HG53VBCXY:2:1101:1235:2074 1:N:0:ACAGTGAT
            (r"^@[A-Z]\S+:\d+:\S+:\d+:\d+:\d+:\d+ \S+:\S+:\S+:\S+$", Platform::Illumina),
            (r"^@\S+:\S+:\S+:\S+:\S+#\S+/\S+$", Platform::Illumina),
            (r"^@[^:]+:[^:]+:[^:]+$", Platform::IonTorrent),
            (r"^@[SED]RR\d+\.\d+", Platform::Illumina),
        ]),
        long: compile(&[
            // @<movie>/<zmw>/<start>_<end>
            (r"^@\S+/\S+/\S+_\S+$", Platform::PacBio),
            // @<movie>/<zmw>
            (r"^@\S+/\S+$", Platform::PacBio),
            (r"^@[a-z0-9-]+\s+runid=\S+\s+read=\d+\s+ch=", Platform::Nanopore),
        ]),
    })
}

fn compile(rules: &[(&str, Platform)]) -> Vec<(Regex, Platform)> {
    rules
        .iter()
        .filter_map(|(pattern, platform)| Regex::new(pattern).ok().map(|re| (re, *platform)))
        .collect()
}

fn first_match(rules: &[(Regex, Platform)], header: &str) -> Option<Platform> {
    rules
        .iter()
        .find(|(re, _)| re.is_match(header))
        .map(|(_, platform)| *platform)
}

/// Classify a sample header line.
///
/// `header` is the full first line of a record, including the `@`/`>` marker
/// and any description after the identifier.
pub fn infer_platform(header: &str, max_read_length: usize) -> Platform {
    if header.starts_with('>') {
        return Platform::Fasta;
    }

    if max_read_length < MAX_SHORT_READ_LENGTH {
        match header.split(':').count() {
            3 => return Platform::IonTorrent,
            n if n > 4 => return Platform::Illumina,
            _ => {}
        }
        if let Some(platform) = first_match(&rules().short, header) {
            return platform;
        }
    }

    first_match(&rules().long, header).unwrap_or(Platform::PacBio)
}

/// First whitespace-delimited token of a header line
pub fn read_id(header: &str) -> &str {
    header.split_whitespace().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fasta_marker_wins() {
        assert_eq!(infer_platform(">read1", 0), Platform::Fasta);
        assert_eq!(infer_platform(">read1", 100_000), Platform::Fasta);
    }

    #[test]
    fn test_new_illumina_header() {
        let header = "@D00553R:173:HG53VBCXY:2:1101:1235:2074 1:N:0:ACAGTGAT";
        assert_eq!(infer_platform(header, 150), Platform::Illumina);
    }

    #[test]
    fn test_iontorrent_header() {
        assert_eq!(infer_platform("@ZYAB1:00012:00345", 200), Platform::IonTorrent);
    }

    #[test]
    fn test_sra_default_header() {
        assert_eq!(infer_platform("@SRR1234567.1 1 length=151", 151), Platform::Illumina);
    }

    #[test]
    fn test_long_read_headers() {
        assert_eq!(infer_platform("@m54006_160504_020705/4194370/0_9999", 12_000), Platform::PacBio);
        assert_eq!(infer_platform("@m54006_160504_020705/4194370", 12_000), Platform::PacBio);
        let ont = "@d5edc711-3388-4510-ace0-5d39d0d70e19 runid=999acb6b read=10 ch=446 start_time=2017";
        assert_eq!(infer_platform(ont, 30_000), Platform::Nanopore);
    }

    #[test]
    fn test_short_headers_ignored_for_long_reads() {
        let header = "@D00553R:173:HG53VBCXY:2:1101:1235:2074 1:N:0:ACAGTGAT";
        assert_eq!(infer_platform(header, 5_000), Platform::PacBio);
    }

    #[test]
    fn test_unmatched_defaults_to_pacbio() {
        assert_eq!(infer_platform("@mystery", 100), Platform::PacBio);
        assert_eq!(infer_platform("@mystery", 10_000), Platform::PacBio);
    }

    #[test]
    fn test_read_id_token() {
        assert_eq!(read_id("@r1/1 extra words"), "@r1/1");
        assert_eq!(read_id(""), "");
    }
}
