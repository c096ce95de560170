//! Single contiguous difference between equal-length strings
//!
//! Paired files and mate reads are usually named identically except for a
//! `1`/`2` marker. Both read-ID and file-name pairing reduce to asking where
//! two strings differ.

use std::ops::Range;

/// Half-open range of the single contiguous run in which `a` and `b` differ.
///
/// Returns `None` when lengths differ, when the strings are identical, or when
/// the differences form more than one run. Comparison is byte-wise.
pub fn find_single_difference(a: &str, b: &str) -> Option<Range<usize>> {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return None;
    }

    let mut start = None;
    let mut end = None;
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        if x != y {
            if end.is_some() {
                return None;
            }
            start.get_or_insert(i);
        } else if start.is_some() && end.is_none() {
            end = Some(i);
        }
    }

    let start = start?;
    Some(start..end.unwrap_or(a.len()))
}

/// True when the strings differ in exactly one character, `1` in one and `2`
/// in the other.
pub fn is_one_two_swap(a: &str, b: &str) -> bool {
    match find_single_difference(a, b) {
        Some(range) if range.len() == 1 => {
            let pair = (a.as_bytes()[range.start], b.as_bytes()[range.start]);
            matches!(pair, (b'1', b'2') | (b'2', b'1'))
        }
        _ => false,
    }
}

/// Mate read identifiers are identical or differ only by the `1`/`2` marker
pub fn read_ids_are_mates(a: &str, b: &str) -> bool {
    a == b || is_one_two_swap(a, b)
}
