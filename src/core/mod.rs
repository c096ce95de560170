pub mod platform;
pub mod read_set;
pub mod string_diff;

// Re-export key types for read intake and assembly
pub use platform::{infer_platform, read_id};
pub use read_set::{
    Layout, LengthClass, PairDelimiter, Platform, ReadSet, ReadStats, DEFAULT_BYTES_TO_SAMPLE,
    MAX_SHORT_READ_LENGTH,
};
pub use string_diff::{find_single_difference, is_one_two_swap, read_ids_are_mates};
