//! Read intake: registration, anonymous-file pairing, accession intake and
//! pre-assembly trimming

pub mod accession;
pub mod pair_finder;
pub mod registry;
pub mod trimming;

pub use accession::{group_by_accession, sra_accession, AccessionFiles, LibraryLayout};
pub use pair_finder::{PairFinder, PairingOutcome};
pub use registry::{ReadRegistry, RegisterOptions, RegistrationError};
pub use trimming::trim_short_reads;
