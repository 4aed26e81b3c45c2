//! Watches a classifieds search page and reports offers that were not seen on earlier runs.
//!
//! A run fetches the page ([`request`]), extracts offers ([`parse`]), fingerprints them
//! ([`offer`]), reconciles the fingerprints with the bounded ledger of the search
//! partition ([`ledger`]) and hands the new offers to [`notify`] and [`analytics`].
//! [`process::Ingestor`] ties the steps together.

mod error;
mod macros;

pub mod analytics;
pub mod config;
pub mod ledger;
pub mod notify;
pub mod offer;
pub mod parse;
pub mod process;
pub mod request;
pub mod text;

pub use error::{Error, Result};

/// Listing fragments read from one page at most.
pub const MAX_FRAGMENTS_PER_PAGE: usize = 100;
/// Fingerprints kept per partition. A 400 KiB item holds about 12k entries of 33 bytes.
pub const DEFAULT_LEDGER_CAPACITY: usize = 12_000;
/// Characters of a failed response body kept for diagnosis.
const FETCH_EXCERPT_CHARS: usize = 200;
