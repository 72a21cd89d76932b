#![forbid(unsafe_code)]
//! # ampliscan
//!
//! In-silico PCR: scan an annotated sequence collection with a primer pair
//! and report every amplifiable region, together with the taxonomic lineage
//! of each source sequence.
//!
//! Primers are written in the IUPAC nucleotide alphabet and matched
//! approximately (per-primer error budget) on both strands; circular
//! molecules are handled with origin-spanning sites included. Results come
//! out as a pipe-delimited table that [`grep`] can re-filter later, and the
//! taxonomy behind it all is queryable on its own (name search, subtree
//! listing, ancestry tests).
//!
//! ```rust
//! use ampliscan::pattern::Pattern;
//!
//! // One primer, two tolerated mismatches, ambiguity codes allowed.
//! let mut primer = Pattern::compile("GGGCAATCCTGAGCCAA", 2)?;
//! let hits = primer.search(b"TTGGGCAATCCTGAGCCAATT", 0, 21);
//! assert_eq!(hits[0].position, 2);
//! # Ok::<(), ampliscan::error::Error>(())
//! ```
//!
//! A full run goes through [`pipeline::run`], which wires the database
//! loader, the detector and the renderer together; the `ampliscan` binary is
//! a thin CLI over it.

pub mod amplicon;
pub mod error;
pub mod grep;
pub mod pattern;
pub mod pipeline;
pub mod render;
pub mod seqio;
pub mod taxdump;
pub mod taxonomy;
pub mod thermo;

/// Crate version, echoed in result-table preambles.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
