//! Crate-wide error taxonomy.
//!
//! Two fatality classes exist at runtime: pattern and database errors abort
//! before any sequence is processed; [`Error::UnknownTaxid`] aborts only the
//! record that referenced it (callers log and continue with the next record).

use std::path::PathBuf;

/// Maximum primer/pattern length accepted by the matcher backend.
pub const MAX_PATTERN_LEN: usize = 32;

/// All failure modes surfaced by the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A primer or filter pattern exceeds [`MAX_PATTERN_LEN`] symbols.
    #[error("pattern '{pattern}' is {len} symbols long (maximum {MAX_PATTERN_LEN})")]
    PatternTooLong { pattern: String, len: usize },

    /// The pattern contains symbols outside the IUPAC nucleotide alphabet.
    #[error("cannot compile pattern '{pattern}': {reason}")]
    PatternCompile { pattern: String, reason: String },

    /// A sequence record references a taxid absent from the loaded taxonomy.
    #[error("unknown taxid {0}")]
    UnknownTaxid(i32),

    /// The database directory or one of its required files is missing.
    #[error("database unavailable at {}: {reason}", path.display())]
    DatabaseUnavailable { path: PathBuf, reason: String },

    /// A taxonomy dump file exists but cannot be parsed.
    #[error("malformed taxonomy file {} (line {line}): {reason}", path.display())]
    TaxonomyParse {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// The loaded taxonomy is structurally inconsistent: duplicate taxids,
    /// unresolvable parents, or a parent chain that never reaches a root.
    #[error("inconsistent taxonomy: {reason}")]
    TaxonomyStructure { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
