//! Compiled primer patterns and bounded-mismatch search.
//!
//! The matcher backend is the Myers bit-parallel algorithm from the `bio`
//! crate (64-bit block, hence the 32-symbol cap leaves ample headroom).
//! Primers may use the full IUPAC nucleotide alphabet; ambiguity codes are
//! compiled into the automaton so `R` in a primer matches `A` or `G` in the
//! sequence at no error cost.
//!
//! `search` reports one [`Hit`] per distinct match start (best error count),
//! in ascending position order. Callers hand in the circular-extended text
//! when origin-spanning matches must be found.

use bio::pattern_matching::myers::{Myers, MyersBuilder};

use crate::error::{Error, Result, MAX_PATTERN_LEN};

/// IUPAC nucleotide codes and the bases each one stands for.
const IUPAC: &[(u8, &[u8])] = &[
    (b'A', b"A"),
    (b'C', b"C"),
    (b'G', b"G"),
    (b'T', b"T"),
    (b'R', b"AG"),
    (b'Y', b"CT"),
    (b'S', b"CG"),
    (b'W', b"AT"),
    (b'K', b"GT"),
    (b'M', b"AC"),
    (b'B', b"CGT"),
    (b'D', b"AGT"),
    (b'H', b"ACT"),
    (b'V', b"ACG"),
    (b'N', b"ACGT"),
];

/// Watson-Crick complement of an IUPAC code; non-nucleotide bytes pass
/// through unchanged.
pub(crate) fn complement(base: u8) -> u8 {
    match base.to_ascii_uppercase() {
        b'A' => b'T',
        b'T' | b'U' => b'A',
        b'C' => b'G',
        b'G' => b'C',
        b'R' => b'Y',
        b'Y' => b'R',
        b'S' => b'S',
        b'W' => b'W',
        b'K' => b'M',
        b'M' => b'K',
        b'B' => b'V',
        b'V' => b'B',
        b'D' => b'H',
        b'H' => b'D',
        b'N' => b'N',
        other => other,
    }
}

/// Reverse-complement of a nucleotide string.
pub(crate) fn reverse_complement(seq: &[u8]) -> Vec<u8> {
    seq.iter().rev().map(|&b| complement(b)).collect()
}

/// True iff `base` is one of the bases the IUPAC `code` stands for.
pub(crate) fn iupac_matches(code: u8, base: u8) -> bool {
    let code = code.to_ascii_uppercase();
    let base = base.to_ascii_uppercase();
    IUPAC
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, set)| set.contains(&base))
        .unwrap_or(false)
}

/// An approximate occurrence of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    /// Start offset of the match within the searched text.
    pub position: usize,
    /// Edit count of the best alignment starting here (`<= max_errors`).
    pub errors: u8,
}

/// A compiled primer pattern: canonical text plus the Myers automaton.
#[derive(Clone)]
pub struct Pattern {
    text: String,
    max_errors: u8,
    myers: Myers<u64>,
}

impl std::fmt::Debug for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pattern")
            .field("text", &self.text)
            .field("max_errors", &self.max_errors)
            .finish()
    }
}

impl Pattern {
    /// Compile `text` with an error budget. Uppercases, maps `U` to `T`, and
    /// rejects anything outside the IUPAC alphabet or longer than
    /// [`MAX_PATTERN_LEN`].
    pub fn compile(text: &str, max_errors: u8) -> Result<Pattern> {
        if text.len() > MAX_PATTERN_LEN {
            return Err(Error::PatternTooLong {
                pattern: text.to_string(),
                len: text.len(),
            });
        }
        if text.is_empty() {
            return Err(Error::PatternCompile {
                pattern: text.to_string(),
                reason: "empty pattern".into(),
            });
        }
        let mut normalized = String::with_capacity(text.len());
        for c in text.chars() {
            let c = c.to_ascii_uppercase();
            let c = if c == 'U' { 'T' } else { c };
            if !IUPAC.iter().any(|(code, _)| *code as char == c) {
                return Err(Error::PatternCompile {
                    pattern: text.to_string(),
                    reason: format!("invalid symbol '{c}'"),
                });
            }
            normalized.push(c);
        }

        let mut builder = MyersBuilder::new();
        for (code, bases) in IUPAC {
            if bases.len() > 1 {
                builder.ambig(*code, *bases);
            }
        }
        let myers = builder.build_64(normalized.bytes());
        Ok(Pattern {
            text: normalized,
            max_errors,
            myers,
        })
    }

    /// The independently compiled reverse-complement of this pattern, used to
    /// search the opposite strand. Inherits the error budget.
    pub fn reverse_complement(&self) -> Pattern {
        let rc = reverse_complement(self.text.as_bytes());
        let rc = String::from_utf8(rc).expect("complement of valid IUPAC is valid IUPAC");
        // Compile cannot fail: the complement alphabet is closed under IUPAC
        // and the length is unchanged.
        Pattern::compile(&rc, self.max_errors).expect("reverse complement compiles")
    }

    /// Canonical (normalized) pattern text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn max_errors(&self) -> u8 {
        self.max_errors
    }

    /// Search `text` within `[window_start, window_start + window_len)`,
    /// clamped to the text bounds. Hit positions are absolute offsets into
    /// `text`, ascending; one hit per distinct match start.
    pub fn search(&mut self, text: &[u8], window_start: usize, window_len: usize) -> Vec<Hit> {
        let start = window_start.min(text.len());
        let end = start.saturating_add(window_len).min(text.len());
        if end - start < self.len().saturating_sub(self.max_errors as usize) {
            return Vec::new();
        }
        let window = &text[start..end];

        let mut best: std::collections::BTreeMap<usize, u8> = Default::default();
        for (s, _e, dist) in self.myers.find_all(window, self.max_errors) {
            best.entry(start + s)
                .and_modify(|d| *d = (*d).min(dist))
                .or_insert(dist);
        }
        best.into_iter()
            .map(|(position, errors)| Hit { position, errors })
            .collect()
    }
}
