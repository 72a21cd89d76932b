//! Pairing of primer hits into candidate amplification products.
//!
//! One detector pass scans a single orientation: the initiating primer is
//! searched over the whole sequence, then the reverse-complement of the other
//! primer is searched inside the window that can still yield a product
//! (bounded by the maximum amplicon length when one is configured). The two
//! passes — primer 1 initiating (direct strand) and primer 2 initiating
//! (reverse strand) — are symmetric role swaps.
//!
//! Circular sequences are searched over the text extended by the longer
//! primer's length so that sites spanning the origin are found; hit pairs are
//! then mapped back into non-redundant coordinates with wrap-around length
//! arithmetic.

use crate::pattern::{Hit, Pattern};
use crate::seqio::{SeqRecord, Topology};

/// Which primer initiated the pass that produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strand {
    /// Primer 1 matched the direct strand.
    Direct,
    /// Primer 2 matched the direct strand (product reported reverse-complemented).
    Reverse,
}

impl Strand {
    /// One-letter marker used in the result table.
    pub fn marker(&self) -> char {
        match self {
            Strand::Direct => 'D',
            Strand::Reverse => 'R',
        }
    }
}

/// A validated candidate product, in sequence coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Candidate {
    pub strand: Strand,
    /// Start of the initiating primer's hit.
    pub start: usize,
    /// End (exclusive) of the downstream hit. On circular sequences the
    /// product wraps the origin when `end < start` (the downstream site lies
    /// before the initiating one) or when `end` reaches into the duplicated
    /// wrap segment (`end > sequence length`).
    pub end: usize,
    /// Errors of the initiating hit.
    pub err1: u8,
    /// Errors of the downstream hit.
    pub err2: u8,
    /// Product length between the primers, as used for min/max filtering.
    pub length: usize,
}

/// Length bounds for candidate filtering; 0 disables a bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct LengthBounds {
    pub min: usize,
    pub max: usize,
}

impl LengthBounds {
    fn accepts(&self, length: usize) -> bool {
        (self.min == 0 || length >= self.min) && (self.max == 0 || length <= self.max)
    }
}

/// The compiled primer set for one run: both primers and both complements.
#[derive(Debug, Clone)]
pub struct PrimerSet {
    pub p1: Pattern,
    pub p2: Pattern,
    pub p1c: Pattern,
    pub p2c: Pattern,
}

impl PrimerSet {
    pub fn new(p1: Pattern, p2: Pattern) -> PrimerSet {
        let p1c = p1.reverse_complement();
        let p2c = p2.reverse_complement();
        PrimerSet { p1, p2, p1c, p2c }
    }

    /// Circular extension length: the longer primer must be able to span the
    /// origin.
    pub fn wrap_extent(&self) -> usize {
        self.p1.len().max(self.p2.len())
    }
}

/// Run both orientation passes over one record. Candidates are returned in
/// discovery order (direct pass first; within a pass ascending initiating
/// hit position, then ascending downstream hit position). No deduplication:
/// overlapping products from different hit pairs are all reported.
pub fn find_amplicons(
    record: &SeqRecord,
    primers: &mut PrimerSet,
    bounds: LengthBounds,
) -> Vec<Candidate> {
    let seqlen = record.len();
    let circular = record.topology == Topology::Circular;
    let ext = if circular { primers.wrap_extent() } else { 0 };

    // Physical text handed to the matcher; for circular molecules the first
    // `ext` residues are repeated past the end.
    let text: std::borrow::Cow<[u8]> = if ext > 0 {
        let mut t = Vec::with_capacity(seqlen + ext);
        t.extend_from_slice(&record.residues);
        t.extend_from_slice(&record.residues[..ext.min(seqlen)]);
        std::borrow::Cow::Owned(t)
    } else {
        std::borrow::Cow::Borrowed(&record.residues[..])
    };

    let mut out = Vec::new();
    scan_orientation(
        &text,
        seqlen,
        ext,
        &mut primers.p1,
        &mut primers.p2c,
        primers.p2.len(),
        Strand::Direct,
        circular,
        bounds,
        &mut out,
    );
    scan_orientation(
        &text,
        seqlen,
        ext,
        &mut primers.p2,
        &mut primers.p1c,
        primers.p1.len(),
        Strand::Reverse,
        circular,
        bounds,
        &mut out,
    );
    out
}

/// One orientation pass: `initiating` primer, then `downstream` (the
/// reverse-complement of the other primer, whose uncomplemented length is
/// `other_len`) restricted to the reachable window.
#[allow(clippy::too_many_arguments)]
fn scan_orientation(
    text: &[u8],
    seqlen: usize,
    ext: usize,
    initiating: &mut Pattern,
    downstream: &mut Pattern,
    other_len: usize,
    strand: Strand,
    circular: bool,
    bounds: LengthBounds,
    out: &mut Vec<Candidate>,
) {
    let init_len = initiating.len();
    let span = match strand {
        Strand::Direct => seqlen + ext,
        // The original scans the reverse pass over the unextended length.
        Strand::Reverse => seqlen,
    };
    let init_hits = initiating.search(text, 0, span);
    if init_hits.is_empty() {
        return;
    }

    // Bounding window for the downstream search: from just past the first
    // initiating hit, out to where a maximum-length product could still end.
    let (begin, length) = if circular {
        (0, seqlen + ext)
    } else {
        let begin = init_hits[0].position + init_len;
        let last = init_hits[init_hits.len() - 1].position;
        let length = if bounds.max > 0 {
            (last + init_len).saturating_sub(begin) + bounds.max + other_len
        } else {
            seqlen.saturating_sub(begin)
        };
        (begin, length)
    };
    let down_hits = downstream.search(text, begin, length);
    if down_hits.is_empty() {
        return;
    }

    // The duplicated wrap segment only exists so matches can span the
    // origin; hits whose start lies inside it are images of hits already
    // seen in non-redundant coordinates.
    for h1 in init_hits.iter().filter(|h| h.position < seqlen) {
        for h2 in down_hits.iter().filter(|h| h.position < seqlen) {
            if let Some(c) = pair(h1, h2, init_len, downstream.len(), other_len, strand, seqlen, circular, bounds) {
                out.push(c);
            }
        }
    }
}

/// Length arithmetic for one (initiating, downstream) hit pair.
#[allow(clippy::too_many_arguments)]
fn pair(
    h1: &Hit,
    h2: &Hit,
    init_len: usize,
    down_len: usize,
    other_len: usize,
    strand: Strand,
    seqlen: usize,
    circular: bool,
    bounds: LengthBounds,
) -> Option<Candidate> {
    let start = h1.position;
    let end = h2.position + down_len;
    let primer_span = init_len + other_len;

    let length: i64 = if end > start {
        // The reverse pass keeps its historical one-base offset relative to
        // the direct formula; do not unify the two.
        let off = match strand {
            Strand::Direct => 0,
            Strand::Reverse => 1,
        };
        end as i64 + off - start as i64 - primer_span as i64
    } else if end < start {
        if !circular {
            // Wrap-around products only exist on circular molecules.
            return None;
        }
        end as i64 + seqlen as i64 - start as i64 - primer_span as i64
    } else {
        0
    };

    // length <= 0 covers primers that touch or overlap.
    if length <= 0 {
        return None;
    }
    let length = length as usize;
    if !bounds.accepts(length) {
        return None;
    }

    Some(Candidate {
        strand,
        start,
        end,
        err1: h1.errors,
        err2: h2.errors,
        length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::{reverse_complement, Pattern};

    fn record(residues: Vec<u8>, topology: Topology) -> SeqRecord {
        SeqRecord {
            accession: "TEST".into(),
            taxid: 1,
            residues,
            description: String::new(),
            topology,
        }
    }

    /// Random-free background with no accidental primer sites.
    fn filler(n: usize) -> Vec<u8> {
        b"TC".iter().copied().cycle().take(n).collect()
    }

    fn primers(p1: &str, p2: &str, errors: u8) -> PrimerSet {
        PrimerSet::new(
            Pattern::compile(p1, errors).unwrap(),
            Pattern::compile(p2, errors).unwrap(),
        )
    }

    /// Plant primer1 at `at1` and the binding site of primer2 (i.e. the
    /// reverse-complement of primer2) at `at2` in a filler sequence.
    fn plant(len: usize, p1: &str, at1: usize, p2: &str, at2: usize) -> Vec<u8> {
        let mut seq = filler(len);
        seq[at1..at1 + p1.len()].copy_from_slice(p1.as_bytes());
        let site = reverse_complement(p2.as_bytes());
        seq[at2..at2 + site.len()].copy_from_slice(&site);
        seq
    }

    const P1: &str = "AAGGA"; // len 5
    const P2: &str = "GGAAGA"; // len 6; binding site revcomp = TCTTCC

    #[test]
    fn direct_length_formula() {
        // Forward hit at 10 (len 5), reverse-complement hit at 40 (len 6):
        // length = (40+6) - 10 - 5 - 6 = 25.
        let seq = plant(80, P1, 10, P2, 40);
        let rec = record(seq, Topology::Linear);
        let mut ps = primers(P1, P2, 0);
        let cands = find_amplicons(&rec, &mut ps, LengthBounds::default());
        let direct: Vec<_> = cands.iter().filter(|c| c.strand == Strand::Direct).collect();
        assert_eq!(direct.len(), 1);
        let c = direct[0];
        assert_eq!(c.start, 10);
        assert_eq!(c.end, 46);
        assert_eq!(c.length, 25);
        assert_eq!((c.err1, c.err2), (0, 0));
    }

    #[test]
    fn reverse_pass_keeps_plus_one_offset() {
        // Initiating primer2 at 10, downstream revcomp(primer1) at 40.
        let mut seq = filler(80);
        seq[10..16].copy_from_slice(P2.as_bytes());
        let site = reverse_complement(P1.as_bytes());
        seq[40..45].copy_from_slice(&site);
        let rec = record(seq, Topology::Linear);
        let mut ps = primers(P1, P2, 0);
        let cands = find_amplicons(&rec, &mut ps, LengthBounds::default());
        let reverse: Vec<_> = cands.iter().filter(|c| c.strand == Strand::Reverse).collect();
        assert_eq!(reverse.len(), 1);
        // (40+5) + 1 - 10 - 6 - 5 = 25
        assert_eq!(reverse[0].length, 25);
    }

    #[test]
    fn circular_wrap_yields_positive_length() {
        // length 100, forward hit at 90, reverse-complement site wrapping to 5:
        // length = (5+6) + 100 - 90 - 5 - 6 = 10.
        let mut seq = filler(100);
        seq[90..95].copy_from_slice(P1.as_bytes());
        let site = reverse_complement(P2.as_bytes());
        seq[5..11].copy_from_slice(&site);
        let rec = record(seq, Topology::Circular);
        let mut ps = primers(P1, P2, 0);
        let cands = find_amplicons(&rec, &mut ps, LengthBounds::default());
        let direct: Vec<_> = cands.iter().filter(|c| c.strand == Strand::Direct).collect();
        assert_eq!(direct.len(), 1);
        let c = direct[0];
        assert_eq!(c.start, 90);
        assert_eq!(c.end, 11);
        assert_eq!(c.length, 10);
    }

    #[test]
    fn linear_rejects_reverse_site_before_forward_site() {
        // Same geometry as the wrap test, but linear topology: no product.
        let mut seq = filler(100);
        seq[90..95].copy_from_slice(P1.as_bytes());
        let site = reverse_complement(P2.as_bytes());
        seq[5..11].copy_from_slice(&site);
        let rec = record(seq, Topology::Linear);
        let mut ps = primers(P1, P2, 0);
        let cands = find_amplicons(&rec, &mut ps, LengthBounds::default());
        assert!(cands.iter().all(|c| c.strand != Strand::Direct));
    }

    #[test]
    fn length_bounds_are_inclusive() {
        let bounds = LengthBounds { min: 50, max: 200 };
        for (inner, expect) in [(49usize, false), (50, true), (200, true), (201, false)] {
            // Place the reverse site so the inner length is exactly `inner`.
            let at2 = 10 + P1.len() + inner;
            let seq = plant(at2 + P2.len() + 10, P1, 10, P2, at2);
            let rec = record(seq, Topology::Linear);
            let mut ps = primers(P1, P2, 0);
            let n = find_amplicons(&rec, &mut ps, bounds)
                .iter()
                .filter(|c| c.strand == Strand::Direct)
                .count();
            assert_eq!(n > 0, expect, "inner length {inner}");
        }
    }

    #[test]
    fn no_initiating_hit_yields_nothing() {
        let rec = record(filler(200), Topology::Linear);
        let mut ps = primers(P1, P2, 0);
        assert!(find_amplicons(&rec, &mut ps, LengthBounds::default()).is_empty());
    }

    #[test]
    fn multiple_pairs_in_discovery_order() {
        // Two forward sites, two reverse sites downstream of both.
        let mut seq = filler(300);
        seq[10..15].copy_from_slice(P1.as_bytes());
        seq[30..35].copy_from_slice(P1.as_bytes());
        let site = reverse_complement(P2.as_bytes());
        seq[100..106].copy_from_slice(&site);
        seq[150..156].copy_from_slice(&site);
        let rec = record(seq, Topology::Linear);
        let mut ps = primers(P1, P2, 0);
        let cands: Vec<_> = find_amplicons(&rec, &mut ps, LengthBounds::default())
            .into_iter()
            .filter(|c| c.strand == Strand::Direct)
            .collect();
        let keys: Vec<(usize, usize)> = cands.iter().map(|c| (c.start, c.end)).collect();
        assert_eq!(keys, vec![(10, 106), (10, 156), (30, 106), (30, 156)]);
    }

    #[test]
    fn max_bound_limits_downstream_window() {
        // The second reverse site lies beyond the reachable window when
        // max = 50, so only the near pair is reported.
        let mut seq = filler(400);
        seq[10..15].copy_from_slice(P1.as_bytes());
        let site = reverse_complement(P2.as_bytes());
        seq[40..46].copy_from_slice(&site);
        seq[300..306].copy_from_slice(&site);
        let rec = record(seq, Topology::Linear);
        let mut ps = primers(P1, P2, 0);
        let cands: Vec<_> = find_amplicons(&rec, &mut ps, LengthBounds { min: 0, max: 50 })
            .into_iter()
            .filter(|c| c.strand == Strand::Direct)
            .collect();
        assert_eq!(cands.len(), 1);
        assert_eq!(cands[0].end, 46);
    }
}
