//! Turning validated candidates into reportable amplicon records.
//!
//! The renderer extracts the product with the configured flank context,
//! orientation-corrects reverse-strand products, slices out the two observed
//! primer-binding sites, annotates hybridization Tm, and resolves the
//! taxonomic lineage of the source record. Rendering is a total computation
//! over validated inputs except for the taxid lookup: a record referencing an
//! unknown taxid fails with [`Error::UnknownTaxid`](crate::error::Error) and
//! only that record is abandoned.

use std::fmt;

use crate::amplicon::{Candidate, Strand};
use crate::error::Result;
use crate::pattern::{reverse_complement, Pattern};
use crate::seqio::{SeqRecord, Topology};
use crate::taxonomy::{Taxonomy, ABSENT_NAME, ABSENT_TAXID};
use crate::thermo::TmParams;

/// One resolved lineage rank: `(taxid, name)`, or the explicit absent marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineageEntry {
    pub taxid: i32,
    pub name: String,
}

impl LineageEntry {
    fn absent() -> LineageEntry {
        LineageEntry {
            taxid: ABSENT_TAXID,
            name: ABSENT_NAME.to_string(),
        }
    }

    fn of(taxonomy: &Taxonomy, index: usize) -> LineageEntry {
        let t = taxonomy.taxon(index);
        LineageEntry {
            taxid: t.taxid,
            name: t.name.clone(),
        }
    }

    pub fn is_absent(&self) -> bool {
        self.taxid == ABSENT_TAXID
    }
}

/// One output row: everything the table formatter needs for one amplicon.
#[derive(Debug, Clone)]
pub struct AmpliconRecord {
    pub accession: String,
    pub seq_length: usize,
    pub taxid: i32,
    pub rank: String,
    pub species_taxid: i32,
    /// Species name when the species rank resolved, else the record taxon's
    /// own name.
    pub scientific_name: String,
    pub genus: LineageEntry,
    pub family: LineageEntry,
    /// Kingdom or superkingdom, per the configured lineage mode.
    pub superkingdom: LineageEntry,
    pub strand: Strand,
    pub oligo1: String,
    pub err1: u8,
    pub tm1: f64,
    pub oligo2: String,
    pub err2: u8,
    pub tm2: f64,
    /// Product length between the primer spans.
    pub amplicon_length: usize,
    /// The amplified sequence: inner product only when no context was
    /// requested, otherwise the full window with everything outside the
    /// inner product lower-cased.
    pub amplicon: String,
    pub description: String,
}

impl AmpliconRecord {
    /// The limiting hybridization temperature (informational).
    pub fn limiting_tm(&self) -> f64 {
        self.tm1.min(self.tm2)
    }
}

impl fmt::Display for AmpliconRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<15} | {:>9} | {:>8} | {:<20} | {:>8} | {:<30} | {:>8} | {:<30} | {:>8} | {:<30} | {:>8} | {:<30} | {} | {:<32} | {:>2} | {:>5.2} | {:<32} | {:>2} | {:>5.2} | {:>5} | {} | {}",
            self.accession,
            self.seq_length,
            self.taxid,
            self.rank,
            self.species_taxid,
            self.scientific_name,
            self.genus.taxid,
            self.genus.name,
            self.family.taxid,
            self.family.name,
            self.superkingdom.taxid,
            self.superkingdom.name,
            self.strand.marker(),
            self.oligo1,
            self.err1,
            self.tm1,
            self.oligo2,
            self.err2,
            self.tm2,
            self.amplicon_length,
            self.amplicon,
            self.description,
        )
    }
}

/// Per-run renderer: canonical primers, flank context, lineage mode and the
/// shared read-only taxonomy.
pub struct Renderer<'a> {
    taxonomy: &'a Taxonomy,
    tm: TmParams,
    primer1: String,
    primer2: String,
    context: usize,
    species_rank: Option<usize>,
    genus_rank: Option<usize>,
    family_rank: Option<usize>,
    top_rank: Option<usize>,
}

impl<'a> Renderer<'a> {
    /// `kingdom_mode` selects "kingdom" as the top lineage rank instead of
    /// the default "superkingdom".
    pub fn new(
        taxonomy: &'a Taxonomy,
        tm: TmParams,
        primer1: &Pattern,
        primer2: &Pattern,
        context: usize,
        kingdom_mode: bool,
    ) -> Renderer<'a> {
        let ranks = taxonomy.ranks();
        let top = if kingdom_mode { "kingdom" } else { "superkingdom" };
        Renderer {
            taxonomy,
            tm,
            primer1: primer1.text().to_string(),
            primer2: primer2.text().to_string(),
            context,
            species_rank: ranks.index_of("species"),
            genus_rank: ranks.index_of("genus"),
            family_rank: ranks.index_of("family"),
            top_rank: ranks.index_of(top),
        }
    }

    /// Assemble the output record for one candidate.
    pub fn render(&self, record: &SeqRecord, cand: &Candidate) -> Result<AmpliconRecord> {
        let main_idx = self.taxonomy.index_of_taxid(record.taxid)?;
        let main = self.taxonomy.taxon(main_idx);

        // Lineage chain: each rank restarts from the deepest resolved node,
        // falling back to the record's own taxon.
        let species_idx = self
            .species_rank
            .and_then(|r| self.taxonomy.ancestor_at_rank(main_idx, r));
        let genus_idx = self
            .genus_rank
            .and_then(|r| self.taxonomy.ancestor_at_rank(species_idx.unwrap_or(main_idx), r));
        let family_idx = self
            .family_rank
            .and_then(|r| self.taxonomy.ancestor_at_rank(genus_idx.unwrap_or(main_idx), r));
        let top_idx = self
            .top_rank
            .and_then(|r| self.taxonomy.ancestor_at_rank(family_idx.unwrap_or(main_idx), r));

        let (species_taxid, scientific_name) = match species_idx {
            Some(i) => {
                let t = self.taxonomy.taxon(i);
                (t.taxid, t.name.clone())
            }
            None => (ABSENT_TAXID, main.name.clone()),
        };
        let entry = |idx: Option<usize>| {
            idx.map(|i| LineageEntry::of(self.taxonomy, i))
                .unwrap_or_else(LineageEntry::absent)
        };

        let (window, left_flank, right_flank, amplength, err1, err2) =
            self.extract(record, cand);
        let p1_len = self.primer1.len();
        let p2_len = self.primer2.len();
        let inner_len = amplength - p1_len - p2_len;

        let oligo1 = window[left_flank..left_flank + p1_len].to_vec();
        let oligo2 = reverse_complement(&window[left_flank + amplength - p2_len..left_flank + amplength]);

        let tm1 = self.tm.two_tm(&oligo1, self.primer1.as_bytes()) - 273.15;
        let tm2 = self.tm.two_tm(&oligo2, self.primer2.as_bytes()) - 273.15;

        let amplicon = if self.context == 0 {
            let inner = &window[left_flank + p1_len..left_flank + p1_len + inner_len];
            String::from_utf8_lossy(inner).into_owned()
        } else {
            let mut w = window.clone();
            let head = left_flank + p1_len;
            let tail = w.len() - (right_flank + p2_len);
            w[..head].make_ascii_lowercase();
            w[tail..].make_ascii_lowercase();
            String::from_utf8_lossy(&w).into_owned()
        };

        Ok(AmpliconRecord {
            accession: record.accession.clone(),
            seq_length: record.len(),
            taxid: main.taxid,
            rank: self.taxonomy.ranks().label(main.rank).to_string(),
            species_taxid,
            scientific_name,
            genus: entry(genus_idx),
            family: entry(family_idx),
            superkingdom: entry(top_idx),
            strand: cand.strand,
            oligo1: String::from_utf8_lossy(&oligo1).into_owned(),
            err1,
            tm1,
            oligo2: String::from_utf8_lossy(&oligo2).into_owned(),
            err2,
            tm2,
            amplicon_length: inner_len,
            amplicon,
            description: record.description.clone(),
        })
    }

    /// Pull the context-padded window out of the record and orient it so the
    /// primer-1 side comes first. Returns `(window, left_flank, right_flank,
    /// amplength, err1, err2)` where the flank widths are post-orientation
    /// and `amplength` spans primer start to primer end.
    fn extract(
        &self,
        record: &SeqRecord,
        cand: &Candidate,
    ) -> (Vec<u8>, usize, usize, usize, u8, u8) {
        let seqlen = record.len();
        let start = cand.start;
        // Unroll a wrapped end past the physical length; indexing is modular.
        let end = if cand.end <= start {
            cand.end + seqlen
        } else {
            cand.end
        };
        // A tolerant downstream match can nominally run past the last
        // residue; on a linear molecule the window stops there.
        let end = match record.topology {
            Topology::Linear => end.min(seqlen),
            Topology::Circular => end,
        };
        let amplength = end - start;

        let (ldelta, rdelta) = match record.topology {
            Topology::Circular => (self.context.min(seqlen), self.context.min(seqlen)),
            Topology::Linear => (
                self.context.min(start),
                self.context.min(seqlen.saturating_sub(end)),
            ),
        };

        let win_start = start as i64 - ldelta as i64;
        let window_len = ldelta + amplength + rdelta;
        let mut window: Vec<u8> = (0..window_len)
            .map(|i| {
                let pos = (win_start + i as i64).rem_euclid(seqlen as i64) as usize;
                record.residues[pos]
            })
            .collect();

        match cand.strand {
            Strand::Direct => (window, ldelta, rdelta, amplength, cand.err1, cand.err2),
            Strand::Reverse => {
                // Orientation-correct: the downstream (primer-1) side of a
                // reverse product becomes the left end, and the flank widths
                // swap with it.
                window = reverse_complement(&window);
                (window, rdelta, ldelta, amplength, cand.err2, cand.err1)
            }
        }
    }
}
