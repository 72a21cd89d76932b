//! Post-hoc filtering of result tables.
//!
//! Re-parses the pipe-delimited rows emitted by a search run and keeps the
//! lines passing a conjunction of filters: taxonomic restriction, taxonomic
//! exclusion, and approximate pattern matches against the amplified sequence
//! or either observed primer site. Comment lines (`#`) are never matched.
//!
//! Only the columns the filters need are parsed; everything else is passed
//! through verbatim so filtered tables stay valid inputs for another pass.

use std::collections::HashSet;
use std::io::{BufRead, Write};

use crate::error::Result;
use crate::pattern::Pattern;
use crate::taxonomy::Taxonomy;

/// The filterable columns of one result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedLine<'a> {
    pub accession: &'a str,
    pub taxid: i32,
    pub oligo1: &'a str,
    pub oligo2: &'a str,
    pub amplicon: &'a str,
}

/// Pull the filterable columns out of a row. `None` for rows with too few
/// columns or a non-numeric taxid field.
pub fn parse_line(line: &str) -> Option<ParsedLine<'_>> {
    let mut fields = line.split('|').map(str::trim);
    let mut col = |n: usize| fields.nth(n);
    let accession = col(0)?;
    let taxid: i32 = col(1)?.parse().ok()?;
    let oligo1 = col(10)?;
    let oligo2 = col(2)?;
    let amplicon = col(3)?;
    Some(ParsedLine {
        accession,
        taxid,
        oligo1,
        oligo2,
        amplicon,
    })
}

/// The configured filter conjunction.
#[derive(Debug, Default)]
pub struct GrepFilter {
    amplicon: Option<Pattern>,
    oligo1: Option<Pattern>,
    oligo2: Option<Pattern>,
    restrict: HashSet<i32>,
    ignore: HashSet<i32>,
    invert: bool,
}

impl GrepFilter {
    pub fn new() -> GrepFilter {
        GrepFilter::default()
    }

    /// Keep only lines whose amplified sequence matches `pattern`.
    pub fn amplicon_pattern(mut self, pattern: Pattern) -> GrepFilter {
        self.amplicon = Some(pattern);
        self
    }

    /// Keep only lines whose direct-strand primer site matches `pattern`.
    pub fn oligo1_pattern(mut self, pattern: Pattern) -> GrepFilter {
        self.oligo1 = Some(pattern);
        self
    }

    /// Keep only lines whose reverse-strand primer site matches `pattern`.
    pub fn oligo2_pattern(mut self, pattern: Pattern) -> GrepFilter {
        self.oligo2 = Some(pattern);
        self
    }

    /// Keep only lines whose taxon lies under one of `taxids`.
    pub fn restrict_to(mut self, taxids: impl IntoIterator<Item = i32>) -> GrepFilter {
        self.restrict.extend(taxids);
        self
    }

    /// Drop lines whose taxon lies under one of `taxids`.
    pub fn ignore(mut self, taxids: impl IntoIterator<Item = i32>) -> GrepFilter {
        self.ignore.extend(taxids);
        self
    }

    /// Select non-matching lines instead.
    pub fn invert(mut self, invert: bool) -> GrepFilter {
        self.invert = invert;
        self
    }

    /// True when at least one filter is configured; an empty conjunction
    /// would select everything (or nothing, inverted) and is a usage error.
    pub fn is_effective(&self) -> bool {
        self.amplicon.is_some()
            || self.oligo1.is_some()
            || self.oligo2.is_some()
            || !self.restrict.is_empty()
            || !self.ignore.is_empty()
    }

    /// Apply the conjunction to one parsed row. A taxid unknown to the
    /// taxonomy fails the restriction test and cannot be ignored.
    pub fn accepts(&mut self, taxonomy: &Taxonomy, line: &ParsedLine<'_>) -> bool {
        let index = taxonomy.index_of_taxid(line.taxid).ok();

        let included = self.restrict.is_empty()
            || index.is_some_and(|i| taxonomy.is_descendant_of_any(i, &self.restrict));
        let ignored = !self.ignore.is_empty()
            && index.is_some_and(|i| taxonomy.is_descendant_of_any(i, &self.ignore));

        let matches = |p: &mut Option<Pattern>, text: &str| match p {
            Some(p) => {
                let upper = text.to_ascii_uppercase();
                !p.search(upper.as_bytes(), 0, upper.len()).is_empty()
            }
            None => true,
        };
        let good = included
            && !ignored
            && matches(&mut self.amplicon, line.amplicon)
            && matches(&mut self.oligo1, line.oligo1)
            && matches(&mut self.oligo2, line.oligo2);

        good != self.invert
    }
}

/// Filter a whole result stream. Comment lines and unparseable rows are
/// dropped; matching rows are copied through unchanged. Returns the number
/// of rows kept.
pub fn filter_stream<R: BufRead, W: Write>(
    input: R,
    mut output: W,
    taxonomy: &Taxonomy,
    filter: &mut GrepFilter,
) -> Result<u64> {
    let mut kept = 0u64;
    for line in input.lines() {
        let line = line?;
        if line.starts_with('#') || line.is_empty() {
            continue;
        }
        let parsed = match parse_line(&line) {
            Some(p) => p,
            None => {
                tracing::warn!(line, "unparseable result row; dropped");
                continue;
            }
        };
        if filter.accepts(taxonomy, &parsed) {
            writeln!(output, "{line}")?;
            kept += 1;
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::tests::sample_taxonomy;

    /// A structurally faithful row: 22 columns, of which only the filterable
    /// ones carry meaningful values here.
    fn row(accession: &str, taxid: i32, oligo1: &str, oligo2: &str, amplicon: &str) -> String {
        let mut cols = vec!["-"; 22];
        let taxid = taxid.to_string();
        cols[0] = accession;
        cols[2] = &taxid;
        cols[13] = oligo1;
        cols[16] = oligo2;
        cols[20] = amplicon;
        cols.join(" | ")
    }

    #[test]
    fn parses_the_filterable_columns() {
        let line = row("AB000001", 5, "AAGGA", "GGAAGA", "ACGTACGT");
        let p = parse_line(&line).unwrap();
        assert_eq!(p.accession, "AB000001");
        assert_eq!(p.taxid, 5);
        assert_eq!(p.oligo1, "AAGGA");
        assert_eq!(p.oligo2, "GGAAGA");
        assert_eq!(p.amplicon, "ACGTACGT");
    }

    #[test]
    fn short_or_malformed_rows_parse_to_none() {
        assert!(parse_line("AB000001 | 80 | 5").is_none());
        let bad_taxid = row("AB000001", 5, "A", "A", "A").replace(" 5 ", " x ");
        assert!(parse_line(&bad_taxid).is_none());
    }

    #[test]
    fn restriction_follows_the_tree() {
        let tax = sample_taxonomy();
        let mut f = GrepFilter::new().restrict_to([3]); // the family
        let coli_row = row("A", 5, "-", "-", "ACGT");
        let root_row = row("B", 1, "-", "-", "ACGT");
        let coli = parse_line(&coli_row).unwrap();
        let root = parse_line(&root_row).unwrap();
        assert!(f.accepts(&tax, &coli));
        assert!(!f.accepts(&tax, &root));
    }

    #[test]
    fn ignore_beats_restriction() {
        let tax = sample_taxonomy();
        let mut f = GrepFilter::new().restrict_to([3]).ignore([4]); // family minus genus
        let coli_row = row("A", 5, "-", "-", "ACGT");
        let salmonella_row = row("B", 6, "-", "-", "ACGT");
        let coli = parse_line(&coli_row).unwrap();
        let salmonella = parse_line(&salmonella_row).unwrap();
        assert!(!f.accepts(&tax, &coli));
        assert!(f.accepts(&tax, &salmonella));
    }

    #[test]
    fn unknown_taxid_is_never_included_under_a_restriction() {
        let tax = sample_taxonomy();
        let mut restricted = GrepFilter::new().restrict_to([1]);
        let alien_row = row("A", 424242, "-", "-", "ACGT");
        let alien = parse_line(&alien_row).unwrap();
        assert!(!restricted.accepts(&tax, &alien));
        // Without a restriction an unknown taxid passes the taxonomic tests.
        let mut open = GrepFilter::new().ignore([3]);
        assert!(open.accepts(&tax, &alien));
    }

    #[test]
    fn amplicon_pattern_is_case_insensitive_and_approximate() {
        let tax = sample_taxonomy();
        let p = Pattern::compile("ACGTACGT", 1).unwrap();
        let mut f = GrepFilter::new().amplicon_pattern(p);
        // Lowercase flank rendering must not defeat the match.
        let hit_row = row("A", 5, "-", "-", "ttACGAACGTtt");
        let miss_row = row("B", 5, "-", "-", "TTTTTTTTTTTT");
        let hit = parse_line(&hit_row).unwrap();
        let miss = parse_line(&miss_row).unwrap();
        assert!(f.accepts(&tax, &hit));
        assert!(!f.accepts(&tax, &miss));
    }

    #[test]
    fn oligo_patterns_check_their_own_columns() {
        let tax = sample_taxonomy();
        let mut f = GrepFilter::new()
            .oligo1_pattern(Pattern::compile("AAGGA", 0).unwrap())
            .oligo2_pattern(Pattern::compile("GGAAGA", 0).unwrap());
        let both_row = row("A", 5, "AAGGA", "GGAAGA", "ACGT");
        let swapped_row = row("B", 5, "GGAAGA", "AAGGA", "ACGT");
        let both = parse_line(&both_row).unwrap();
        let swapped = parse_line(&swapped_row).unwrap();
        assert!(f.accepts(&tax, &both));
        assert!(!f.accepts(&tax, &swapped));
    }

    #[test]
    fn invert_selects_the_complement() {
        let tax = sample_taxonomy();
        let mut f = GrepFilter::new().restrict_to([3]).invert(true);
        let coli_row = row("A", 5, "-", "-", "ACGT");
        let root_row = row("B", 1, "-", "-", "ACGT");
        let coli = parse_line(&coli_row).unwrap();
        let root = parse_line(&root_row).unwrap();
        assert!(!f.accepts(&tax, &coli));
        assert!(f.accepts(&tax, &root));
    }

    #[test]
    fn stream_filtering_skips_comments_and_counts() {
        let tax = sample_taxonomy();
        let input = format!(
            "# header comment\n{}\n{}\n# trailer\n",
            row("A", 5, "-", "-", "ACGT"),
            row("B", 1, "-", "-", "ACGT"),
        );
        let mut f = GrepFilter::new().restrict_to([2]);
        let mut out = Vec::new();
        let kept = filter_stream(input.as_bytes(), &mut out, &tax, &mut f).unwrap();
        assert_eq!(kept, 1);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("A |"));
        assert_eq!(text.lines().count(), 1);
    }

    #[test]
    fn empty_conjunction_is_flagged() {
        assert!(!GrepFilter::new().is_effective());
        assert!(GrepFilter::new().ignore([1]).is_effective());
    }
}
