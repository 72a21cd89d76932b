//! Sequence streaming over FASTA / FASTA.GZ via `needletail`.
//!
//! Records are yielded one at a time; a record is owned by the pipeline for
//! the duration of its processing and dropped before the next is read. The
//! header convention is
//!
//! ```text
//! >ACCESSION taxid=562; free-text description
//! ```
//!
//! Records without a parseable `taxid=` annotation are skipped with a
//! warning; they cannot be taxonomically filtered or reported.

use std::path::{Path, PathBuf};

use needletail::{parse_fastx_file, FastxReader};

use crate::error::{Error, Result};

/// Molecular topology of a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Linear,
    Circular,
}

/// One annotated nucleotide sequence, normalized to uppercase residues.
#[derive(Debug, Clone)]
pub struct SeqRecord {
    pub accession: String,
    pub taxid: i32,
    pub residues: Vec<u8>,
    pub description: String,
    pub topology: Topology,
}

impl SeqRecord {
    pub fn len(&self) -> usize {
        self.residues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.residues.is_empty()
    }
}

/// Streaming reader over one FASTA file.
pub struct SeqReader {
    path: PathBuf,
    inner: Box<dyn FastxReader>,
    topology: Topology,
}

impl std::fmt::Debug for SeqReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqReader")
            .field("path", &self.path)
            .field("topology", &self.topology)
            .finish()
    }
}

impl SeqReader {
    /// Open `path`; every yielded record is tagged with `topology` (the run
    /// treats the whole collection as linear or circular, as configured).
    pub fn open(path: &Path, topology: Topology) -> Result<SeqReader> {
        let inner = parse_fastx_file(path).map_err(|e| Error::DatabaseUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(SeqReader {
            path: path.to_path_buf(),
            inner,
            topology,
        })
    }

    /// Next well-formed record, or `None` at end of stream. Malformed
    /// headers are logged and skipped rather than ending the stream.
    pub fn next_record(&mut self) -> Option<Result<SeqRecord>> {
        loop {
            let rec = match self.inner.next()? {
                Ok(r) => r,
                Err(e) => {
                    return Some(Err(Error::DatabaseUnavailable {
                        path: self.path.clone(),
                        reason: e.to_string(),
                    }))
                }
            };
            let header = String::from_utf8_lossy(rec.id()).to_string();
            let (accession, description) = split_header(&header);
            let taxid = match parse_taxid(description) {
                Some(t) => t,
                None => {
                    tracing::warn!(accession, "record carries no taxid= annotation; skipped");
                    continue;
                }
            };
            let mut residues = rec.seq().to_vec();
            residues.make_ascii_uppercase();
            return Some(Ok(SeqRecord {
                accession: accession.to_string(),
                taxid,
                residues,
                description: description.to_string(),
                topology: self.topology,
            }));
        }
    }
}

/// Split a FASTA header into accession and description.
fn split_header(header: &str) -> (&str, &str) {
    match header.split_once(char::is_whitespace) {
        Some((acc, rest)) => (acc, rest.trim()),
        None => (header, ""),
    }
}

/// Extract the numeric value of the first `taxid=<n>` annotation.
fn parse_taxid(description: &str) -> Option<i32> {
    let start = description.find("taxid=")? + "taxid=".len();
    let digits: String = description[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn fasta(contents: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::Builder::new().suffix(".fasta").tempfile().unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn parses_accession_taxid_and_description() {
        let f = fasta(">AB123456 taxid=562; Escherichia coli strain K-12\nacgtACGT\n");
        let mut r = SeqReader::open(f.path(), Topology::Linear).unwrap();
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.accession, "AB123456");
        assert_eq!(rec.taxid, 562);
        assert_eq!(rec.residues, b"ACGTACGT");
        assert!(rec.description.contains("Escherichia coli"));
        assert_eq!(rec.topology, Topology::Linear);
        assert!(r.next_record().is_none());
    }

    #[test]
    fn skips_records_without_taxid() {
        let f = fasta(
            ">SEQ1 no annotation here\nACGT\n>SEQ2 taxid=77133; environmental sample\nGGCC\n",
        );
        let mut r = SeqReader::open(f.path(), Topology::Circular).unwrap();
        let rec = r.next_record().unwrap().unwrap();
        assert_eq!(rec.accession, "SEQ2");
        assert_eq!(rec.taxid, 77133);
        assert_eq!(rec.topology, Topology::Circular);
        assert!(r.next_record().is_none());
    }

    #[test]
    fn missing_file_is_database_unavailable() {
        let err = SeqReader::open(Path::new("/no/such.fasta"), Topology::Linear).unwrap_err();
        assert!(matches!(err, Error::DatabaseUnavailable { .. }));
    }
}
