//! Database-directory loader.
//!
//! A database is a plain directory holding an NCBI-style taxonomy dump
//! (`nodes.dmp`, `names.dmp`) next to one or more FASTA files carrying the
//! sequence collection. The taxonomy is loaded eagerly into a [`Taxonomy`];
//! the FASTA files are only enumerated here and streamed later by
//! [`crate::seqio`].
//!
//! Dump files use the NCBI field convention: fields separated by `\t|\t`,
//! records terminated by `\t|`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::taxonomy::{RankTable, RawName, RawTaxon, Taxonomy, NO_RANK};

/// The FASTA files of a database directory, sorted by name for a stable
/// processing order. Recognized suffixes: `.fasta`, `.fa`, `.fna`, each
/// optionally `.gz`.
pub fn sequence_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| Error::DatabaseUnavailable {
        path: dir.to_path_buf(),
        reason: e.to_string(),
    })? {
        let path = entry?.path();
        if path.is_file() && is_fasta(&path) {
            out.push(path);
        }
    }
    out.sort();
    if out.is_empty() {
        return Err(Error::DatabaseUnavailable {
            path: dir.to_path_buf(),
            reason: "no FASTA sequence files found".into(),
        });
    }
    Ok(out)
}

fn is_fasta(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n.to_ascii_lowercase(),
        None => return false,
    };
    let stem = name.strip_suffix(".gz").unwrap_or(&name);
    stem.ends_with(".fasta") || stem.ends_with(".fa") || stem.ends_with(".fna")
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::DatabaseUnavailable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
}

/// Split one dump line into its fields, stripping the `\t|` terminator.
fn dmp_fields(line: &str) -> Vec<&str> {
    let line = line.strip_suffix("\t|").unwrap_or(line);
    line.split("\t|\t").map(str::trim).collect()
}

fn read_nodes(path: &Path) -> Result<(Vec<RawTaxon>, RankTable)> {
    let reader = open(path)?;
    let mut labels: Vec<String> = vec![NO_RANK.to_string()];
    let mut raw = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = dmp_fields(&line);
        if fields.len() < 3 {
            return Err(Error::TaxonomyParse {
                path: path.to_path_buf(),
                line: lineno + 1,
                reason: format!("expected at least 3 fields, found {}", fields.len()),
            });
        }
        let parse = |s: &str| {
            s.parse::<i32>().map_err(|_| Error::TaxonomyParse {
                path: path.to_path_buf(),
                line: lineno + 1,
                reason: format!("invalid taxid '{s}'"),
            })
        };
        let taxid = parse(fields[0])?;
        let parent_taxid = parse(fields[1])?;
        let rank_label = fields[2];
        let rank = match labels.iter().position(|l| l == rank_label) {
            Some(i) => i,
            None => {
                labels.push(rank_label.to_string());
                labels.len() - 1
            }
        };
        // The preferred name is filled in from names.dmp after the fact; the
        // node record itself carries no name.
        raw.push(RawTaxon {
            taxid,
            parent_taxid,
            rank,
            name: String::new(),
        });
    }

    Ok((raw, RankTable::new(labels)))
}

fn read_names(path: &Path) -> Result<Vec<RawName>> {
    let reader = open(path)?;
    let mut out = Vec::new();
    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = dmp_fields(&line);
        if fields.len() < 4 {
            return Err(Error::TaxonomyParse {
                path: path.to_path_buf(),
                line: lineno + 1,
                reason: format!("expected 4 fields, found {}", fields.len()),
            });
        }
        let taxid = fields[0].parse::<i32>().map_err(|_| Error::TaxonomyParse {
            path: path.to_path_buf(),
            line: lineno + 1,
            reason: format!("invalid taxid '{}'", fields[0]),
        })?;
        out.push(RawName {
            taxid,
            text: fields[1].to_string(),
            class: fields[3].to_string(),
        });
    }
    Ok(out)
}

/// Load `nodes.dmp` and `names.dmp` from `dir` into a ready-to-query
/// [`Taxonomy`], with each taxon's preferred name resolved from its
/// scientific-name record. Missing files are [`Error::DatabaseUnavailable`];
/// lines that do not parse are [`Error::TaxonomyParse`].
pub fn load(dir: &Path) -> Result<Taxonomy> {
    let nodes_path = dir.join("nodes.dmp");
    let names_path = dir.join("names.dmp");
    if !dir.is_dir() {
        return Err(Error::DatabaseUnavailable {
            path: dir.to_path_buf(),
            reason: "not a directory".into(),
        });
    }

    let (mut raw_taxa, ranks) = read_nodes(&nodes_path)?;
    let raw_names = read_names(&names_path)?;

    // Resolve each taxon's preferred name from its scientific-name record.
    let scientific: std::collections::HashMap<i32, &str> = raw_names
        .iter()
        .filter(|n| n.class == "scientific name")
        .map(|n| (n.taxid, n.text.as_str()))
        .collect();
    for t in raw_taxa.iter_mut() {
        match scientific.get(&t.taxid) {
            Some(name) => t.name = (*name).to_string(),
            None => {
                tracing::warn!(taxid = t.taxid, "taxon has no scientific name");
                t.name = format!("taxid:{}", t.taxid);
            }
        }
    }

    Taxonomy::from_parts(ranks, raw_taxa, raw_names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_db(dir: &Path) {
        let mut nodes = File::create(dir.join("nodes.dmp")).unwrap();
        writeln!(nodes, "1\t|\t1\t|\tno rank\t|").unwrap();
        writeln!(nodes, "2\t|\t1\t|\tsuperkingdom\t|").unwrap();
        writeln!(nodes, "561\t|\t2\t|\tgenus\t|").unwrap();
        writeln!(nodes, "562\t|\t561\t|\tspecies\t|").unwrap();
        let mut names = File::create(dir.join("names.dmp")).unwrap();
        writeln!(names, "1\t|\troot\t|\t\t|\tscientific name\t|").unwrap();
        writeln!(names, "2\t|\tBacteria\t|\t\t|\tscientific name\t|").unwrap();
        writeln!(names, "561\t|\tEscherichia\t|\t\t|\tscientific name\t|").unwrap();
        writeln!(names, "562\t|\tEscherichia coli\t|\t\t|\tscientific name\t|").unwrap();
        writeln!(names, "562\t|\tE. coli\t|\t\t|\tcommon name\t|").unwrap();
    }

    #[test]
    fn loads_a_taxdump_directory() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path());
        let tax = load(dir.path()).unwrap();

        assert_eq!(tax.taxon_count(), 4);
        let coli = tax.index_of_taxid(562).unwrap();
        assert_eq!(tax.taxon(coli).name, "Escherichia coli");
        let species = tax.ranks().index_of("species").unwrap();
        assert_eq!(tax.taxon(coli).rank, species);

        let genus = tax.ranks().index_of("genus").unwrap();
        let g = tax.ancestor_at_rank(coli, genus).unwrap();
        assert_eq!(tax.taxon(g).taxid, 561);

        // The common name survives as an alternate name.
        assert!(tax
            .names()
            .iter()
            .any(|n| n.text == "E. coli" && !n.is_scientific));
    }

    #[test]
    fn missing_directory_is_database_unavailable() {
        let err = load(Path::new("/nonexistent/ampliscan-db")).unwrap_err();
        assert!(matches!(err, Error::DatabaseUnavailable { .. }));
    }

    #[test]
    fn malformed_nodes_line_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path());
        let mut nodes = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("nodes.dmp"))
            .unwrap();
        writeln!(nodes, "not-a-taxid\t|\t1\t|\tspecies\t|").unwrap();
        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::TaxonomyParse { .. }));
    }

    #[test]
    fn cyclic_parent_chain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path());
        let mut nodes = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("nodes.dmp"))
            .unwrap();
        writeln!(nodes, "700\t|\t701\t|\tgenus\t|").unwrap();
        writeln!(nodes, "701\t|\t700\t|\tspecies\t|").unwrap();
        let mut names = std::fs::OpenOptions::new()
            .append(true)
            .open(dir.path().join("names.dmp"))
            .unwrap();
        writeln!(names, "700\t|\tLoop a\t|\t\t|\tscientific name\t|").unwrap();
        writeln!(names, "701\t|\tLoop b\t|\t\t|\tscientific name\t|").unwrap();

        let err = load(dir.path()).unwrap_err();
        assert!(matches!(err, Error::TaxonomyStructure { .. }), "{err}");
    }

    #[test]
    fn finds_sequence_files() {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path());
        File::create(dir.path().join("b.fasta")).unwrap();
        File::create(dir.path().join("a.fna.gz")).unwrap();
        File::create(dir.path().join("notes.txt")).unwrap();
        let files = sequence_files(dir.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.fna.gz", "b.fasta"]);
    }
}
