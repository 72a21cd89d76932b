//! The end-to-end search run.
//!
//! Loads the database directory, compiles the primer set, streams every
//! sequence record through taxonomic selection and amplicon detection, and
//! writes the result table. Records are processed in batches on a Rayon pool;
//! the writer drains batches in submission order so the output is stable for
//! a given database regardless of thread count.

use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::amplicon::{find_amplicons, LengthBounds, PrimerSet};
use crate::pattern::Pattern;
use crate::render::{AmpliconRecord, Renderer};
use crate::seqio::{SeqReader, SeqRecord, Topology};
use crate::taxdump;
use crate::taxonomy::Taxonomy;
use crate::thermo::TmParams;

const BATCH: usize = 256;

/// Everything one search run needs, resolved before any I/O starts.
#[derive(Debug, Clone)]
pub struct PcrConfig {
    /// Database directory (taxonomy dump plus FASTA files).
    pub database: PathBuf,
    pub primer1: String,
    pub primer2: String,
    /// Error budget applied to each primer independently.
    pub max_errors: u8,
    pub bounds: LengthBounds,
    /// Flank context width added on both sides of reported amplicons.
    pub context: usize,
    pub topology: Topology,
    /// Keep only records under one of these taxids (empty keeps all).
    pub restrict: HashSet<i32>,
    /// Drop records under one of these taxids.
    pub ignore: HashSet<i32>,
    pub tm: TmParams,
    /// Report the kingdom instead of the superkingdom lineage column.
    pub kingdom_mode: bool,
    /// Worker count; `None` uses all cores.
    pub threads: Option<usize>,
}

impl PcrConfig {
    pub fn new(database: PathBuf, primer1: &str, primer2: &str) -> PcrConfig {
        PcrConfig {
            database,
            primer1: primer1.to_string(),
            primer2: primer2.to_string(),
            max_errors: 0,
            bounds: LengthBounds::default(),
            context: 0,
            topology: Topology::Linear,
            restrict: HashSet::new(),
            ignore: HashSet::new(),
            tm: TmParams::default(),
            kingdom_mode: false,
            threads: None,
        }
    }
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Records read from the database.
    pub sequences: u64,
    /// Records passing the taxonomic selection.
    pub selected: u64,
    /// Result rows written.
    pub amplicons: u64,
    /// Records abandoned because their taxid is unknown to the taxonomy.
    pub unknown_taxids: u64,
}

/// Run one search over the whole database, writing the result table to
/// `output`.
pub fn run<W: Write>(config: &PcrConfig, mut output: W) -> Result<RunStats> {
    let p1 = Pattern::compile(&config.primer1, config.max_errors)?;
    let p2 = Pattern::compile(&config.primer2, config.max_errors)?;
    let primers = PrimerSet::new(p1, p2);

    let taxonomy = taxdump::load(&config.database)?;
    let files = taxdump::sequence_files(&config.database)?;
    tracing::info!(
        taxa = taxonomy.taxon_count(),
        files = files.len(),
        "database loaded"
    );

    write_preamble(&mut output, config, &primers)?;

    let renderer = Renderer::new(
        &taxonomy,
        config.tm,
        &primers.p1,
        &primers.p2,
        config.context,
        config.kingdom_mode,
    );

    let threads = config.threads.unwrap_or_else(num_cpus::get).max(1);
    let pool = ThreadPoolBuilder::new().num_threads(threads).build()?;

    let mut stats = RunStats::default();
    for path in &files {
        tracing::info!(path = %path.display(), "scanning");
        let mut reader = SeqReader::open(path, config.topology)?;
        loop {
            let mut batch: Vec<SeqRecord> = Vec::with_capacity(BATCH);
            while batch.len() < BATCH {
                match reader.next_record() {
                    Some(rec) => batch.push(rec?),
                    None => break,
                }
            }
            if batch.is_empty() {
                break;
            }
            stats.sequences += batch.len() as u64;

            // map_init gives each worker its own compiled primer set; the
            // collect preserves batch order.
            let results: Vec<Outcome> = pool.install(|| {
                batch
                    .par_iter()
                    .map_init(
                        || primers.clone(),
                        |ps, rec| process(rec, &taxonomy, ps, &renderer, config),
                    )
                    .collect()
            });
            for outcome in results {
                match outcome {
                    Outcome::Selected(rows) => {
                        stats.selected += 1;
                        for row in rows {
                            writeln!(output, "{row}")?;
                            stats.amplicons += 1;
                        }
                    }
                    Outcome::Deselected => {}
                    Outcome::UnknownTaxid => stats.unknown_taxids += 1,
                }
            }
            if batch.len() < BATCH {
                break;
            }
        }
    }

    tracing::info!(
        sequences = stats.sequences,
        selected = stats.selected,
        amplicons = stats.amplicons,
        unknown_taxids = stats.unknown_taxids,
        "run complete"
    );
    Ok(stats)
}

/// What happened to one record.
enum Outcome {
    /// Passed the taxonomic selection; carries its result rows (possibly none).
    Selected(Vec<AmpliconRecord>),
    /// Pruned by the restrict/ignore sets.
    Deselected,
    /// Taxid absent from the taxonomy; abandoned.
    UnknownTaxid,
}

/// One record through selection, detection and rendering.
fn process(
    record: &SeqRecord,
    taxonomy: &Taxonomy,
    primers: &mut PrimerSet,
    renderer: &Renderer<'_>,
    config: &PcrConfig,
) -> Outcome {
    let index = match taxonomy.index_of_taxid(record.taxid) {
        Ok(i) => i,
        Err(_) => {
            tracing::warn!(
                accession = %record.accession,
                taxid = record.taxid,
                "unknown taxid; record skipped"
            );
            return Outcome::UnknownTaxid;
        }
    };
    if !config.restrict.is_empty() && !taxonomy.is_descendant_of_any(index, &config.restrict) {
        return Outcome::Deselected;
    }
    if !config.ignore.is_empty() && taxonomy.is_descendant_of_any(index, &config.ignore) {
        return Outcome::Deselected;
    }

    let rows = find_amplicons(record, primers, config.bounds)
        .iter()
        .filter_map(|cand| match renderer.render(record, cand) {
            Ok(row) => Some(row),
            Err(e) => {
                tracing::warn!(accession = %record.accession, error = %e, "render failed");
                None
            }
        })
        .collect();
    Outcome::Selected(rows)
}

/// Comment header echoing the run parameters, so a result file is
/// self-describing and re-filterable later.
fn write_preamble<W: Write>(out: &mut W, config: &PcrConfig, primers: &PrimerSet) -> Result<()> {
    writeln!(out, "#@ampliscan-v1")?;
    writeln!(out, "#")?;
    writeln!(out, "# ampliscan version {}", crate::VERSION)?;
    writeln!(
        out,
        "# direct  strand oligo1 : {:<32} ; oligo2c : {:>32}",
        primers.p1.text(),
        primers.p2c.text()
    )?;
    writeln!(
        out,
        "# reverse strand oligo2 : {:<32} ; oligo1c : {:>32}",
        primers.p2.text(),
        primers.p1c.text()
    )?;
    writeln!(
        out,
        "# max error count by oligonucleotide : {}",
        config.max_errors
    )?;
    writeln!(
        out,
        "# optimal Tm for primers 1 : {:5.2}",
        config.tm.self_tm(primers.p1.text().as_bytes()) - 273.15
    )?;
    writeln!(
        out,
        "# optimal Tm for primers 2 : {:5.2}",
        config.tm.self_tm(primers.p2.text().as_bytes()) - 273.15
    )?;
    writeln!(out, "# database : {}", config.database.display())?;
    match (config.bounds.min, config.bounds.max) {
        (0, 0) => {}
        (min, 0) => writeln!(out, "# amplicon length larger than {min} bp")?,
        (0, max) => writeln!(out, "# amplicon length smaller than {max} bp")?,
        (min, max) => writeln!(out, "# amplicon length between [{min},{max}] bp")?,
    }
    if config.kingdom_mode {
        writeln!(out, "# output in kingdom mode")?;
    } else {
        writeln!(out, "# output in superkingdom mode")?;
    }
    match config.topology {
        Topology::Circular => writeln!(out, "# DB sequences are considered as circular")?,
        Topology::Linear => writeln!(out, "# DB sequences are considered as linear")?,
    }
    writeln!(out, "#")?;
    Ok(())
}
