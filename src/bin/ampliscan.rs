use std::collections::HashSet;
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ampliscan::amplicon::LengthBounds;
use ampliscan::grep::{filter_stream, GrepFilter};
use ampliscan::pattern::Pattern;
use ampliscan::pipeline::{run, PcrConfig};
use ampliscan::seqio::Topology;
use ampliscan::taxdump;
use ampliscan::taxonomy::Taxonomy;
use ampliscan::thermo::{SaltMethod, TmParams, DEF_CONC_PRIMERS, DEF_SALT};

/// ampliscan CLI
#[derive(Parser)]
#[command(name = "ampliscan")]
#[command(version)]
#[command(about = "In-silico PCR over annotated sequence collections", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an in-silico PCR over a database
    Pcr {
        /// Direct-strand primer (IUPAC alphabet, 5'->3')
        primer1: String,
        /// Reverse-strand primer (IUPAC alphabet, 5'->3')
        primer2: String,
        /// Database directory (defaults to $AMPLISCAN_DB)
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Max errors tolerated by each primer
        #[arg(short, long, default_value_t = 0)]
        errors: u8,
        /// Minimum amplicon length between the primers (0 = no bound)
        #[arg(short = 'l', long, default_value_t = 0)]
        min_length: usize,
        /// Maximum amplicon length between the primers (0 = no bound)
        #[arg(short = 'L', long, default_value_t = 0)]
        max_length: usize,
        /// Flank context width reported around each amplicon
        #[arg(short = 'D', long, default_value_t = 0)]
        context: usize,
        /// Treat every sequence as circular
        #[arg(short, long)]
        circular: bool,
        /// Restrict the search to records under these taxids (repeatable)
        #[arg(short, long)]
        restrict: Vec<i32>,
        /// Skip records under these taxids (repeatable)
        #[arg(short, long)]
        ignore: Vec<i32>,
        /// Report the kingdom lineage column instead of the superkingdom
        #[arg(short, long)]
        kingdom: bool,
        /// Monovalent salt concentration (mol/L)
        #[arg(long, default_value_t = DEF_SALT)]
        salt: f64,
        /// Salt correction method: 1 = SantaLucia, 2 = Owczarzy
        #[arg(long, default_value_t = 1)]
        salt_method: u32,
        /// Primer concentration (mol/L)
        #[arg(long, default_value_t = DEF_CONC_PRIMERS)]
        concentration: f64,
        /// Threads (None = all)
        #[arg(long)]
        threads: Option<usize>,
        /// Write the result table here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Search the taxonomy by name pattern, or list parts of the tree
    Find {
        /// Case-insensitive regular expressions matched against taxon names
        patterns: Vec<String>,
        /// Database directory (defaults to $AMPLISCAN_DB)
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Match all name classes (synonyms, common names), not just
        /// scientific names
        #[arg(short, long)]
        all: bool,
        /// Keep only taxa of this rank
        #[arg(short, long)]
        rank: Option<String>,
        /// List the rank labels the taxonomy uses and exit
        #[arg(short, long)]
        list_ranks: bool,
        /// Append the full lineage path to every row
        #[arg(short = 'P', long)]
        path: bool,
        /// List the ancestors of this taxid instead of searching
        #[arg(short, long)]
        parents: Option<i32>,
        /// List the subtree under this taxid instead of searching
        #[arg(short, long)]
        sons: Option<i32>,
    },

    /// Test whether one taxon lies under another
    Under {
        /// Taxid of the hypothetical descendant
        taxid: i32,
        /// Taxid of the hypothetical ancestor
        under: i32,
        /// Database directory (defaults to $AMPLISCAN_DB)
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Filter a result table by taxonomy and sequence patterns
    Grep {
        /// Result files to filter (stdin when omitted)
        files: Vec<PathBuf>,
        /// Database directory (defaults to $AMPLISCAN_DB)
        #[arg(short, long)]
        database: Option<PathBuf>,
        /// Pattern matched against the amplified sequence
        #[arg(short, long)]
        pattern: Option<String>,
        /// Pattern matched against the direct-strand primer site
        #[arg(short = '1', long)]
        oligo1: Option<String>,
        /// Pattern matched against the reverse-strand primer site
        #[arg(short = '2', long)]
        oligo2: Option<String>,
        /// Max errors for the pattern matches
        #[arg(short, long, default_value_t = 0)]
        errors: u8,
        /// Keep only lines under these taxids (repeatable)
        #[arg(short, long)]
        restrict: Vec<i32>,
        /// Drop lines under these taxids (repeatable)
        #[arg(short, long)]
        ignore: Vec<i32>,
        /// Select non-matching lines instead
        #[arg(short = 'v', long)]
        invert: bool,
    },
}

/// Explicit flag first, then the environment.
fn database_dir(option: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    if let Some(d) = option {
        return Ok(d);
    }
    std::env::var_os("AMPLISCAN_DB")
        .map(PathBuf::from)
        .context("no database given; use --database or set AMPLISCAN_DB")
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("ampliscan=debug,info")
    } else {
        EnvFilter::new("ampliscan=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    match cli.command {
        Commands::Pcr {
            primer1,
            primer2,
            database,
            errors,
            min_length,
            max_length,
            context,
            circular,
            restrict,
            ignore,
            kingdom,
            salt,
            salt_method,
            concentration,
            threads,
            output,
        } => {
            let method = SaltMethod::from_code(salt_method)
                .with_context(|| format!("unknown salt correction method {salt_method}"))?;
            let config = PcrConfig {
                database: database_dir(database)?,
                primer1,
                primer2,
                max_errors: errors,
                bounds: LengthBounds {
                    min: min_length,
                    max: max_length,
                },
                context,
                topology: if circular {
                    Topology::Circular
                } else {
                    Topology::Linear
                },
                restrict: restrict.into_iter().collect(),
                ignore: ignore.into_iter().collect(),
                tm: TmParams {
                    primer_conc: concentration,
                    salt,
                    method,
                },
                kingdom_mode: kingdom,
                threads,
            };
            let stats = match output {
                Some(path) => {
                    let file = std::fs::File::create(&path)
                        .with_context(|| format!("cannot create {}", path.display()))?;
                    run(&config, BufWriter::new(file))?
                }
                None => run(&config, BufWriter::new(std::io::stdout().lock()))?,
            };
            eprintln!(
                "# {} sequences scanned, {} selected, {} amplicons",
                stats.sequences, stats.selected, stats.amplicons
            );
        }

        Commands::Find {
            patterns,
            database,
            all,
            rank,
            list_ranks,
            path,
            parents,
            sons,
        } => {
            let taxonomy = taxdump::load(&database_dir(database)?)?;
            if list_ranks {
                for label in taxonomy.ranks().iter() {
                    println!("{label}");
                }
            } else if let Some(taxid) = parents {
                print_parents(&taxonomy, taxid, rank.as_deref(), path)?;
            } else if let Some(taxid) = sons {
                print_subtree(&taxonomy, taxid, rank.as_deref(), path)?;
            } else if patterns.is_empty() {
                bail!("give a name pattern, or one of --list-ranks/--parents/--sons");
            } else {
                println!("#  {} taxons", taxonomy.taxon_count());
                for pattern in &patterns {
                    find_names(&taxonomy, pattern, all, rank.as_deref(), path)?;
                }
            }
        }

        Commands::Under {
            taxid,
            under,
            database,
        } => {
            let taxonomy = taxdump::load(&database_dir(database)?)?;
            let index = taxonomy.index_of_taxid(taxid)?;
            let ancestors: HashSet<i32> = [under].into_iter().collect();
            if taxonomy.is_descendant_of_any(index, &ancestors) {
                println!("# taxid ({taxid}) is a descendant of ({under})");
            } else {
                println!("# taxid ({taxid}) is NOT a descendant of ({under})");
            }
        }

        Commands::Grep {
            files,
            database,
            pattern,
            oligo1,
            oligo2,
            errors,
            restrict,
            ignore,
            invert,
        } => {
            let taxonomy = taxdump::load(&database_dir(database)?)?;
            let mut filter = GrepFilter::new()
                .restrict_to(restrict)
                .ignore(ignore)
                .invert(invert);
            if let Some(p) = pattern {
                filter = filter.amplicon_pattern(Pattern::compile(&p, errors)?);
            }
            if let Some(p) = oligo1 {
                filter = filter.oligo1_pattern(Pattern::compile(&p, errors)?);
            }
            if let Some(p) = oligo2 {
                filter = filter.oligo2_pattern(Pattern::compile(&p, errors)?);
            }
            if !filter.is_effective() {
                bail!("no filter given; use a pattern or a taxid restriction");
            }

            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            if files.is_empty() {
                println!("# Processing standard input...");
                let kept =
                    filter_stream(std::io::stdin().lock(), &mut out, &taxonomy, &mut filter)?;
                out.flush()?;
                println!("# {kept} matching result(s)");
            } else {
                for path in &files {
                    println!("# Processing {}...", path.display());
                    let file = std::fs::File::open(path)
                        .with_context(|| format!("cannot open {}", path.display()))?;
                    let kept =
                        filter_stream(BufReader::new(file), &mut out, &taxonomy, &mut filter)?;
                    out.flush()?;
                    println!("# {kept} matching result(s)");
                }
            }
        }
    }

    Ok(())
}

fn print_header(path: bool) {
    println!(
        "# {:>12} \t| {:>15} \t|\t {:<50} \t|\t {:<15} \t|\t {}{}\n#",
        "taxonomy id",
        "taxonomy rank",
        "name",
        "class name",
        "scientific name",
        if path { "\t|\t path" } else { "" }
    );
}

fn print_row(taxonomy: &Taxonomy, index: usize, matched: Option<(&str, &str)>, path: bool) {
    let taxon = taxonomy.taxon(index);
    let (name, class) = matched.unwrap_or((taxon.name.as_str(), "scientific name"));
    let lineage = if path {
        format!(" \t|\t {}", taxonomy.format_path(index))
    } else {
        String::new()
    };
    println!(
        "{:>10} \t| {:>15} \t|\t {:<50} \t|\t {:>15} \t|\t {}{}",
        taxon.taxid,
        taxonomy.ranks().label(taxon.rank),
        name,
        class,
        taxon.name,
        lineage
    );
}

/// Resolve an optional rank label, rejecting labels the taxonomy never uses.
fn rank_filter(taxonomy: &Taxonomy, rank: Option<&str>) -> anyhow::Result<Option<usize>> {
    match rank {
        Some(label) => match taxonomy.ranks().index_of(label) {
            Some(i) => Ok(Some(i)),
            None => bail!("unknown rank label '{label}'"),
        },
        None => Ok(None),
    }
}

fn print_parents(
    taxonomy: &Taxonomy,
    taxid: i32,
    rank: Option<&str>,
    path: bool,
) -> anyhow::Result<()> {
    let index = taxonomy.index_of_taxid(taxid)?;
    let rank_index = rank_filter(taxonomy, rank)?;
    print_header(path);
    // The taxon itself first, then each ancestor out to the root.
    for i in taxonomy.path_to_root(index).into_iter().rev() {
        if i == index || rank_index.map_or(true, |r| taxonomy.taxon(i).rank == r) {
            print_row(taxonomy, i, None, path);
        }
    }
    Ok(())
}

fn print_subtree(
    taxonomy: &Taxonomy,
    taxid: i32,
    rank: Option<&str>,
    path: bool,
) -> anyhow::Result<()> {
    let index = taxonomy.index_of_taxid(taxid)?;
    let rank_index = rank_filter(taxonomy, rank)?;
    print_header(path);
    print_row(taxonomy, index, None, path);
    let mut count = 0usize;
    for i in taxonomy.subtree_of(index) {
        if rank_index.map_or(true, |r| taxonomy.taxon(i).rank == r) {
            print_row(taxonomy, i, None, path);
            count += 1;
        }
    }
    println!("#  {count} son(s) found\n#");
    Ok(())
}

fn find_names(
    taxonomy: &Taxonomy,
    pattern: &str,
    all_names: bool,
    rank: Option<&str>,
    path: bool,
) -> anyhow::Result<()> {
    println!("#\n#  searching for '{pattern}' pattern");
    let re = regex::RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .with_context(|| format!("misformed pattern '{pattern}'"))?;
    let rank_index = rank_filter(taxonomy, rank)?;

    print_header(path);
    let mut count = 0usize;
    for name in taxonomy.names() {
        if !all_names && !name.is_scientific {
            continue;
        }
        if let Some(r) = rank_index {
            if taxonomy.taxon(name.taxon).rank != r {
                continue;
            }
        }
        if re.is_match(&name.text) {
            print_row(
                taxonomy,
                name.taxon,
                Some((name.text.as_str(), name.class.as_str())),
                path,
            );
            count += 1;
        }
    }
    println!("#  {count} records found");
    Ok(())
}
