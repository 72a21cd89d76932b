//! In-memory taxonomic tree and the query engine over it.
//!
//! The tree is stored as a dense arena: every [`Taxon`] holds its parent as an
//! index into the same arena, and the root's parent index equals its own index
//! (the self-loop is the "no further ancestor" sentinel). All traversals work
//! on indices, so there are no owning cycles and no recursion deeper than a
//! fixed-size explicit stack.
//!
//! A [`Taxonomy`] is constructed once per run, never mutated afterwards, and
//! is therefore safe to share by reference across worker threads.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};

/// Rank label conventionally attached to unranked nodes.
pub const NO_RANK: &str = "no rank";

/// Placeholder name reported for an unresolved lineage rank.
pub const ABSENT_NAME: &str = "###";

/// Taxid reported for an unresolved lineage rank.
pub const ABSENT_TAXID: i32 = -1;

/// Ordered, immutable set of rank labels ("species", "genus", ...).
#[derive(Debug, Clone, Default)]
pub struct RankTable {
    labels: Vec<String>,
    by_label: HashMap<String, usize>,
}

impl RankTable {
    pub fn new(labels: Vec<String>) -> Self {
        let by_label = labels
            .iter()
            .enumerate()
            .map(|(i, l)| (l.clone(), i))
            .collect();
        RankTable { labels, by_label }
    }

    /// Index of a rank label, or `None` when the taxonomy does not use it.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        self.by_label.get(label).copied()
    }

    pub fn label(&self, index: usize) -> &str {
        &self.labels[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// One node of the taxonomic tree.
#[derive(Debug, Clone)]
pub struct Taxon {
    /// Stable identifier, unique across the store.
    pub taxid: i32,
    /// Arena index of the parent; the root points at itself.
    pub parent: usize,
    /// Index into the [`RankTable`].
    pub rank: usize,
    /// Preferred (scientific) name.
    pub name: String,
}

/// An alternate or scientific name attached to a taxon.
#[derive(Debug, Clone)]
pub struct TaxonName {
    /// Arena index of the taxon this name belongs to.
    pub taxon: usize,
    /// The name text itself.
    pub text: String,
    /// Name class, e.g. "scientific name", "synonym", "common name".
    pub class: String,
    /// True for the single scientific name of the taxon.
    pub is_scientific: bool,
}

/// Raw taxon record as produced by a loader, before parent resolution.
#[derive(Debug, Clone)]
pub struct RawTaxon {
    pub taxid: i32,
    pub parent_taxid: i32,
    pub rank: usize,
    pub name: String,
}

/// Raw name record as produced by a loader.
#[derive(Debug, Clone)]
pub struct RawName {
    pub taxid: i32,
    pub text: String,
    pub class: String,
}

/// The loaded taxonomy: taxa arena, alternate names and rank table.
#[derive(Debug, Clone)]
pub struct Taxonomy {
    taxa: Vec<Taxon>,
    names: Vec<TaxonName>,
    ranks: RankTable,
    by_taxid: HashMap<i32, usize>,
}

/// Every traversal walks parent chains until a self-loop, so each chain must
/// reach a root. One pass with a three-state mark: a node revisited while its
/// own chain is still being walked closes a cycle.
fn verify_rooted(taxa: &[Taxon]) -> Result<()> {
    const UNSEEN: u8 = 0;
    const WALKING: u8 = 1;
    const ROOTED: u8 = 2;
    let mut state = vec![UNSEEN; taxa.len()];
    let mut chain = Vec::new();

    for start in 0..taxa.len() {
        let mut cur = start;
        loop {
            match state[cur] {
                ROOTED => break,
                WALKING => {
                    return Err(Error::TaxonomyStructure {
                        reason: format!(
                            "parent chain of taxid {} cycles at taxid {}",
                            taxa[start].taxid, taxa[cur].taxid
                        ),
                    });
                }
                _ => {}
            }
            state[cur] = WALKING;
            chain.push(cur);
            let parent = taxa[cur].parent;
            if parent == cur {
                break;
            }
            cur = parent;
        }
        for i in chain.drain(..) {
            state[i] = ROOTED;
        }
    }
    Ok(())
}

impl Taxonomy {
    /// Assemble a taxonomy from loader output, resolving parent taxids to
    /// arena indices. A taxon whose parent taxid equals its own taxid becomes
    /// a root (self-loop). Unknown parent taxids, duplicate taxids and parent
    /// cycles are construction errors.
    pub fn from_parts(
        ranks: RankTable,
        raw_taxa: Vec<RawTaxon>,
        raw_names: Vec<RawName>,
    ) -> Result<Taxonomy> {
        let mut by_taxid: HashMap<i32, usize> = HashMap::with_capacity(raw_taxa.len());
        for (i, t) in raw_taxa.iter().enumerate() {
            if by_taxid.insert(t.taxid, i).is_some() {
                return Err(Error::TaxonomyStructure {
                    reason: format!("duplicate taxid {}", t.taxid),
                });
            }
        }

        let mut taxa = Vec::with_capacity(raw_taxa.len());
        for (i, t) in raw_taxa.iter().enumerate() {
            let parent = if t.parent_taxid == t.taxid {
                i
            } else {
                *by_taxid
                    .get(&t.parent_taxid)
                    .ok_or_else(|| Error::TaxonomyStructure {
                        reason: format!(
                            "taxon {} references unknown parent taxid {}",
                            t.taxid, t.parent_taxid
                        ),
                    })?
            };
            taxa.push(Taxon {
                taxid: t.taxid,
                parent,
                rank: t.rank,
                name: t.name.clone(),
            });
        }
        verify_rooted(&taxa)?;

        let mut names = Vec::with_capacity(raw_names.len());
        for n in raw_names {
            // Names whose taxid is absent from the node table are dropped by
            // the loader; here it is a hard construction error.
            let taxon = *by_taxid
                .get(&n.taxid)
                .ok_or_else(|| Error::TaxonomyStructure {
                    reason: format!("name '{}' references unknown taxid {}", n.text, n.taxid),
                })?;
            let is_scientific = n.class == "scientific name";
            names.push(TaxonName {
                taxon,
                text: n.text,
                class: n.class,
                is_scientific,
            });
        }

        Ok(Taxonomy {
            taxa,
            names,
            ranks,
            by_taxid,
        })
    }

    pub fn ranks(&self) -> &RankTable {
        &self.ranks
    }

    pub fn taxon(&self, index: usize) -> &Taxon {
        &self.taxa[index]
    }

    pub fn taxon_count(&self) -> usize {
        self.taxa.len()
    }

    pub fn names(&self) -> &[TaxonName] {
        &self.names
    }

    /// O(1) lookup of the arena index for a taxid.
    pub fn index_of_taxid(&self, taxid: i32) -> Result<usize> {
        self.by_taxid
            .get(&taxid)
            .copied()
            .ok_or(Error::UnknownTaxid(taxid))
    }

    /// Walk the parent chain from `index` (inclusive) and return the first
    /// node whose rank equals `rank`, or `None` when the root is passed
    /// without a match. A node is its own ancestor at its own rank.
    pub fn ancestor_at_rank(&self, index: usize, rank: usize) -> Option<usize> {
        let mut cur = index;
        loop {
            let t = &self.taxa[cur];
            if t.rank == rank {
                return Some(cur);
            }
            if t.parent == cur {
                return None;
            }
            cur = t.parent;
        }
    }

    /// True iff some ancestor of `index` (inclusive) has its taxid in
    /// `candidates`. The root is tested like any other node before its
    /// self-loop terminates the walk.
    pub fn is_descendant_of_any(&self, index: usize, candidates: &HashSet<i32>) -> bool {
        let mut cur = index;
        loop {
            let t = &self.taxa[cur];
            if candidates.contains(&t.taxid) {
                return true;
            }
            if t.parent == cur {
                return false;
            }
            cur = t.parent;
        }
    }

    /// The ancestor chain of `index`, root first, `index` last.
    pub fn path_to_root(&self, index: usize) -> Vec<usize> {
        let mut path = Vec::new();
        let mut cur = index;
        loop {
            path.push(cur);
            let parent = self.taxa[cur].parent;
            if parent == cur {
                break;
            }
            cur = parent;
        }
        path.reverse();
        path
    }

    /// Direct children of `index`. Linear scan of the arena; fine for the
    /// interactive listing paths, not used in the amplicon loop.
    pub fn children_of(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.taxa
            .iter()
            .enumerate()
            .filter(move |(i, t)| t.parent == index && *i != index)
            .map(|(i, _)| i)
    }

    /// All descendants of `index` (excluding `index` itself) in depth-first
    /// pre-order, siblings in arena order.
    pub fn subtree_of(&self, index: usize) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack: Vec<usize> = self.children_of(index).collect();
        stack.reverse();
        while let Some(i) = stack.pop() {
            out.push(i);
            let mut kids: Vec<usize> = self.children_of(i).collect();
            kids.reverse();
            stack.extend(kids);
        }
        out
    }

    /// Render the lineage path of a taxon, root first, `;`-separated. Ranked
    /// nodes are prefixed `rank:`; "no rank" nodes show the bare name.
    pub fn format_path(&self, index: usize) -> String {
        let no_rank = self.ranks.index_of(NO_RANK);
        let mut out = String::new();
        for (n, i) in self.path_to_root(index).into_iter().enumerate() {
            if n > 0 {
                out.push(';');
            }
            let t = &self.taxa[i];
            if no_rank != Some(t.rank) {
                out.push_str(self.ranks.label(t.rank));
                out.push(':');
            }
            out.push_str(&t.name);
        }
        out
    }
}
