use std::fmt;

/// Position of a rank within a [`RankSchema`].
///
/// Ranks are totally ordered from most general (index 0, e.g. domain) to
/// most specific (e.g. species). `a < b` reads "rank `a` is above rank `b`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rank(usize);

impl Rank {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// One level of the rank schema: its machine prefix and human label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankDef {
    pub prefix: String,
    pub label: String,
}

/// Ordered, fixed set of taxonomic ranks.
///
/// Constructed once at startup and passed by reference to every component
/// that needs to interpret taxon strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankSchema {
    ranks: Vec<RankDef>,
}

impl Default for RankSchema {
    fn default() -> Self {
        Self::gtdb()
    }
}

impl RankSchema {
    /// Create a schema from `(prefix, label)` pairs ordered general to specific.
    ///
    /// # Panics
    ///
    /// Panics if `ranks` is empty.
    #[must_use]
    pub fn new(ranks: &[(&str, &str)]) -> Self {
        assert!(!ranks.is_empty(), "rank schema must contain at least one rank");
        Self {
            ranks: ranks
                .iter()
                .map(|(prefix, label)| RankDef {
                    prefix: (*prefix).to_string(),
                    label: (*label).to_string(),
                })
                .collect(),
        }
    }

    /// The seven-rank schema used by GTDB-style taxonomy strings.
    #[must_use]
    pub fn gtdb() -> Self {
        Self::new(&[
            ("d__", "domain"),
            ("p__", "phylum"),
            ("c__", "class"),
            ("o__", "order"),
            ("f__", "family"),
            ("g__", "genus"),
            ("s__", "species"),
        ])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// All ranks, most general first.
    pub fn ranks(&self) -> impl DoubleEndedIterator<Item = Rank> + '_ {
        (0..self.ranks.len()).map(Rank)
    }

    #[must_use]
    pub fn rank(&self, index: usize) -> Option<Rank> {
        (index < self.ranks.len()).then_some(Rank(index))
    }

    #[must_use]
    pub fn prefix(&self, rank: Rank) -> &str {
        &self.ranks[rank.0].prefix
    }

    #[must_use]
    pub fn label(&self, rank: Rank) -> &str {
        &self.ranks[rank.0].label
    }

    #[must_use]
    pub fn species(&self) -> Rank {
        Rank(self.ranks.len() - 1)
    }

    #[must_use]
    pub fn next(&self, rank: Rank) -> Option<Rank> {
        self.rank(rank.0 + 1)
    }

    #[must_use]
    pub fn previous(&self, rank: Rank) -> Option<Rank> {
        rank.0.checked_sub(1).map(Rank)
    }

    /// Look up a rank by its exact prefix (e.g. `"p__"`).
    #[must_use]
    pub fn rank_of_prefix(&self, prefix: &str) -> Option<Rank> {
        self.ranks
            .iter()
            .position(|r| r.prefix == prefix)
            .map(Rank)
    }

    /// Rank of a single rank-qualified taxon (e.g. `"g__Escherichia"`).
    #[must_use]
    pub fn rank_of_taxon(&self, taxon: &str) -> Option<Rank> {
        let taxon = taxon.trim();
        self.ranks
            .iter()
            .position(|r| taxon.starts_with(&r.prefix))
            .map(Rank)
    }

    /// Rank of the last (most specific) taxon in a `;`-separated taxon string.
    #[must_use]
    pub fn lowest_rank(&self, taxon_string: &str) -> Option<Rank> {
        split_taxa(taxon_string)
            .last()
            .and_then(|t| self.rank_of_taxon(t))
    }

    /// True for a bare prefix such as `"g__"`, i.e. an unnamed rank slot.
    #[must_use]
    pub fn is_placeholder(&self, taxon: &str) -> bool {
        let taxon = taxon.trim();
        taxon.is_empty() || self.ranks.iter().any(|r| r.prefix == taxon)
    }

    /// Strip the rank prefix from a taxon, returning the bare name.
    #[must_use]
    pub fn strip_prefix<'t>(&self, taxon: &'t str) -> &'t str {
        let taxon = taxon.trim();
        self.rank_of_taxon(taxon)
            .map_or(taxon, |r| &taxon[self.prefix(r).len()..])
    }
}

impl fmt::Display for RankDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Split a composite taxon string on `;`, trimming and dropping empty pieces.
pub fn split_taxa(taxon_string: &str) -> impl DoubleEndedIterator<Item = &str> {
    taxon_string
        .split(';')
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        let schema = RankSchema::gtdb();
        let phylum = schema.rank_of_prefix("p__").unwrap();
        let genus = schema.rank_of_prefix("g__").unwrap();
        assert!(phylum < genus);
        assert_eq!(schema.label(genus), "genus");
        assert_eq!(schema.species(), schema.rank_of_prefix("s__").unwrap());
        assert_eq!(schema.next(genus), Some(schema.species()));
        assert_eq!(schema.next(schema.species()), None);
        assert_eq!(schema.previous(schema.rank(0).unwrap()), None);
    }

    #[test]
    fn test_lowest_rank() {
        let schema = RankSchema::gtdb();
        assert_eq!(
            schema.lowest_rank("p__Firmicutes; c__Bacilli"),
            schema.rank_of_prefix("c__")
        );
        assert_eq!(schema.lowest_rank("g__Escherichia"), schema.rank_of_prefix("g__"));
        assert_eq!(schema.lowest_rank(""), None);
        assert_eq!(schema.lowest_rank("unranked"), None);
    }

    #[test]
    fn test_placeholders() {
        let schema = RankSchema::gtdb();
        assert!(schema.is_placeholder("g__"));
        assert!(schema.is_placeholder(" "));
        assert!(!schema.is_placeholder("g__Escherichia"));
        assert_eq!(schema.strip_prefix("g__Escherichia"), "Escherichia");
        assert_eq!(schema.strip_prefix("Escherichia"), "Escherichia");
        assert_eq!(schema.strip_prefix("  g__Escherichia "), "Escherichia");
        assert_eq!(schema.strip_prefix(" s__Escherichia coli"), "Escherichia coli");
    }
}
