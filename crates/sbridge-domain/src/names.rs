use std::cmp::Ordering;

/// Ordering key for node names. Numeric keys sort before plain names so
/// `htc-2` comes before `htc-10` instead of lexicographically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Index(u64),
    Name(String),
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Index(a), SortKey::Index(b)) => a.cmp(b),
            (SortKey::Name(a), SortKey::Name(b)) => a.cmp(b),
            (SortKey::Index(_), SortKey::Name(_)) => Ordering::Less,
            (SortKey::Name(_), SortKey::Index(_)) => Ordering::Greater,
        }
    }
}

/// Key for names without a placement-group segment: the trailing integer.
pub fn htc_sort_key(name: &str) -> SortKey {
    match name.rsplit('-').next().and_then(|s| s.parse::<u64>().ok()) {
        Some(index) => SortKey::Index(index),
        None => SortKey::Name(name.to_string()),
    }
}

/// Key for `{prefix}{array}-pg{k}-{i}` names: placement group first,
/// then node index.
pub fn hpc_sort_key(name: &str) -> SortKey {
    let mut parts = name.rsplit('-');
    let index = parts.next().and_then(|s| s.parse::<u64>().ok());
    let pg = parts
        .next()
        .and_then(|s| s.strip_prefix("pg"))
        .and_then(|s| s.parse::<u64>().ok());
    match (pg, index) {
        (Some(pg), Some(index)) => SortKey::Index(pg * 100_000 + index),
        _ => SortKey::Name(name.to_string()),
    }
}

/// Sort names in place with the key appropriate to the partition kind.
pub fn sort_nodes(names: &mut [String], is_hpc: bool) {
    if is_hpc {
        names.sort_by_key(|n| hpc_sort_key(n));
    } else {
        names.sort_by_key(|n| htc_sort_key(n));
    }
}
