// Weighted reciprocal rank fusion

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

/// Rank offset from Cormack et al. (SIGIR 2009).
pub const RRF_C: f64 = 60.0;

/// One ranked source list and its weight.
#[derive(Debug, Clone)]
pub struct RankedList<T> {
    pub weight: f64,
    /// Best first.
    pub items: Vec<T>,
}

impl<T> RankedList<T> {
    pub fn new(weight: f64, items: Vec<T>) -> Self {
        Self { weight, items }
    }
}

/// Fuse ranked lists: `score(d) = sum over lists of weight / (c + rank)`,
/// rank 1-based, zero for lists that lack `d`.
///
/// Returns at most `k` distinct items by descending score. Equal scores keep
/// the order in which items first appear scanning the lists in order.
pub fn weighted_rank_fusion<T: Clone + Eq + Hash>(
    lists: &[RankedList<T>],
    c: f64,
    k: usize,
) -> Vec<(T, f64)> {
    let mut scores: HashMap<T, (f64, usize)> = HashMap::new();
    let mut first_seen = 0usize;

    for list in lists {
        for (rank, item) in list.items.iter().enumerate() {
            let contribution = list.weight / (c + (rank + 1) as f64);
            let entry = scores.entry(item.clone()).or_insert_with(|| {
                first_seen += 1;
                (0.0, first_seen)
            });
            entry.0 += contribution;
        }
    }

    let mut fused: Vec<(T, f64, usize)> = scores
        .into_iter()
        .map(|(item, (score, order))| (item, score, order))
        .collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.2.cmp(&b.2))
    });
    fused.truncate(k);

    fused.into_iter().map(|(item, score, _)| (item, score)).collect()
}
