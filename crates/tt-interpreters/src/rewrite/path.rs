use rustc_hash::FxHashMap;
use tt_core::{Dim, DimSet};

fn size_of(dims: &DimSet, sizes: &FxHashMap<Dim, u64>) -> i128 {
    dims.iter()
        .map(|dim| i128::from(sizes.get(dim).copied().unwrap_or(1)))
        .product()
}

/// Greedy pairwise contraction order.
///
/// At each step the pair `(a, b)` with the lowest
/// `size(result) - size(a) - size(b)` is combined, where the result keeps
/// only dims that are in `keep` or still mentioned by another input. Ties go
/// to the lexicographically smallest pair. The combined input replaces `a`
/// and `b` is removed, so every returned pair indexes the list as it stood
/// at that step and satisfies `a < b`.
#[must_use]
pub fn greedy_path(
    inputs: &[DimSet],
    keep: &DimSet,
    sizes: &FxHashMap<Dim, u64>,
) -> Vec<(usize, usize)> {
    let mut remaining: Vec<DimSet> = inputs.to_vec();
    let mut path = Vec::with_capacity(inputs.len().saturating_sub(1));
    while remaining.len() > 1 {
        let mut best: Option<(i128, usize, usize, DimSet)> = None;
        for a in 0..remaining.len() {
            for b in a + 1..remaining.len() {
                let result: DimSet = remaining[a]
                    .union(&remaining[b])
                    .filter(|dim| {
                        keep.contains(*dim)
                            || remaining
                                .iter()
                                .enumerate()
                                .any(|(k, other)| k != a && k != b && other.contains(*dim))
                    })
                    .cloned()
                    .collect();
                let cost = size_of(&result, sizes)
                    - size_of(&remaining[a], sizes)
                    - size_of(&remaining[b], sizes);
                if best.as_ref().is_none_or(|(best_cost, ..)| cost < *best_cost) {
                    best = Some((cost, a, b, result));
                }
            }
        }
        let Some((_, a, b, result)) = best else {
            break;
        };
        remaining.remove(b);
        remaining[a] = result;
        path.push((a, b));
    }
    path
}
