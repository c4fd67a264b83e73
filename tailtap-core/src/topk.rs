use std::collections::HashMap;

/// Exact top-`k` ranking by count, ties broken by ascending lexicographic
/// byte order of the key. Deterministic regardless of hash map iteration
/// order.
pub fn top_k(counts: &HashMap<Vec<u8>, u64>, k: usize) -> Vec<(Vec<u8>, u64)> {
    let mut items: Vec<(&Vec<u8>, &u64)> = counts.iter().collect();
    items.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    items
        .into_iter()
        .take(k)
        .map(|(key, count)| (key.clone(), *count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_count_descending() {
        let mut counts = HashMap::new();
        counts.insert(b"a".to_vec(), 3u64);
        counts.insert(b"b".to_vec(), 5u64);
        counts.insert(b"c".to_vec(), 1u64);
        let ranked = top_k(&counts, 2);
        assert_eq!(ranked, vec![(b"b".to_vec(), 5), (b"a".to_vec(), 3)]);
    }

    #[test]
    fn ties_break_lexicographically_ascending() {
        let mut counts = HashMap::new();
        counts.insert(b"zeta".to_vec(), 2u64);
        counts.insert(b"alpha".to_vec(), 2u64);
        let ranked = top_k(&counts, 2);
        assert_eq!(ranked, vec![(b"alpha".to_vec(), 2), (b"zeta".to_vec(), 2)]);
    }

    #[test]
    fn k_larger_than_map_returns_everything() {
        let mut counts = HashMap::new();
        counts.insert(b"only".to_vec(), 1u64);
        assert_eq!(top_k(&counts, 10).len(), 1);
    }
}
