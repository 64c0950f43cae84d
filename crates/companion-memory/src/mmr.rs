//! Maximal Marginal Relevance ranker (C4). Pure functions implementing the
//! standard five-step MMR selection procedure, with a fallback to a plain
//! prefix slice when no candidate carries an embedding.

/// Anything the ranker can score: an id for bookkeeping, an optional
/// embedding (candidates without one are skipped), and an importance score
/// used only by the importance-weighted variant.
pub trait MmrItem {
    fn id(&self) -> &str;
    fn embedding(&self) -> Option<&[f32]>;
    fn importance(&self) -> f32;
}

/// Cosine similarity; 0.0 for empty, mismatched-length, or zero-norm
/// vectors rather than a division-by-zero or panic.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// `mmr_select_memories`: relevance only, no importance boost.
pub fn mmr_select<T: MmrItem + Clone>(query: &[f32], candidates: &[T], k: usize, lambda: f32) -> Vec<T> {
    rank(query, candidates, k, lambda, 0.0)
}

/// `mmr_rank_with_importance`: adds `importance(c) * importance_weight` to
/// the relevance term, both for the seed pick and every later iteration.
pub fn mmr_rank_with_importance<T: MmrItem + Clone>(
    query: &[f32],
    candidates: &[T],
    k: usize,
    lambda: f32,
    importance_weight: f32,
) -> Vec<T> {
    rank(query, candidates, k, lambda, importance_weight)
}

/// Average pairwise similarity among a selected set, inverted so that
/// higher means more diverse (`calculate_memory_diversity`).
pub fn memory_diversity<T: MmrItem>(memories: &[T]) -> f32 {
    if memories.len() < 2 {
        return 0.0;
    }
    let mut similarities = Vec::new();
    for i in 0..memories.len() {
        for j in (i + 1)..memories.len() {
            if let (Some(a), Some(b)) = (memories[i].embedding(), memories[j].embedding()) {
                similarities.push(cosine_similarity(a, b));
            }
        }
    }
    if similarities.is_empty() {
        return 0.0;
    }
    1.0 - similarities.iter().sum::<f32>() / similarities.len() as f32
}

fn rank<T: MmrItem + Clone>(query: &[f32], candidates: &[T], k: usize, lambda: f32, importance_weight: f32) -> Vec<T> {
    if candidates.is_empty() || k == 0 {
        return Vec::new();
    }

    let similarities: Vec<Option<f32>> =
        candidates.iter().map(|c| c.embedding().map(|embedding| cosine_similarity(query, embedding))).collect();

    if similarities.iter().all(Option::is_none) {
        return candidates.iter().take(k).cloned().collect();
    }

    let score = |i: usize, similarities: &[Option<f32>]| similarities[i].unwrap() + candidates[i].importance() * importance_weight;

    let mut remaining: Vec<usize> = (0..candidates.len()).filter(|&i| similarities[i].is_some()).collect();
    if remaining.is_empty() {
        return Vec::new();
    }

    let seed_pos = remaining
        .iter()
        .enumerate()
        .max_by(|(_, &a), (_, &b)| score(a, &similarities).partial_cmp(&score(b, &similarities)).unwrap())
        .map(|(pos, _)| pos)
        .expect("remaining is non-empty");
    let mut selected = vec![remaining.remove(seed_pos)];

    let iterations = k.saturating_sub(1).min(remaining.len());
    for _ in 0..iterations {
        if remaining.is_empty() {
            break;
        }
        let mut best: Option<(usize, f32)> = None;
        for (pos, &candidate_idx) in remaining.iter().enumerate() {
            let relevance = score(candidate_idx, &similarities);
            let max_sim_to_selected = selected
                .iter()
                .filter_map(|&selected_idx| {
                    candidates[candidate_idx].embedding().zip(candidates[selected_idx].embedding())
                })
                .map(|(a, b)| cosine_similarity(a, b))
                .fold(0.0f32, f32::max);
            let mmr_score = lambda * relevance - (1.0 - lambda) * max_sim_to_selected;
            if best.map(|(_, best_score)| mmr_score > best_score).unwrap_or(true) {
                best = Some((pos, mmr_score));
            }
        }
        if let Some((pos, _)) = best {
            selected.push(remaining.remove(pos));
        }
    }

    selected.into_iter().map(|i| candidates[i].clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: String,
        embedding: Option<Vec<f32>>,
        importance: f32,
    }

    impl MmrItem for Item {
        fn id(&self) -> &str {
            &self.id
        }
        fn embedding(&self) -> Option<&[f32]> {
            self.embedding.as_deref()
        }
        fn importance(&self) -> f32 {
            self.importance
        }
    }

    fn item(id: &str, embedding: Vec<f32>, importance: f32) -> Item {
        Item { id: id.to_string(), embedding: Some(embedding), importance }
    }

    #[test]
    fn cosine_similarity_zero_for_mismatched_or_empty() {
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn cosine_similarity_identical_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]);
        assert!((sim - 1.0).abs() < 1e-5);
    }

    #[test]
    fn no_embeddings_falls_back_to_prefix_slice() {
        let candidates = vec![
            Item { id: "a".into(), embedding: None, importance: 0.0 },
            Item { id: "b".into(), embedding: None, importance: 0.0 },
            Item { id: "c".into(), embedding: None, importance: 0.0 },
        ];
        let selected = mmr_select(&[1.0, 0.0], &candidates, 2, 0.7);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].id, "a");
        assert_eq!(selected[1].id, "b");
    }

    #[test]
    fn seeds_with_highest_similarity_then_diversifies() {
        let candidates = vec![
            item("close", vec![0.9, 0.1], 0.0),
            item("near_duplicate", vec![0.89, 0.11], 0.0),
            item("diverse", vec![0.1, 0.9], 0.0),
        ];
        let selected = mmr_select(&[1.0, 0.0], &candidates, 2, 0.5);
        assert_eq!(selected[0].id, "close");
        // The near-duplicate should lose to the diverse candidate once the
        // diversity penalty kicks in.
        assert_eq!(selected[1].id, "diverse");
    }

    #[test]
    fn importance_weighting_can_change_the_seed() {
        let candidates = vec![item("relevant", vec![1.0, 0.0], 0.0), item("important", vec![0.5, 0.5], 1.0)];
        let plain = mmr_select(&[1.0, 0.0], &candidates, 1, 0.9);
        assert_eq!(plain[0].id, "relevant");

        let weighted = mmr_rank_with_importance(&[1.0, 0.0], &candidates, 1, 0.9, 1.0);
        assert_eq!(weighted[0].id, "important");
    }

    #[test]
    fn diversity_of_identical_memories_is_zero() {
        let memories = vec![item("a", vec![1.0, 0.0], 0.0), item("b", vec![1.0, 0.0], 0.0)];
        assert!((memory_diversity(&memories) - 0.0).abs() < 1e-5);
    }

    #[test]
    fn diversity_of_orthogonal_memories_is_high() {
        let memories = vec![item("a", vec![1.0, 0.0], 0.0), item("b", vec![0.0, 1.0], 0.0)];
        assert!((memory_diversity(&memories) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn k_zero_returns_nothing() {
        let candidates = vec![item("a", vec![1.0], 0.0)];
        assert!(mmr_select(&[1.0], &candidates, 0, 0.7).is_empty());
    }
}
