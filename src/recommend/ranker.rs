//! Candidate ranking by cosine similarity to a preference vector.

use crate::embedding::Embedding;

/// A ranked candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<'a> {
    pub owner_id: &'a str,
    pub score: f32,
}

/// `dot(a, b) / (|a| * |b|)`, or 0 when either norm is 0.
///
/// Accumulates in f64 so large finite components do not overflow.
/// Vectors of different lengths are compared over their common prefix;
/// callers filter on dimension first.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    // orthogonal vectors score +0.0, never -0.0
    if dot == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)) as f32
}

fn l2_norm(v: &[f32]) -> f64 {
    v.iter().map(|x| *x as f64 * *x as f64).sum::<f64>().sqrt()
}

/// Score every candidate with the preference's dimension, best first.
/// Equal scores keep candidate order.
pub fn rank<'a>(preference: &Embedding, candidates: &'a [Embedding]) -> Vec<Scored<'a>> {
    let mut results: Vec<Scored> = candidates
        .iter()
        .filter(|candidate| candidate.dimension() == preference.dimension())
        .map(|candidate| Scored {
            owner_id: &candidate.owner_id,
            score: cosine_similarity(&preference.vector, &candidate.vector),
        })
        .collect();

    // stable: ties stay in input order
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

/// Up to `top_n` candidate ids.
///
/// Without a preference the first `top_n` candidates are returned in the
/// order given. With one, candidates are ranked by similarity and those of a
/// different dimension never appear.
pub fn recommend(
    preference: Option<&Embedding>,
    candidates: &[Embedding],
    top_n: usize,
) -> Vec<String> {
    match preference {
        None => candidates
            .iter()
            .take(top_n)
            .map(|candidate| candidate.owner_id.clone())
            .collect(),
        Some(preference) => rank(preference, candidates)
            .into_iter()
            .take(top_n)
            .map(|scored| scored.owner_id.to_string())
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emb(id: &str, v: &[f32]) -> Embedding {
        Embedding::new(id, v.to_vec())
    }

    #[test]
    fn test_cosine_similarity() {
        let v = [0.3, -1.2, 4.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&v, &[0.0, 0.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
        assert!((cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 3.0]), 0.0);
    }

    #[test]
    fn test_large_components_do_not_overflow() {
        assert!((cosine_similarity(&[1.0, 0.0, 0.0], &[1e20, 0.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!((cosine_similarity(&[0.707, 0.707], &[3e38, 3e38]) - 1.0).abs() < 1e-6);

        let pref = emb("u", &[1.0, 0.0]);
        let candidates = vec![emb("offaxis", &[1.0, 1.0]), emb("aligned", &[1e20, 0.0])];
        assert_eq!(
            recommend(Some(&pref), &candidates, 2),
            vec!["aligned", "offaxis"]
        );
    }

    #[test]
    fn test_fallback_keeps_candidate_order() {
        let candidates = vec![emb("C", &[1.0]), emb("A", &[1.0]), emb("B", &[1.0, 2.0])];

        let first = recommend(None, &candidates, 2);
        assert_eq!(first, vec!["C", "A"]);
        assert_eq!(recommend(None, &candidates, 2), first);
        assert_eq!(recommend(None, &candidates, 10), vec!["C", "A", "B"]);
        assert!(recommend(None, &candidates, 0).is_empty());
    }

    #[test]
    fn test_ranked_order() {
        let pref = emb("u", &[0.2873, 0.9578, 0.0]);
        let candidates = vec![
            emb("A", &[1.0, 0.0, 0.0]),
            emb("B", &[0.0, 1.0, 0.0]),
            emb("C", &[0.0, 0.0, 1.0]),
        ];

        assert_eq!(recommend(Some(&pref), &candidates, 3), vec!["B", "A", "C"]);
        assert_eq!(recommend(Some(&pref), &candidates, 1), vec!["B"]);

        let scored = rank(&pref, &candidates);
        assert!((scored[0].score - 0.9578).abs() < 1e-3);
        assert!((scored[1].score - 0.2873).abs() < 1e-3);
        assert_eq!(scored[2].score, 0.0);
    }

    #[test]
    fn test_mismatched_dimension_never_returned() {
        let pref = emb("u", &[1.0, 0.0]);
        let candidates = vec![
            emb("short", &[1.0]),
            emb("A", &[0.0, 1.0]),
            emb("long", &[1.0, 0.0, 0.0]),
        ];
        assert_eq!(recommend(Some(&pref), &candidates, 10), vec!["A"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let pref = emb("u", &[1.0, 1.0]);
        let candidates = vec![
            emb("Z", &[0.0, 1.0]),
            emb("M", &[2.0, 2.0]),
            emb("A", &[1.0, 0.0]),
            emb("Q", &[1.0, 0.0]),
        ];
        assert_eq!(
            recommend(Some(&pref), &candidates, 10),
            vec!["M", "Z", "A", "Q"]
        );
    }
}
