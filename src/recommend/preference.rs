//! Collapses a weight map into a single normalized preference vector.

use super::aggregator::WeightMap;
use crate::embedding::Embedding;

/// Weighted mean of the embeddings named in `weights`, L2-normalized.
///
/// The first weighted entity (in map order) that has an embedding fixes the
/// dimension; embeddings of any other dimension are skipped. Returns `None`
/// when nothing contributes, meaning there is no preference to rank by.
pub fn compute(
    owner_id: &str,
    weights: &WeightMap,
    lookup: impl Fn(&str) -> Option<Embedding>,
) -> Option<Embedding> {
    let mut sum: Vec<f64> = Vec::new();
    let mut dimension = None;
    let mut total_weight = 0.0;

    for (entity_id, &weight) in weights {
        let Some(embedding) = lookup(entity_id) else {
            continue;
        };

        let expected = *dimension.get_or_insert_with(|| {
            sum = vec![0.0; embedding.dimension()];
            embedding.dimension()
        });

        if embedding.dimension() != expected {
            log::warn!(
                "skipping {entity_id} in preference for {owner_id}: dimension {} (expected {expected})",
                embedding.dimension()
            );
            continue;
        }

        for (acc, value) in sum.iter_mut().zip(&embedding.vector) {
            *acc += *value as f64 * weight;
        }
        total_weight += weight;
    }

    if dimension.is_none() || total_weight == 0.0 {
        return None;
    }

    for acc in sum.iter_mut() {
        *acc /= total_weight;
    }

    let norm = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm > 0.0 {
        for acc in sum.iter_mut() {
            *acc /= norm;
        }
    }

    Some(Embedding::new(
        owner_id,
        sum.into_iter().map(|x| x as f32).collect(),
    ))
}
