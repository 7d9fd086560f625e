//! Folds a user's interest events and likes into a weight map.

use std::collections::BTreeMap;

use crate::signals::{InterestEvent, LikeFlag};

/// Weight of a detail view with no dwell time.
pub const VIEW_BASE_WEIGHT: f64 = 0.1;

pub const DWELL_WEIGHT_PER_SECOND: f64 = 0.02;

/// Cap on a single view event. Multiple views on one entity still add up.
pub const VIEW_WEIGHT_CAP: f64 = 0.3;

pub const LIKE_WEIGHT: f64 = 1.0;

/// `entity id -> weight`, iterated in entity id order.
pub type WeightMap = BTreeMap<String, f64>;

pub fn view_weight(dwell_seconds: u32) -> f64 {
    (VIEW_BASE_WEIGHT + dwell_seconds as f64 * DWELL_WEIGHT_PER_SECOND).min(VIEW_WEIGHT_CAP)
}

/// Build the weight map from the current signal state.
///
/// Only `liked == true` flags contribute. Per-entity contributions are summed
/// in a fixed order so the result does not depend on event log order.
pub fn build_weight_map(events: &[InterestEvent], likes: &[LikeFlag]) -> WeightMap {
    let mut contributions: BTreeMap<&str, Vec<f64>> = BTreeMap::new();

    for event in events {
        contributions
            .entry(event.entity_id.as_str())
            .or_default()
            .push(view_weight(event.dwell_seconds));
    }

    for flag in likes.iter().filter(|flag| flag.liked) {
        contributions
            .entry(flag.entity_id.as_str())
            .or_default()
            .push(LIKE_WEIGHT);
    }

    contributions
        .into_iter()
        .map(|(entity_id, mut weights)| {
            weights.sort_by(f64::total_cmp);
            (entity_id.to_string(), weights.into_iter().sum())
        })
        .collect()
}
