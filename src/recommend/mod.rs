//! User preference inference and candidate ranking.
//!
//! signals -> [`aggregator::build_weight_map`] -> [`preference::compute`]
//! -> [`ranker::recommend`]

pub mod aggregator;
pub mod preference;
pub mod ranker;
pub mod summary;

pub use aggregator::{build_weight_map, WeightMap};
pub use summary::PreferenceSummary;
