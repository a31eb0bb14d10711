//! Category grouping

use std::collections::BTreeMap;

use crate::places::{CategoryId, Place};

/// Places keyed by their own category, in input order within each group
pub type PlacesByCategory = BTreeMap<CategoryId, Vec<Place>>;

/// Group places by category id. Categories without places never appear;
/// places of categories missing from the category index are kept.
pub fn group_by_category(places: &[Place]) -> PlacesByCategory {
    let mut groups = PlacesByCategory::new();
    for place in places {
        groups.entry(place.category).or_default().push(place.clone());
    }
    groups
}
