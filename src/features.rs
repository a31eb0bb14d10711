//! Cluster feature builder
//!
//! Turns grouped places into one GeoJSON point collection per category.
//! The output feeds the engine's clustering, so it is memoized on the
//! identity of its inputs and only rebuilt when they change.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, JsonValue, Value};
use serde_json::json;
use std::rc::Rc;

use crate::grouping::PlacesByCategory;
use crate::memo::Memo;
use crate::places::{CategoryId, CategoryIndex, Place, PlaceId};

/// Point collection and display color of one category
#[derive(Debug, Clone)]
pub struct CategoryCluster {
    pub category: CategoryId,
    pub color: String,
    pub collection: Rc<FeatureCollection>,
}

/// Point feature at (longitude, latitude) tagged with `{id, category}`
pub fn place_feature(place: &Place, category: CategoryId) -> Feature {
    let mut properties = JsonObject::new();
    properties.insert("id".to_string(), json!(place.id));
    properties.insert("category".to_string(), json!(category));

    Feature {
        bbox: None,
        geometry: Some(Geometry::new(Value::Point(vec![place.longitude, place.latitude]))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// One `CategoryCluster` per group, in category order
pub fn build_clusters(
    groups: &PlacesByCategory,
    categories: &CategoryIndex,
    default_color: &str,
) -> Vec<CategoryCluster> {
    groups
        .iter()
        .map(|(&category, places)| {
            let features = places.iter().map(|p| place_feature(p, category)).collect();
            CategoryCluster {
                category,
                color: categories.color_or(category, default_color).to_string(),
                collection: Rc::new(FeatureCollection {
                    bbox: None,
                    features,
                    foreign_members: None,
                }),
            }
        })
        .collect()
}

/// Memoized `build_clusters`
pub struct FeatureBuilder {
    default_color: String,
    memo: Memo<(Rc<PlacesByCategory>, Rc<CategoryIndex>), Vec<CategoryCluster>>,
}

impl FeatureBuilder {
    pub fn new(default_color: impl Into<String>) -> Self {
        Self {
            default_color: default_color.into(),
            memo: Memo::new(),
        }
    }

    pub fn build(
        &mut self,
        groups: &Rc<PlacesByCategory>,
        categories: &Rc<CategoryIndex>,
    ) -> Rc<Vec<CategoryCluster>> {
        let default_color = &self.default_color;
        self.memo.get((groups.clone(), categories.clone()), |(groups, categories)| {
            let clusters = build_clusters(groups, categories, default_color);
            tracing::debug!("Rebuilt point features for {} categories", clusters.len());
            clusters
        })
    }
}

/// Place id of a rendered marker feature (string or numeric property)
pub fn feature_place_id(feature: &Feature) -> Option<PlaceId> {
    match feature.property("id")? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Engine-assigned id of a rendered cluster feature
pub fn feature_cluster_id(feature: &Feature) -> Option<u64> {
    feature.property("cluster_id")?.as_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::group_by_category;
    use crate::places::Category;

    fn place(id: &str, category: CategoryId, lat: f64, lon: f64) -> Place {
        Place {
            id: id.to_string(),
            category,
            latitude: lat,
            longitude: lon,
            name: None,
        }
    }

    fn categories() -> CategoryIndex {
        CategoryIndex::new(vec![Category {
            id: 1,
            name: None,
            color: Some("#0000ff".into()),
            icon: None,
        }])
    }

    #[test]
    fn test_point_geometry_is_lon_lat() {
        let feature = place_feature(&place("p1", 2, 40.0, -111.0), 2);
        match feature.geometry.as_ref().map(|g| &g.value) {
            Some(Value::Point(coords)) => assert_eq!(coords, &vec![-111.0, 40.0]),
            other => panic!("unexpected geometry {:?}", other),
        }
        assert_eq!(feature.property("id"), Some(&json!("p1")));
        assert_eq!(feature.property("category"), Some(&json!(2)));
    }

    #[test]
    fn test_color_lookup_and_fallback() {
        let groups = group_by_category(&[place("a", 1, 0.0, 0.0), place("b", 9, 1.0, 1.0)]);
        let clusters = build_clusters(&groups, &categories(), "red");

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].color, "#0000ff");
        assert_eq!(clusters[1].category, 9);
        assert_eq!(clusters[1].color, "red");
        assert_eq!(clusters[1].collection.features.len(), 1);
    }

    #[test]
    fn test_builder_is_referentially_stable() {
        let groups = Rc::new(group_by_category(&[place("a", 1, 0.0, 0.0)]));
        let cats = Rc::new(categories());
        let mut builder = FeatureBuilder::new("red");

        let first = builder.build(&groups, &cats);
        let second = builder.build(&groups, &cats);
        assert!(Rc::ptr_eq(&first, &second));

        let new_cats = Rc::new(categories());
        let third = builder.build(&groups, &new_cats);
        assert!(!Rc::ptr_eq(&first, &third));
    }

    #[test]
    fn test_property_extraction() {
        let marker = place_feature(&place("p7", 1, 0.0, 0.0), 1);
        assert_eq!(feature_place_id(&marker), Some("p7".to_string()));
        assert_eq!(feature_cluster_id(&marker), None);

        let mut properties = JsonObject::new();
        properties.insert("cluster_id".to_string(), json!(77));
        properties.insert("id".to_string(), json!(12));
        let cluster = Feature {
            bbox: None,
            geometry: None,
            id: None,
            properties: Some(properties),
            foreign_members: None,
        };
        assert_eq!(feature_cluster_id(&cluster), Some(77));
        assert_eq!(feature_place_id(&cluster), Some("12".to_string()));
    }
}
