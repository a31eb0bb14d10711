//! Per-category layer registry and layer styles
//!
//! Every category gets its own clustered source and six layers. Their ids
//! are derived once per category and shared from then on, so hit-testing,
//! icon registration and source updates all agree on the same names.

use geojson::FeatureCollection;
use std::collections::HashMap;
use std::rc::Rc;

use crate::places::CategoryId;

/// Base circle radius of an unclustered marker, in pixels
pub const MARKER_RADIUS: f64 = 10.0;

/// Base circle radius of a cluster, in pixels
pub const CLUSTER_RADIUS: f64 = 16.0;

/// Identifiers of everything registered with the engine for one category
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerIds {
    pub category: CategoryId,
    pub source: String,
    pub cluster: String,
    pub cluster_below: String,
    pub cluster_count: String,
    pub cluster_count_badge: String,
    pub marker: String,
    pub icon: String,
    pub icon_key: String,
}

impl LayerIds {
    pub fn new(category: CategoryId, icon_key_prefix: &str) -> Self {
        Self {
            category,
            source: format!("source-{}", category),
            cluster: format!("cluster-{}", category),
            cluster_below: format!("cluster-below-{}", category),
            cluster_count: format!("cluster-count-{}", category),
            cluster_count_badge: format!("cluster-count-badge-{}", category),
            marker: format!("marker-{}", category),
            icon: format!("icon-{}", category),
            icon_key: format!("{}{}", icon_key_prefix, category),
        }
    }
}

/// Caches `LayerIds` per category
pub struct LayerRegistry {
    icon_key_prefix: String,
    ids: HashMap<CategoryId, Rc<LayerIds>>,
}

impl LayerRegistry {
    pub fn new(icon_key_prefix: impl Into<String>) -> Self {
        Self {
            icon_key_prefix: icon_key_prefix.into(),
            ids: HashMap::new(),
        }
    }

    pub fn ids(&mut self, category: CategoryId) -> Rc<LayerIds> {
        let prefix = &self.icon_key_prefix;
        self.ids
            .entry(category)
            .or_insert_with(|| Rc::new(LayerIds::new(category, prefix)))
            .clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Circle,
    Symbol,
}

/// Which rendered points a layer draws
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerFilter {
    Clustered,
    Unclustered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub id: String,
    pub kind: LayerKind,
    pub filter: LayerFilter,
    pub color: Option<String>,
    /// Circle radius, or icon half-size for symbols
    pub radius: f64,
    pub icon_image: Option<String>,
    pub text_field: Option<String>,
}

/// The layers drawn for one category source, bottom to top
pub fn category_layers(ids: &LayerIds, marker_size: f64, color: &str) -> Vec<LayerSpec> {
    let marker_radius = MARKER_RADIUS * marker_size;
    let cluster_radius = CLUSTER_RADIUS * marker_size;

    vec![
        LayerSpec {
            id: ids.marker.clone(),
            kind: LayerKind::Circle,
            filter: LayerFilter::Unclustered,
            color: Some(color.to_string()),
            radius: marker_radius,
            icon_image: None,
            text_field: None,
        },
        LayerSpec {
            id: ids.cluster_below.clone(),
            kind: LayerKind::Circle,
            filter: LayerFilter::Clustered,
            color: Some(color.to_string()),
            radius: cluster_radius + 4.0 * marker_size,
            icon_image: None,
            text_field: None,
        },
        LayerSpec {
            id: ids.cluster.clone(),
            kind: LayerKind::Circle,
            filter: LayerFilter::Clustered,
            color: Some(color.to_string()),
            radius: cluster_radius,
            icon_image: None,
            text_field: None,
        },
        LayerSpec {
            id: ids.icon.clone(),
            kind: LayerKind::Symbol,
            filter: LayerFilter::Unclustered,
            color: None,
            radius: marker_radius * 0.7,
            icon_image: Some(ids.icon_key.clone()),
            text_field: None,
        },
        LayerSpec {
            id: ids.cluster_count_badge.clone(),
            kind: LayerKind::Circle,
            filter: LayerFilter::Clustered,
            color: Some("white".to_string()),
            radius: cluster_radius * 0.5,
            icon_image: None,
            text_field: None,
        },
        LayerSpec {
            id: ids.cluster_count.clone(),
            kind: LayerKind::Symbol,
            filter: LayerFilter::Clustered,
            color: None,
            radius: cluster_radius * 0.5,
            icon_image: None,
            text_field: Some("point_count".to_string()),
        },
    ]
}

/// A clustered GeoJSON source with its layers
#[derive(Debug, Clone)]
pub struct ClusterSource {
    pub id: String,
    pub data: Rc<FeatureCollection>,
    /// Merge radius in pixels
    pub cluster_radius: f64,
    /// Highest zoom at which points are still clustered
    pub cluster_max_zoom: f64,
    pub layers: Vec<LayerSpec>,
}

impl ClusterSource {
    pub fn layer(&self, id: &str) -> Option<&LayerSpec> {
        self.layers.iter().find(|l| l.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_convention() {
        let ids = LayerIds::new(2, "category-thumb-");
        assert_eq!(ids.source, "source-2");
        assert_eq!(ids.cluster, "cluster-2");
        assert_eq!(ids.marker, "marker-2");
        assert_eq!(ids.icon_key, "category-thumb-2");
    }

    #[test]
    fn test_registry_reuses_ids() {
        let mut registry = LayerRegistry::new("category-thumb-");
        let first = registry.ids(4);
        let again = registry.ids(4);
        let other = registry.ids(5);
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(other.cluster, "cluster-5");
    }

    #[test]
    fn test_category_layers() {
        let ids = LayerIds::new(3, "thumb-");
        let layers = category_layers(&ids, 2.0, "#abcdef");

        let order: Vec<_> = layers.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(
            order,
            vec![
                "marker-3",
                "cluster-below-3",
                "cluster-3",
                "icon-3",
                "cluster-count-badge-3",
                "cluster-count-3",
            ]
        );

        let marker = &layers[0];
        assert_eq!(marker.filter, LayerFilter::Unclustered);
        assert_eq!(marker.radius, MARKER_RADIUS * 2.0);
        assert_eq!(marker.color.as_deref(), Some("#abcdef"));
        assert_eq!(layers[2].filter, LayerFilter::Clustered);
        assert_eq!(layers[3].icon_image.as_deref(), Some("thumb-3"));
    }
}
