//! Place and category data
//!
//! Places and categories are loaded once from a dataset file and never
//! mutated afterwards. Lookups are served by `PlaceIndex` and `CategoryIndex`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub type PlaceId = String;
pub type CategoryId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub id: PlaceId,
    pub category: CategoryId,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    /// Marker icon URL
    #[serde(default, alias = "icon_medium")]
    pub icon: Option<String>,
}

/// Dataset file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub categories: Vec<Category>,
    #[serde(default)]
    pub places: Vec<Place>,
}

impl Dataset {
    /// Load from YAML, or JSON when the extension says so
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let dataset: Dataset = if is_json {
            serde_json::from_str(&content)?
        } else {
            serde_yaml::from_str(&content)?
        };
        tracing::debug!(
            "Dataset {:?}: {} categories, {} places",
            path,
            dataset.categories.len(),
            dataset.places.len()
        );
        Ok(dataset)
    }
}

/// Place lookup by id
#[derive(Debug, Default)]
pub struct PlaceIndex {
    places: Vec<Place>,
    by_id: HashMap<PlaceId, usize>,
}

impl PlaceIndex {
    pub fn new(places: Vec<Place>) -> Self {
        let mut by_id = HashMap::with_capacity(places.len());
        for (i, place) in places.iter().enumerate() {
            if by_id.insert(place.id.clone(), i).is_some() {
                tracing::warn!("Duplicate place id '{}', keeping the last one", place.id);
            }
        }
        Self { places, by_id }
    }

    pub fn get(&self, id: &str) -> Option<&Place> {
        self.by_id.get(id).map(|&i| &self.places[i])
    }

    pub fn places(&self) -> &[Place] {
        &self.places
    }

    /// Copy keeping only places whose category passes `keep`
    pub fn filtered(&self, keep: impl Fn(CategoryId) -> bool) -> Self {
        Self::new(
            self.places
                .iter()
                .filter(|p| keep(p.category))
                .cloned()
                .collect(),
        )
    }
}

/// Category lookup by id
#[derive(Debug, Default)]
pub struct CategoryIndex {
    by_id: HashMap<CategoryId, Category>,
}

impl CategoryIndex {
    pub fn new(categories: Vec<Category>) -> Self {
        Self {
            by_id: categories.into_iter().map(|c| (c.id, c)).collect(),
        }
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.by_id.get(&id)
    }

    /// Display color, or `fallback` for unknown or uncolored categories
    pub fn color_or<'a>(&'a self, id: CategoryId, fallback: &'a str) -> &'a str {
        self.get(id)
            .and_then(|c| c.color.as_deref())
            .filter(|c| !c.is_empty())
            .unwrap_or(fallback)
    }

    /// Icon URL, if the category has a non-empty one
    pub fn icon(&self, id: CategoryId) -> Option<&str> {
        self.get(id)
            .and_then(|c| c.icon.as_deref())
            .filter(|url| !url.is_empty())
    }
}
