//! Configuration loader - YAML map settings + .env environment

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::camera::ReleaseTrigger;
use crate::dispatch::InteractionSettings;
use crate::lifecycle::LayerSettings;

/// Map settings loaded from map.yaml. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterSettings,
    pub marker: MarkerSettings,
    pub icons: IconSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Merge radius in pixels
    pub radius: f64,
    pub max_zoom: f64,
    /// Zoom added past a cluster's expansion zoom
    pub expansion_overshoot: f64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            radius: 50.0,
            max_zoom: 17.0,
            expansion_overshoot: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarkerSettings {
    /// Scale for marker and cluster circles
    pub size: f64,
    pub default_color: String,
    pub popup_offset: [f64; 2],
    pub selection_release: ReleaseTrigger,
}

impl Default for MarkerSettings {
    fn default() -> Self {
        Self {
            size: 1.0,
            default_color: "red".to_string(),
            popup_offset: [0.0, -30.0],
            selection_release: ReleaseTrigger::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IconSettings {
    pub key_prefix: String,
    pub timeout_secs: u64,
}

impl Default for IconSettings {
    fn default() -> Self {
        Self {
            key_prefix: "category-thumb-".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Settings loaded from .env and the process environment
#[derive(Debug, Clone)]
pub struct Secrets {
    pub dataset: String,
    pub log_dir: String,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        // An empty document is null, not an empty map
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn layer_settings(&self) -> LayerSettings {
        LayerSettings {
            interaction: InteractionSettings {
                expansion_overshoot: self.cluster.expansion_overshoot,
                popup_offset: self.marker.popup_offset,
            },
            cluster_radius: self.cluster.radius,
            cluster_max_zoom: self.cluster.max_zoom,
            marker_size: self.marker.size,
            default_color: self.marker.default_color.clone(),
            icon_key_prefix: self.icons.key_prefix.clone(),
        }
    }
}

impl Secrets {
    pub fn load() -> Self {
        dotenvy::dotenv().ok();

        Secrets {
            dataset: std::env::var("DATASET").unwrap_or_else(|_| "places.yaml".to_string()),
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
        }
    }
}
