//! Scripted sessions against the headless engine
//!
//! A script is a viewport plus a list of steps. Each step is applied to a
//! `HeadlessMap` wired to real cluster layers, and the resulting map state
//! is recorded in the report.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

use crate::camera::EngineCamera;
use crate::config::Config;
use crate::download::fetch_icon;
use crate::engine::{EngineError, LngLat, MapEngine, MapEvent};
use crate::headless::{HeadlessMap, Pending};
use crate::lifecycle::{ClusterLayers, LayerInputs};
use crate::places::{CategoryId, CategoryIndex, Dataset, PlaceId, PlaceIndex};
use crate::selection::{deselect_on_map_click, MarkerPopup, SelectionStore};

/// Upper bound on resolve rounds, in case resolving keeps queuing work
const MAX_RESOLVE_ROUNDS: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            latitude: 0.0,
            longitude: 0.0,
            zoom: 2.0,
            width: 800.0,
            height: 600.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    Click { latitude: f64, longitude: f64 },
    PointerUp,
    /// Complete all queued icon loads and expansion-zoom requests
    Resolve,
    Zoom { zoom: f64 },
    HideCategory { category: CategoryId },
    ShowAll,
    /// Change layer settings; unset fields keep their current value
    Restyle {
        cluster_radius: Option<f64>,
        marker_size: Option<f64>,
    },
    Teardown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub viewport: Viewport,
    pub steps: Vec<Step>,
}

impl Script {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let script: Script = serde_yaml::from_str(&content)?;
        Ok(script)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub center: LngLat,
    pub zoom: f64,
    pub selection: Option<PlaceId>,
    pub state: String,
    pub bound_categories: Vec<CategoryId>,
    pub click_handlers: usize,
    pub sources: Vec<String>,
    /// Points across all pushed sources
    pub points: usize,
    pub icons: Vec<String>,
    pub pending: usize,
    pub camera_moves: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub index: usize,
    pub step: Step,
    /// For clicks: whether a layer handler took the click
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handled: Option<bool>,
    pub after: Snapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub started_at: String,
    pub places: usize,
    pub steps: Vec<StepReport>,
}

struct Session {
    map: Rc<HeadlessMap>,
    layers: ClusterLayers,
    inputs: LayerInputs,
    all_places: Rc<PlaceIndex>,
    hidden: BTreeSet<CategoryId>,
    selection: MarkerPopup,
    icon_timeout: Duration,
}

impl Session {
    fn new(config: &Config, dataset: Dataset, viewport: &Viewport) -> Self {
        let map = Rc::new(HeadlessMap::new(
            LngLat::new(viewport.longitude, viewport.latitude),
            viewport.zoom,
            viewport.width,
            viewport.height,
        ));
        let engine: Rc<dyn MapEngine> = map.clone();

        let selection = MarkerPopup::new();
        let store: Rc<dyn SelectionStore> = Rc::new(selection.clone());
        engine.on(MapEvent::Click, None, deselect_on_map_click(store.clone()));

        let all_places = Rc::new(PlaceIndex::new(dataset.places));
        let inputs = LayerInputs {
            map: Some(engine.clone()),
            places: Some(all_places.clone()),
            categories: Rc::new(CategoryIndex::new(dataset.categories)),
            camera: Rc::new(EngineCamera::new(&engine, config.marker.selection_release)),
            selection: store,
        };

        let mut layers = ClusterLayers::new(config.layer_settings());
        layers.sync(&inputs);

        Self {
            map,
            layers,
            inputs,
            all_places,
            hidden: BTreeSet::new(),
            selection,
            icon_timeout: Duration::from_secs(config.icons.timeout_secs),
        }
    }

    fn refilter(&mut self) {
        let places = if self.hidden.is_empty() {
            self.all_places.clone()
        } else {
            let hidden = &self.hidden;
            Rc::new(self.all_places.filtered(|c| !hidden.contains(&c)))
        };
        self.inputs.places = Some(places);
        self.layers.sync(&self.inputs);
    }

    async fn resolve(&self) {
        for _ in 0..MAX_RESOLVE_ROUNDS {
            let pending = self.map.take_pending();
            if pending.is_empty() {
                return;
            }
            for work in pending {
                match work {
                    Pending::Image(request) => {
                        let result = fetch_icon(&request.url, self.icon_timeout)
                            .await
                            .map(Some)
                            .map_err(|e| EngineError::ImageLoad(e.to_string()));
                        request.resolve(result);
                    }
                    Pending::ExpansionZoom(request) => {
                        let result = self.map.expansion_zoom(&request.source, request.cluster_id);
                        request.resolve(result);
                    }
                }
            }
        }
        tracing::warn!("Pending work still queued after {} rounds", MAX_RESOLVE_ROUNDS);
    }

    async fn apply(&mut self, step: &Step) -> Option<bool> {
        match step {
            Step::Click { latitude, longitude } => {
                let event = self.map.click_at(LngLat::new(*longitude, *latitude));
                return Some(event.default_prevented());
            }
            Step::PointerUp => self.map.pointer_up(),
            Step::Resolve => self.resolve().await,
            Step::Zoom { zoom } => self.map.set_zoom(*zoom),
            Step::HideCategory { category } => {
                self.hidden.insert(*category);
                self.refilter();
            }
            Step::ShowAll => {
                self.hidden.clear();
                self.refilter();
            }
            Step::Restyle {
                cluster_radius,
                marker_size,
            } => {
                let mut settings = self.layers.settings().clone();
                if let Some(radius) = cluster_radius {
                    settings.cluster_radius = *radius;
                }
                if let Some(size) = marker_size {
                    settings.marker_size = *size;
                }
                self.layers.update_settings(settings, &self.inputs);
            }
            Step::Teardown => self.layers.teardown(),
        }
        None
    }

    fn snapshot(&self) -> Snapshot {
        let sources = self.map.source_ids();
        let points = sources
            .iter()
            .filter_map(|id| self.map.source_data(id))
            .map(|data| data.features.len())
            .sum();
        Snapshot {
            center: self.map.center(),
            zoom: self.map.zoom(),
            selection: self.selection.marker_popup(),
            state: format!("{:?}", self.layers.state()),
            bound_categories: self.layers.bound_categories(),
            click_handlers: self.layers.handler_count(),
            sources,
            points,
            icons: self.map.image_keys(),
            pending: self.map.pending_count(),
            camera_moves: self.map.camera_moves().len(),
        }
    }
}

pub async fn run(config: &Config, dataset: Dataset, script: &Script) -> Result<Report> {
    let started_at = chrono::Utc::now().to_rfc3339();
    let places = dataset.places.len();
    tracing::info!("Simulating {} steps over {} places", script.steps.len(), places);

    let mut session = Session::new(config, dataset, &script.viewport);
    let mut steps = Vec::with_capacity(script.steps.len());

    for (index, step) in script.steps.iter().enumerate() {
        tracing::debug!("Step {}: {:?}", index, step);
        let handled = session.apply(step).await;
        steps.push(StepReport {
            index,
            step: step.clone(),
            handled,
            after: session.snapshot(),
        });
    }

    Ok(Report {
        started_at,
        places,
        steps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::places::{Category, Place};

    fn place(id: &str, category: CategoryId, latitude: f64, longitude: f64) -> Place {
        Place {
            id: id.to_string(),
            category,
            latitude,
            longitude,
            name: None,
        }
    }

    fn dataset() -> Dataset {
        Dataset {
            categories: vec![
                Category {
                    id: 1,
                    name: Some("Trailheads".into()),
                    color: Some("#228b22".into()),
                    icon: None,
                },
                Category {
                    id: 2,
                    name: Some("Springs".into()),
                    color: None,
                    icon: None,
                },
            ],
            places: vec![
                place("a", 1, 40.0, -111.0),
                place("b", 1, 40.001, -111.001),
                place("c", 2, 40.3, -111.5),
            ],
        }
    }

    #[test]
    fn test_script_yaml() {
        let script: Script = serde_yaml::from_str(concat!(
            "viewport:\n",
            "  zoom: 9\n",
            "steps:\n",
            "  - action: click\n",
            "    latitude: 1.5\n",
            "    longitude: 2.5\n",
            "  - action: pointer_up\n",
            "  - action: hide_category\n",
            "    category: 3\n",
            "  - action: restyle\n",
            "    marker_size: 2\n",
        ))
        .unwrap();
        assert_eq!(script.viewport.zoom, 9.0);
        assert_eq!(script.viewport.width, 800.0);
        assert_eq!(script.steps.len(), 4);
        assert!(matches!(script.steps[0], Step::Click { latitude, .. } if latitude == 1.5));
        assert!(matches!(script.steps[2], Step::HideCategory { category: 3 }));
        assert!(matches!(
            script.steps[3],
            Step::Restyle {
                cluster_radius: None,
                marker_size: Some(size),
            } if size == 2.0
        ));
    }

    #[tokio::test]
    async fn test_session() {
        let script = Script {
            viewport: Viewport {
                latitude: 40.0,
                longitude: -111.0,
                zoom: 9.0,
                ..Viewport::default()
            },
            steps: vec![
                Step::Click {
                    latitude: 40.3,
                    longitude: -111.5,
                },
                Step::PointerUp,
                Step::Click {
                    latitude: 40.0005,
                    longitude: -111.0005,
                },
                Step::Resolve,
                Step::HideCategory { category: 1 },
                Step::ShowAll,
                Step::Restyle {
                    cluster_radius: Some(80.0),
                    marker_size: None,
                },
                Step::Teardown,
            ],
        };

        let report = run(&Config::default(), dataset(), &script).await.unwrap();
        let after = |i: usize| &report.steps[i].after;
        assert_eq!(report.places, 3);

        // marker click selects and jumps
        assert_eq!(report.steps[0].handled, Some(true));
        assert_eq!(after(0).selection.as_deref(), Some("c"));
        assert_eq!(after(0).click_handlers, 4);
        assert_eq!(after(0).camera_moves, 1);

        assert_eq!(after(1).selection, None);

        // cluster click waits for the expansion zoom
        assert_eq!(report.steps[2].handled, Some(true));
        assert_eq!(after(2).pending, 1);
        assert_eq!(after(2).camera_moves, 1);
        assert_eq!(after(3).pending, 0);
        assert_eq!(after(3).camera_moves, 2);
        assert!(after(3).zoom > 9.5);

        assert_eq!(after(4).bound_categories, vec![2]);
        assert_eq!(after(4).sources, vec!["source-2"]);
        assert_eq!(after(4).points, 1);
        assert_eq!(after(5).bound_categories, vec![1, 2]);
        assert_eq!(after(5).points, 3);

        // restyle pushes sources again, handlers stay bound
        assert_eq!(after(6).bound_categories, vec![1, 2]);
        assert_eq!(after(6).click_handlers, 4);
        assert_eq!(after(6).points, 3);

        assert_eq!(after(7).state, "TornDown");
        assert_eq!(after(7).click_handlers, 0);
        assert!(after(7).sources.is_empty());
        assert_eq!(after(7).points, 0);
    }
}
