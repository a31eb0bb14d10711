//! Cluster layer lifecycle
//!
//! `ClusterLayers` owns everything registered with the map on behalf of the
//! categories that currently have places: one clustered source per
//! category, two click handlers per category and the category icons.
//! `sync` brings the registrations in line with the latest inputs;
//! `teardown` (also run on drop) releases all of them for good.

use std::rc::{Rc, Weak};

use crate::camera::CameraController;
use crate::dispatch::{bind_category, ClickContext, HandlerBinding, InteractionSettings};
use crate::engine::MapEngine;
use crate::epoch::Epoch;
use crate::features::{CategoryCluster, FeatureBuilder};
use crate::grouping::{group_by_category, PlacesByCategory};
use crate::icons::{load_category_icon, remove_icon};
use crate::layers::{category_layers, ClusterSource, LayerIds, LayerRegistry};
use crate::memo::{same_rc, Memo};
use crate::places::{CategoryId, CategoryIndex, PlaceIndex};
use crate::selection::SelectionStore;

/// Everything the layers are bound against
#[derive(Clone)]
pub struct LayerInputs {
    pub map: Option<Rc<dyn MapEngine>>,
    pub places: Option<Rc<PlaceIndex>>,
    pub categories: Rc<CategoryIndex>,
    pub camera: Rc<dyn CameraController>,
    pub selection: Rc<dyn SelectionStore>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerSettings {
    pub interaction: InteractionSettings,
    pub cluster_radius: f64,
    pub cluster_max_zoom: f64,
    pub marker_size: f64,
    pub default_color: String,
    pub icon_key_prefix: String,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            interaction: InteractionSettings::default(),
            cluster_radius: 50.0,
            cluster_max_zoom: 17.0,
            marker_size: 1.0,
            default_color: "red".to_string(),
            icon_key_prefix: "category-thumb-".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing registered yet, or nothing to register
    Unbound,
    Bound,
    /// Terminal
    TornDown,
}

fn same_map(held: &Weak<dyn MapEngine>, map: &Rc<dyn MapEngine>) -> bool {
    std::ptr::eq(held.as_ptr() as *const (), Rc::as_ptr(map) as *const ())
}

/// Handlers and icons of one bound category set
struct Binding {
    map: Weak<dyn MapEngine>,
    places: Option<Rc<PlaceIndex>>,
    categories: Rc<CategoryIndex>,
    camera: Rc<dyn CameraController>,
    selection: Rc<dyn SelectionStore>,
    category_ids: Vec<CategoryId>,
    handlers: Vec<HandlerBinding>,
    ids: Vec<Rc<LayerIds>>,
}

impl Binding {
    fn matches(&self, inputs: &LayerInputs, category_ids: &[CategoryId]) -> bool {
        let same_places = match (&self.places, &inputs.places) {
            (Some(a), Some(b)) => same_rc(a, b),
            (None, None) => true,
            _ => false,
        };
        inputs.map.as_ref().is_some_and(|m| same_map(&self.map, m))
            && same_places
            && same_rc(&self.categories, &inputs.categories)
            && same_rc(&self.camera, &inputs.camera)
            && same_rc(&self.selection, &inputs.selection)
            && self.category_ids == category_ids
    }
}

/// Sources last pushed to a map
struct SyncedSources {
    map: Weak<dyn MapEngine>,
    clusters: Rc<Vec<CategoryCluster>>,
    sources: Vec<String>,
    /// Pushed with settings that have since changed
    stale: bool,
}

impl SyncedSources {
    fn remove_all(self) {
        if let Some(map) = self.map.upgrade() {
            for id in &self.sources {
                map.remove_source(id);
            }
        }
    }
}

pub struct ClusterLayers {
    settings: LayerSettings,
    state: LifecycleState,
    registry: LayerRegistry,
    grouping: Memo<Rc<PlaceIndex>, PlacesByCategory>,
    features: FeatureBuilder,
    epoch: Epoch,
    bound: Option<Binding>,
    synced: Option<SyncedSources>,
}

impl ClusterLayers {
    pub fn new(settings: LayerSettings) -> Self {
        Self {
            registry: LayerRegistry::new(settings.icon_key_prefix.clone()),
            features: FeatureBuilder::new(settings.default_color.clone()),
            settings,
            state: LifecycleState::Unbound,
            grouping: Memo::new(),
            epoch: Epoch::new(),
            bound: None,
            synced: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Categories with registered handlers, in category order
    pub fn bound_categories(&self) -> Vec<CategoryId> {
        self.bound.as_ref().map(|b| b.category_ids.clone()).unwrap_or_default()
    }

    pub fn handler_count(&self) -> usize {
        self.bound.as_ref().map_or(0, |b| b.handlers.len())
    }

    pub fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    /// Switch to `settings` and sync against `inputs`. Sources are pushed
    /// again; handlers and icons are rebound only when they depend on what
    /// changed.
    pub fn update_settings(&mut self, settings: LayerSettings, inputs: &LayerInputs) {
        if self.state == LifecycleState::TornDown || settings == self.settings {
            return;
        }

        let prefix_changed = settings.icon_key_prefix != self.settings.icon_key_prefix;
        if prefix_changed || settings.interaction != self.settings.interaction {
            self.unbind();
        }
        if prefix_changed {
            self.registry = LayerRegistry::new(settings.icon_key_prefix.clone());
        }
        if settings.default_color != self.settings.default_color {
            self.features = FeatureBuilder::new(settings.default_color.clone());
        }
        if let Some(synced) = self.synced.as_mut() {
            synced.stale = true;
        }

        tracing::info!(
            "Layer settings changed: radius {} max zoom {} marker size {}",
            settings.cluster_radius,
            settings.cluster_max_zoom,
            settings.marker_size
        );
        self.settings = settings;
        self.sync(inputs);
    }

    /// Bring sources, handlers and icons in line with `inputs`
    pub fn sync(&mut self, inputs: &LayerInputs) {
        if self.state == LifecycleState::TornDown {
            tracing::debug!("Sync after teardown ignored");
            return;
        }

        let groups = inputs
            .places
            .as_ref()
            .map(|places| self.grouping.get(places.clone(), |p| group_by_category(p.places())));
        let category_ids: Vec<CategoryId> = groups
            .as_ref()
            .map(|g| g.keys().copied().collect())
            .unwrap_or_default();

        self.sync_sources(inputs.map.as_ref(), groups.as_ref(), &inputs.categories);

        if self.bound.as_ref().is_some_and(|b| b.matches(inputs, &category_ids)) {
            return;
        }

        self.unbind();
        match &inputs.map {
            Some(map) if !category_ids.is_empty() => self.bind(map, inputs, category_ids),
            Some(_) => tracing::debug!("No categories with places, nothing to bind"),
            None => tracing::debug!("No map, nothing to bind"),
        }
    }

    fn bind(
        &mut self,
        map: &Rc<dyn MapEngine>,
        inputs: &LayerInputs,
        category_ids: Vec<CategoryId>,
    ) {
        let ctx = Rc::new(ClickContext {
            map: Rc::downgrade(map),
            places: inputs.places.clone(),
            camera: inputs.camera.clone(),
            selection: inputs.selection.clone(),
            settings: self.settings.interaction,
            token: self.epoch.token(),
        });

        let mut handlers = Vec::with_capacity(category_ids.len() * 2);
        let mut ids = Vec::with_capacity(category_ids.len());
        for &category in &category_ids {
            let layer_ids = self.registry.ids(category);
            handlers.extend(bind_category(map.as_ref(), &ctx, &layer_ids));
            load_category_icon(map, &inputs.categories, &layer_ids, self.epoch.token());
            ids.push(layer_ids);
        }

        tracing::info!(
            "Bound {} categories ({} click handlers)",
            category_ids.len(),
            handlers.len()
        );
        self.bound = Some(Binding {
            map: Rc::downgrade(map),
            places: inputs.places.clone(),
            categories: inputs.categories.clone(),
            camera: inputs.camera.clone(),
            selection: inputs.selection.clone(),
            category_ids,
            handlers,
            ids,
        });
        self.state = LifecycleState::Bound;
    }

    fn unbind(&mut self) {
        let Some(binding) = self.bound.take() else {
            return;
        };

        match binding.map.upgrade() {
            Some(map) => {
                let count = binding.handlers.len();
                for handler in binding.handlers {
                    handler.unregister(map.as_ref());
                }
                for ids in &binding.ids {
                    remove_icon(map.as_ref(), ids);
                }
                tracing::debug!("Unbound {} click handlers", count);
            }
            None => tracing::debug!("Map gone before unbind, nothing to release"),
        }
        self.epoch.advance();
        self.state = LifecycleState::Unbound;
    }

    fn sync_sources(
        &mut self,
        map: Option<&Rc<dyn MapEngine>>,
        groups: Option<&Rc<PlacesByCategory>>,
        categories: &Rc<CategoryIndex>,
    ) {
        let clusters = groups.map(|g| self.features.build(g, categories));
        let target = map.zip(clusters);

        let unchanged = match (&self.synced, &target) {
            (Some(synced), Some((map, clusters))) => {
                !synced.stale
                    && same_map(&synced.map, map)
                    && Rc::ptr_eq(&synced.clusters, clusters)
            }
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        let previous = self.synced.take();
        let Some((map, clusters)) = target else {
            if let Some(previous) = previous {
                previous.remove_all();
            }
            return;
        };

        let mut sources = Vec::with_capacity(clusters.len());
        for cluster in clusters.iter() {
            let ids = self.registry.ids(cluster.category);
            map.set_source(ClusterSource {
                id: ids.source.clone(),
                data: cluster.collection.clone(),
                cluster_radius: self.settings.cluster_radius,
                cluster_max_zoom: self.settings.cluster_max_zoom,
                layers: category_layers(&ids, self.settings.marker_size, &cluster.color),
            });
            sources.push(ids.source.clone());
        }
        tracing::debug!("Pushed {} cluster sources", sources.len());

        if let Some(previous) = previous {
            if same_map(&previous.map, map) {
                for id in previous.sources.iter().filter(|id| !sources.contains(id)) {
                    map.remove_source(id);
                }
            } else {
                previous.remove_all();
            }
        }

        self.synced = Some(SyncedSources {
            map: Rc::downgrade(map),
            clusters,
            sources,
            stale: false,
        });
    }

    /// Release every registration. Later `sync` calls do nothing.
    pub fn teardown(&mut self) {
        if self.state == LifecycleState::TornDown {
            return;
        }
        self.unbind();
        if let Some(synced) = self.synced.take() {
            synced.remove_all();
        }
        self.epoch.advance();
        self.state = LifecycleState::TornDown;
        tracing::info!("Cluster layers torn down");
    }
}

impl Drop for ClusterLayers {
    fn drop(&mut self) {
        self.teardown();
    }
}
