//! Headless map engine
//!
//! In-memory `MapEngine` used by `simulate` and by tests. It keeps a camera
//! (Web Mercator, 512px tiles), clusters each source greedily per integer
//! zoom, hit-tests layers by circle radius and queues async work until the
//! caller resolves it, so completion order is always under the caller's
//! control.

use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde_json::json;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::f64::consts::PI;
use std::rc::Rc;

use crate::engine::{
    same_handler, CameraTarget, ClickEvent, ClickHandler, Continuation, EngineError, IconImage,
    LngLat, MapEngine, MapEvent, ScreenPoint,
};
use crate::layers::{ClusterSource, LayerFilter};

const TILE_SIZE: f64 = 512.0;
const MAX_LATITUDE: f64 = 85.051_128_78;

fn world_size(zoom: f64) -> f64 {
    TILE_SIZE * 2_f64.powf(zoom)
}

/// Web Mercator world pixel coordinates at `zoom`
pub fn project(lng_lat: LngLat, zoom: f64) -> (f64, f64) {
    let size = world_size(zoom);
    let lat = lng_lat.lat.clamp(-MAX_LATITUDE, MAX_LATITUDE);
    let sin = lat.to_radians().sin();
    let x = (lng_lat.lng + 180.0) / 360.0;
    let y = 0.5 - ((1.0 + sin) / (1.0 - sin)).ln() / (4.0 * PI);
    (x * size, y * size)
}

pub fn unproject(x: f64, y: f64, zoom: f64) -> LngLat {
    let size = world_size(zoom);
    let n = (0.5 - y / size) * 2.0 * PI;
    LngLat::new(x / size * 360.0 - 180.0, 2.0 * n.exp().atan().to_degrees() - 90.0)
}

/// A camera move as performed by the engine
#[derive(Debug, Clone, PartialEq)]
pub struct CameraMove {
    pub target: LngLat,
    pub zoom: f64,
    pub offset: [f64; 2],
    pub animated: bool,
}

pub struct PendingImage {
    pub url: String,
    done: Continuation<Result<Option<IconImage>, EngineError>>,
}

impl PendingImage {
    pub fn resolve(self, result: Result<Option<IconImage>, EngineError>) {
        (self.done)(result)
    }
}

pub struct PendingZoom {
    pub source: String,
    pub cluster_id: u64,
    done: Continuation<Result<Option<f64>, EngineError>>,
}

impl PendingZoom {
    pub fn resolve(self, result: Result<Option<f64>, EngineError>) {
        (self.done)(result)
    }
}

/// Async engine work waiting for the caller
pub enum Pending {
    Image(PendingImage),
    ExpansionZoom(PendingZoom),
}

struct Registration {
    event: MapEvent,
    layer: Option<String>,
    handler: ClickHandler,
}

#[derive(Debug, Clone, Copy)]
struct View {
    center: LngLat,
    zoom: f64,
    width: f64,
    height: f64,
}

/// One drawable point: a cluster or a single source feature
#[derive(Debug, Clone)]
struct Rendered {
    position: LngLat,
    members: Vec<usize>,
    cluster_id: Option<u64>,
}

pub struct HeadlessMap {
    view: RefCell<View>,
    handlers: RefCell<Vec<Registration>>,
    once: RefCell<Vec<(MapEvent, Continuation<()>)>>,
    sources: RefCell<BTreeMap<String, ClusterSource>>,
    images: RefCell<HashMap<String, IconImage>>,
    stubs: RefCell<HashMap<String, Vec<Feature>>>,
    pending: RefCell<Vec<Pending>>,
    moves: RefCell<Vec<CameraMove>>,
    pushes: Cell<usize>,
}

impl HeadlessMap {
    pub fn new(center: LngLat, zoom: f64, width: f64, height: f64) -> Self {
        Self {
            view: RefCell::new(View {
                center,
                zoom,
                width,
                height,
            }),
            handlers: RefCell::new(Vec::new()),
            once: RefCell::new(Vec::new()),
            sources: RefCell::new(BTreeMap::new()),
            images: RefCell::new(HashMap::new()),
            stubs: RefCell::new(HashMap::new()),
            pending: RefCell::new(Vec::new()),
            moves: RefCell::new(Vec::new()),
            pushes: Cell::new(0),
        }
    }

    pub fn center(&self) -> LngLat {
        self.view.borrow().center
    }

    pub fn set_zoom(&self, zoom: f64) {
        self.view.borrow_mut().zoom = zoom;
    }

    pub fn screen_point(&self, lng_lat: LngLat) -> ScreenPoint {
        let view = *self.view.borrow();
        let (cx, cy) = project(view.center, view.zoom);
        let (x, y) = project(lng_lat, view.zoom);
        ScreenPoint::new(x - cx + view.width / 2.0, y - cy + view.height / 2.0)
    }

    pub fn lng_lat_at(&self, point: ScreenPoint) -> LngLat {
        let view = *self.view.borrow();
        let (cx, cy) = project(view.center, view.zoom);
        unproject(
            cx + point.x - view.width / 2.0,
            cy + point.y - view.height / 2.0,
            view.zoom,
        )
    }

    /// Dispatch a click the way the engine would: layer handlers whose layer
    /// has a rendered feature under the point, then map-wide handlers
    pub fn click(&self, point: ScreenPoint) -> ClickEvent {
        let event = ClickEvent::new(point, self.lng_lat_at(point));
        let registrations: Vec<(Option<String>, ClickHandler)> = self
            .handlers
            .borrow()
            .iter()
            .filter(|r| r.event == MapEvent::Click)
            .map(|r| (r.layer.clone(), r.handler.clone()))
            .collect();

        for (layer, handler) in &registrations {
            if let Some(layer) = layer {
                if !self.query_rendered_features(point, &[layer.as_str()]).is_empty() {
                    handler(&event);
                }
            }
        }
        for (layer, handler) in &registrations {
            if layer.is_none() {
                handler(&event);
            }
        }
        event
    }

    pub fn click_at(&self, lng_lat: LngLat) -> ClickEvent {
        self.click(self.screen_point(lng_lat))
    }

    pub fn pointer_up(&self) {
        self.fire(MapEvent::PointerUp);
    }

    fn fire(&self, event: MapEvent) {
        let listeners = std::mem::take(&mut *self.once.borrow_mut());
        let (due, keep): (Vec<_>, Vec<_>) = listeners.into_iter().partition(|(e, _)| *e == event);
        self.once.borrow_mut().extend(keep);
        for (_, callback) in due {
            callback(());
        }
    }

    /// Hand out all queued async work; resolving it may queue more
    pub fn take_pending(&self) -> Vec<Pending> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }

    /// Serve `features` for `layer` instead of computing hits
    #[cfg(test)]
    pub fn stub_features(&self, layer: &str, features: Vec<Feature>) {
        self.stubs.borrow_mut().insert(layer.to_string(), features);
    }

    #[cfg(test)]
    pub fn handler_count(&self, event: MapEvent) -> usize {
        self.handlers.borrow().iter().filter(|r| r.event == event).count()
    }

    #[cfg(test)]
    pub fn handler_layers(&self, event: MapEvent) -> Vec<Option<String>> {
        self.handlers
            .borrow()
            .iter()
            .filter(|r| r.event == event)
            .map(|r| r.layer.clone())
            .collect()
    }

    pub fn image_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.images.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.sources.borrow().keys().cloned().collect()
    }

    /// Number of `set_source` calls so far
    #[cfg(test)]
    pub fn source_pushes(&self) -> usize {
        self.pushes.get()
    }

    pub fn camera_moves(&self) -> Vec<CameraMove> {
        self.moves.borrow().clone()
    }

    fn move_camera(&self, target: CameraTarget, animated: bool) {
        {
            let mut view = self.view.borrow_mut();
            let (x, y) = project(target.center, target.zoom);
            view.center = unproject(x - target.offset[0], y - target.offset[1], target.zoom);
            view.zoom = target.zoom;
        }
        self.moves.borrow_mut().push(CameraMove {
            target: target.center,
            zoom: target.zoom,
            offset: target.offset,
            animated,
        });
        self.fire(MapEvent::MoveEnd);
    }

    /// Greedy pixel-radius clustering of a source at integer zoom `z`
    fn render(source: &ClusterSource, z: u32) -> Vec<Rendered> {
        let positions: Vec<Option<LngLat>> = source.data.features.iter().map(point_of).collect();
        let zoom = z as f64;
        let world: Vec<Option<(f64, f64)>> = positions
            .iter()
            .map(|p| p.map(|p| project(p, zoom)))
            .collect();

        let clustering = zoom <= source.cluster_max_zoom;
        let mut assigned = vec![false; positions.len()];
        let mut rendered = Vec::new();

        for i in 0..positions.len() {
            let Some((xi, yi)) = world[i] else { continue };
            if assigned[i] {
                continue;
            }
            assigned[i] = true;
            let mut members = vec![i];

            if clustering {
                for j in (i + 1)..positions.len() {
                    if assigned[j] {
                        continue;
                    }
                    if let Some((xj, yj)) = world[j] {
                        if ((xi - xj).powi(2) + (yi - yj).powi(2)).sqrt() <= source.cluster_radius {
                            assigned[j] = true;
                            members.push(j);
                        }
                    }
                }
            }

            if members.len() == 1 {
                rendered.push(Rendered {
                    position: positions[i].unwrap_or(LngLat::new(0.0, 0.0)),
                    members,
                    cluster_id: None,
                });
            } else {
                let n = members.len() as f64;
                let (sx, sy) = members
                    .iter()
                    .filter_map(|&m| world[m])
                    .fold((0.0, 0.0), |(ax, ay), (x, y)| (ax + x, ay + y));
                rendered.push(Rendered {
                    position: unproject(sx / n, sy / n, zoom),
                    cluster_id: Some(((z as u64) << 32) | i as u64),
                    members,
                });
            }
        }
        rendered
    }

    /// First zoom at which the cluster's members no longer render together
    pub fn expansion_zoom(
        &self,
        source_id: &str,
        cluster_id: u64,
    ) -> Result<Option<f64>, EngineError> {
        let sources = self.sources.borrow();
        let source = sources
            .get(source_id)
            .ok_or_else(|| EngineError::UnknownSource(source_id.to_string()))?;

        let z = (cluster_id >> 32) as u32;
        let leader = (cluster_id & 0xffff_ffff) as usize;
        let Some(cluster) = Self::render(source, z)
            .into_iter()
            .find(|r| r.cluster_id == Some(cluster_id))
        else {
            return Ok(None);
        };

        let last = source.cluster_max_zoom.max(0.0).floor() as u32 + 1;
        for next in (z + 1)..=last {
            let holding = Self::render(source, next)
                .into_iter()
                .find(|r| r.members.contains(&leader));
            match holding {
                Some(r) if r.members.len() == cluster.members.len() => continue,
                _ => return Ok(Some(next as f64)),
            }
        }
        Ok(Some(last as f64))
    }

    fn rendered_feature(source: &ClusterSource, rendered: &Rendered) -> Feature {
        match rendered.cluster_id {
            Some(cluster_id) => {
                let mut properties = JsonObject::new();
                properties.insert("cluster".to_string(), json!(true));
                properties.insert("cluster_id".to_string(), json!(cluster_id));
                properties.insert("point_count".to_string(), json!(rendered.members.len()));
                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::Point(vec![
                        rendered.position.lng,
                        rendered.position.lat,
                    ]))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            }
            None => source.data.features[rendered.members[0]].clone(),
        }
    }
}

fn point_of(feature: &Feature) -> Option<LngLat> {
    match feature.geometry.as_ref().map(|g| &g.value) {
        Some(Value::Point(coords)) if coords.len() >= 2 => Some(LngLat::new(coords[0], coords[1])),
        _ => None,
    }
}

impl MapEngine for HeadlessMap {
    fn on(&self, event: MapEvent, layer: Option<&str>, handler: ClickHandler) {
        self.handlers.borrow_mut().push(Registration {
            event,
            layer: layer.map(str::to_string),
            handler,
        });
    }

    fn off(&self, event: MapEvent, layer: Option<&str>, handler: &ClickHandler) -> bool {
        let mut handlers = self.handlers.borrow_mut();
        let found = handlers.iter().position(|r| {
            r.event == event && r.layer.as_deref() == layer && same_handler(&r.handler, handler)
        });
        match found {
            Some(i) => {
                handlers.remove(i);
                true
            }
            None => false,
        }
    }

    fn once(&self, event: MapEvent, callback: Continuation<()>) {
        self.once.borrow_mut().push((event, callback));
    }

    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<Feature> {
        let mut hits = Vec::new();
        let z = self.zoom().max(0.0).floor() as u32;

        for layer in layers {
            if let Some(stubbed) = self.stubs.borrow().get(*layer) {
                hits.extend(stubbed.iter().cloned());
                continue;
            }

            let sources = self.sources.borrow();
            let Some((source, spec)) = sources
                .values()
                .find_map(|s| s.layer(layer).map(|spec| (s, spec)))
            else {
                continue;
            };

            for rendered in Self::render(source, z) {
                let wanted = match spec.filter {
                    LayerFilter::Clustered => rendered.cluster_id.is_some(),
                    LayerFilter::Unclustered => rendered.cluster_id.is_none(),
                };
                if wanted && self.screen_point(rendered.position).distance(&point) <= spec.radius {
                    hits.push(Self::rendered_feature(source, &rendered));
                }
            }
        }
        hits
    }

    fn set_source(&self, source: ClusterSource) {
        self.pushes.set(self.pushes.get() + 1);
        self.sources.borrow_mut().insert(source.id.clone(), source);
    }

    fn remove_source(&self, id: &str) -> bool {
        self.sources.borrow_mut().remove(id).is_some()
    }

    fn source_data(&self, id: &str) -> Option<Rc<FeatureCollection>> {
        self.sources.borrow().get(id).map(|s| s.data.clone())
    }

    fn cluster_expansion_zoom(
        &self,
        source: &str,
        cluster_id: u64,
        done: Continuation<Result<Option<f64>, EngineError>>,
    ) {
        self.pending.borrow_mut().push(Pending::ExpansionZoom(PendingZoom {
            source: source.to_string(),
            cluster_id,
            done,
        }));
    }

    fn load_image(&self, url: &str, done: Continuation<Result<Option<IconImage>, EngineError>>) {
        self.pending.borrow_mut().push(Pending::Image(PendingImage {
            url: url.to_string(),
            done,
        }));
    }

    fn has_image(&self, key: &str) -> bool {
        self.images.borrow().contains_key(key)
    }

    fn add_image(&self, key: &str, image: IconImage) {
        self.images.borrow_mut().insert(key.to_string(), image);
    }

    fn remove_image(&self, key: &str) {
        self.images.borrow_mut().remove(key);
    }

    fn zoom(&self) -> f64 {
        self.view.borrow().zoom
    }

    fn jump_to(&self, target: CameraTarget) {
        self.move_camera(target, false);
    }

    fn fly_to(&self, target: CameraTarget) {
        self.move_camera(target, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{feature_cluster_id, place_feature};
    use crate::layers::{category_layers, LayerIds};
    use crate::places::Place;

    fn source(points: &[(f64, f64)]) -> ClusterSource {
        let ids = LayerIds::new(1, "category-thumb-");
        let features = points
            .iter()
            .enumerate()
            .map(|(i, &(lat, lon))| {
                place_feature(
                    &Place {
                        id: format!("p{}", i),
                        category: 1,
                        latitude: lat,
                        longitude: lon,
                        name: None,
                    },
                    1,
                )
            })
            .collect();
        ClusterSource {
            id: ids.source.clone(),
            data: Rc::new(FeatureCollection {
                bbox: None,
                features,
                foreign_members: None,
            }),
            cluster_radius: 50.0,
            cluster_max_zoom: 17.0,
            layers: category_layers(&ids, 1.0, "red"),
        }
    }

    #[test]
    fn test_projection_roundtrip() {
        let p = LngLat::new(-111.2, 40.1);
        let (x, y) = project(p, 10.0);
        let back = unproject(x, y, 10.0);
        assert!((back.lng - p.lng).abs() < 1e-9);
        assert!((back.lat - p.lat).abs() < 1e-9);

        let (x0, y0) = project(LngLat::new(0.0, 0.0), 0.0);
        assert!((x0 - 256.0).abs() < 1e-9);
        assert!((y0 - 256.0).abs() < 1e-9);
    }

    #[test]
    fn test_center_is_viewport_middle() {
        let map = HeadlessMap::new(LngLat::new(-111.0, 40.0), 9.0, 800.0, 600.0);
        let point = map.screen_point(LngLat::new(-111.0, 40.0));
        assert!((point.x - 400.0).abs() < 1e-6);
        assert!((point.y - 300.0).abs() < 1e-6);
    }

    #[test]
    fn test_clusters_merge_then_split() {
        let map = HeadlessMap::new(LngLat::new(-111.0, 40.0), 5.0, 800.0, 600.0);
        map.set_source(source(&[(40.0, -111.0), (40.001, -111.001)]));

        let center = map.screen_point(LngLat::new(-111.0, 40.0));
        let clusters = map.query_rendered_features(center, &["cluster-1"]);
        assert_eq!(clusters.len(), 1);
        assert!(map.query_rendered_features(center, &["marker-1"]).is_empty());

        map.set_zoom(18.0);
        let center = map.screen_point(LngLat::new(-111.0, 40.0));
        assert!(map.query_rendered_features(center, &["cluster-1"]).is_empty());
        assert_eq!(map.query_rendered_features(center, &["marker-1"]).len(), 1);
    }

    #[test]
    fn test_expansion_zoom() {
        let map = HeadlessMap::new(LngLat::new(-111.0, 40.0), 5.0, 800.0, 600.0);
        map.set_source(source(&[(40.0, -111.0), (40.01, -111.01)]));

        let center = map.screen_point(LngLat::new(-111.0, 40.0));
        let cluster = &map.query_rendered_features(center, &["cluster-1"])[0];
        let cluster_id = feature_cluster_id(cluster).unwrap();

        let zoom = map.expansion_zoom("source-1", cluster_id).unwrap().unwrap();
        assert!(zoom > 5.0 && zoom <= 18.0);

        // The members are apart at the returned zoom
        let z = zoom as u32;
        let src = map.sources.borrow().get("source-1").cloned().unwrap();
        assert!(HeadlessMap::render(&src, z).iter().all(|r| r.members.len() == 1));
        assert!(HeadlessMap::render(&src, z - 1).iter().any(|r| r.members.len() == 2));

        assert_eq!(map.expansion_zoom("source-1", 12345).unwrap(), None);
        assert!(map.expansion_zoom("missing", cluster_id).is_err());
    }

    #[test]
    fn test_jump_with_offset() {
        let map = HeadlessMap::new(LngLat::new(0.0, 0.0), 3.0, 800.0, 600.0);
        let target = LngLat::new(-111.0, 40.0);
        map.jump_to(CameraTarget {
            center: target,
            zoom: 9.0,
            offset: [0.0, -30.0],
        });

        let point = map.screen_point(target);
        assert!((point.x - 400.0).abs() < 1e-6);
        assert!((point.y - 270.0).abs() < 1e-6);
        assert_eq!(map.camera_moves().len(), 1);
    }

    #[test]
    fn test_off_requires_same_handler() {
        let map = HeadlessMap::new(LngLat::new(0.0, 0.0), 3.0, 800.0, 600.0);
        let handler: ClickHandler = Rc::new(|_event: &ClickEvent| {});
        let lookalike: ClickHandler = Rc::new(|_event: &ClickEvent| {});

        map.on(MapEvent::Click, Some("marker-1"), handler.clone());
        assert!(!map.off(MapEvent::Click, Some("marker-1"), &lookalike));
        assert!(!map.off(MapEvent::Click, Some("cluster-1"), &handler));
        assert!(map.off(MapEvent::Click, Some("marker-1"), &handler));
        assert!(!map.off(MapEvent::Click, Some("marker-1"), &handler));
        assert_eq!(map.handler_count(MapEvent::Click), 0);
    }
}
