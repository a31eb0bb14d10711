//! Map engine seam
//!
//! Everything the cluster layers need from the rendering engine, expressed as
//! one trait. Asynchronous engine calls (image loading, cluster expansion
//! zoom) take a `Continuation` that the engine invokes later, on the same
//! thread, in whatever order the engine likes.

use geojson::{Feature, FeatureCollection};
use std::cell::Cell;
use std::rc::Rc;
use thiserror::Error;

use crate::layers::ClusterSource;

/// Callback invoked once when an asynchronous engine call completes
pub type Continuation<T> = Box<dyn FnOnce(T) + 'static>;

/// Handler invoked for map events carrying a click payload
pub type ClickHandler = Rc<dyn Fn(&ClickEvent)>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown source: {0}")]
    UnknownSource(String),
    #[error("Image load failed: {0}")]
    ImageLoad(String),
}

/// Pixel position relative to the map container's top-left corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &ScreenPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Geographic coordinate (WGS84 degrees)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LngLat {
    pub lng: f64,
    pub lat: f64,
}

impl LngLat {
    pub fn new(lng: f64, lat: f64) -> Self {
        Self { lng, lat }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapEvent {
    Click,
    PointerUp,
    MoveEnd,
}

/// A click as delivered by the engine
#[derive(Debug)]
pub struct ClickEvent {
    pub point: ScreenPoint,
    pub lng_lat: LngLat,
    default_prevented: Cell<bool>,
}

impl ClickEvent {
    pub fn new(point: ScreenPoint, lng_lat: LngLat) -> Self {
        Self {
            point,
            lng_lat,
            default_prevented: Cell::new(false),
        }
    }

    /// Mark the event as handled so map-wide handlers leave it alone
    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }
}

/// Decoded marker icon, RGBA8
#[derive(Debug, Clone, PartialEq)]
pub struct IconImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Where the camera should end up
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraTarget {
    pub center: LngLat,
    pub zoom: f64,
    /// Screen offset of `center` from the container center once the move is done
    pub offset: [f64; 2],
}

pub trait MapEngine {
    /// Register a handler, scoped to a layer or map-wide when `layer` is `None`
    fn on(&self, event: MapEvent, layer: Option<&str>, handler: ClickHandler);

    /// Remove a handler previously passed to `on`. Returns false if it was not registered.
    fn off(&self, event: MapEvent, layer: Option<&str>, handler: &ClickHandler) -> bool;

    /// Run `callback` the next time `event` fires
    fn once(&self, event: MapEvent, callback: Continuation<()>);

    fn query_rendered_features(&self, point: ScreenPoint, layers: &[&str]) -> Vec<Feature>;

    /// Add or replace a clustered source together with its layers
    fn set_source(&self, source: ClusterSource);

    fn remove_source(&self, id: &str) -> bool;

    fn source_data(&self, id: &str) -> Option<Rc<FeatureCollection>>;

    /// `Ok(None)` means the cluster could not be resolved (stale source state)
    fn cluster_expansion_zoom(
        &self,
        source: &str,
        cluster_id: u64,
        done: Continuation<Result<Option<f64>, EngineError>>,
    );

    /// `Ok(None)` means the request finished without image data
    fn load_image(&self, url: &str, done: Continuation<Result<Option<IconImage>, EngineError>>);

    fn has_image(&self, key: &str) -> bool;

    fn add_image(&self, key: &str, image: IconImage);

    fn remove_image(&self, key: &str);

    fn zoom(&self) -> f64;

    fn jump_to(&self, target: CameraTarget);

    fn fly_to(&self, target: CameraTarget);
}

/// Handler identity: same allocation, regardless of vtable
pub fn same_handler(a: &ClickHandler, b: &ClickHandler) -> bool {
    std::ptr::eq(Rc::as_ptr(a) as *const (), Rc::as_ptr(b) as *const ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prevent_default() {
        let event = ClickEvent::new(ScreenPoint::new(1.0, 2.0), LngLat::new(-111.0, 40.0));
        assert!(!event.default_prevented());
        event.prevent_default();
        assert!(event.default_prevented());
    }

    #[test]
    fn test_handler_identity() {
        let a: ClickHandler = Rc::new(|_event: &ClickEvent| {});
        let b: ClickHandler = Rc::new(|_event: &ClickEvent| {});
        let a2 = a.clone();

        assert!(same_handler(&a, &a2));
        assert!(!same_handler(&a, &b));
    }
}
