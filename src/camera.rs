//! Camera moves
//!
//! `MoveRequest` is what the interaction controller asks for; a
//! `CameraController` decides how to carry it out. `EngineCamera` performs
//! the move on the map engine itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::engine::{CameraTarget, Continuation, LngLat, MapEngine, MapEvent};

/// Engine event that ends a marker's transient selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseTrigger {
    /// Next pointer-up on the map after the move was issued
    #[default]
    PointerUp,
    /// End of the first camera move after the one that made the selection
    MoveEnd,
}

pub struct MoveRequest {
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: f64,
    /// Animate along a flight path instead of jumping
    pub fly: bool,
    pub offset: Option<[f64; 2]>,
    pub on_release: Option<Continuation<()>>,
}

impl MoveRequest {
    pub fn new(latitude: f64, longitude: f64, zoom: f64) -> Self {
        Self {
            latitude,
            longitude,
            zoom,
            fly: true,
            offset: None,
            on_release: None,
        }
    }

    pub fn without_fly(mut self) -> Self {
        self.fly = false;
        self
    }

    pub fn with_offset(mut self, offset: [f64; 2]) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn on_release(mut self, callback: impl FnOnce() + 'static) -> Self {
        self.on_release = Some(Box::new(move |()| callback()));
        self
    }

    pub fn target(&self) -> CameraTarget {
        CameraTarget {
            center: LngLat::new(self.longitude, self.latitude),
            zoom: self.zoom,
            offset: self.offset.unwrap_or([0.0, 0.0]),
        }
    }
}

impl fmt::Debug for MoveRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MoveRequest")
            .field("latitude", &self.latitude)
            .field("longitude", &self.longitude)
            .field("zoom", &self.zoom)
            .field("fly", &self.fly)
            .field("offset", &self.offset)
            .field("on_release", &self.on_release.is_some())
            .finish()
    }
}

pub trait CameraController {
    fn handle_map_move(&self, request: MoveRequest);
}

/// Moves the engine camera; release callbacks become one-shot engine listeners
pub struct EngineCamera {
    map: Weak<dyn MapEngine>,
    release: ReleaseTrigger,
}

impl EngineCamera {
    pub fn new(map: &Rc<dyn MapEngine>, release: ReleaseTrigger) -> Self {
        Self {
            map: Rc::downgrade(map),
            release,
        }
    }
}

impl CameraController for EngineCamera {
    fn handle_map_move(&self, request: MoveRequest) {
        let Some(map) = self.map.upgrade() else {
            tracing::debug!("Camera move dropped, map is gone");
            return;
        };

        let target = request.target();
        // Listen before moving: a jump can end synchronously
        if let Some(callback) = request.on_release {
            match self.release {
                ReleaseTrigger::PointerUp => map.once(MapEvent::PointerUp, callback),
                ReleaseTrigger::MoveEnd => {
                    // Skip the end of our own move, release on the next one
                    let weak = self.map.clone();
                    map.once(
                        MapEvent::MoveEnd,
                        Box::new(move |()| {
                            if let Some(map) = weak.upgrade() {
                                map.once(MapEvent::MoveEnd, callback);
                            }
                        }),
                    );
                }
            }
        }

        tracing::debug!(
            "Camera {} to ({:.5}, {:.5}) z{:.2}",
            if request.fly { "fly" } else { "jump" },
            request.latitude,
            request.longitude,
            request.zoom
        );
        if request.fly {
            map.fly_to(target);
        } else {
            map.jump_to(target);
        }
    }
}
