//! Click hit-test dispatch
//!
//! Each bound category gets one click handler on its cluster layer and one
//! on its marker layer. Both run the same dispatch: clusters under the click
//! win over markers.

use std::rc::{Rc, Weak};

use crate::camera::CameraController;
use crate::engine::{ClickEvent, ClickHandler, MapEngine, MapEvent};
use crate::epoch::EpochToken;
use crate::layers::LayerIds;
use crate::places::{CategoryId, PlaceIndex};
use crate::selection::SelectionStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InteractionSettings {
    /// Added to a cluster's expansion zoom
    pub expansion_overshoot: f64,
    /// Screen offset of a selected marker from the viewport center
    pub popup_offset: [f64; 2],
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            expansion_overshoot: 0.5,
            popup_offset: [0.0, -30.0],
        }
    }
}

/// What a click handler can see, captured at bind time
pub struct ClickContext {
    pub map: Weak<dyn MapEngine>,
    pub places: Option<Rc<PlaceIndex>>,
    pub camera: Rc<dyn CameraController>,
    pub selection: Rc<dyn SelectionStore>,
    pub settings: InteractionSettings,
    pub token: EpochToken,
}

pub fn handle_click(ctx: &ClickContext, ids: &LayerIds, event: &ClickEvent) {
    let Some(map) = ctx.map.upgrade() else {
        tracing::debug!("Click on {} ignored, map is gone", ids.marker);
        return;
    };
    let Some(places) = ctx.places.as_deref() else {
        tracing::debug!("Click on {} ignored, no place data", ids.marker);
        return;
    };

    event.prevent_default();

    let clusters = map.query_rendered_features(event.point, &[ids.cluster.as_str()]);
    if let Some(cluster) = clusters.first() {
        ctx.expand_cluster(&map, ids, cluster, event.lng_lat);
        return;
    }

    let markers = map.query_rendered_features(event.point, &[ids.marker.as_str()]);
    if let Some(marker) = markers.first() {
        ctx.select_marker(&map, places, marker);
    }
}

/// A handler registered with the engine; released exactly once by `unregister`
pub struct HandlerBinding {
    pub category: CategoryId,
    pub event: MapEvent,
    pub layer: String,
    handler: ClickHandler,
}

impl HandlerBinding {
    pub fn register(
        map: &dyn MapEngine,
        category: CategoryId,
        layer: &str,
        handler: ClickHandler,
    ) -> Self {
        map.on(MapEvent::Click, Some(layer), handler.clone());
        Self {
            category,
            event: MapEvent::Click,
            layer: layer.to_string(),
            handler,
        }
    }

    pub fn unregister(self, map: &dyn MapEngine) -> bool {
        let removed = map.off(self.event, Some(&self.layer), &self.handler);
        if !removed {
            tracing::warn!(
                "Handler of category {} on {} was not registered",
                self.category,
                self.layer
            );
        }
        removed
    }
}

/// Register the cluster and marker click handlers of one category
pub fn bind_category(
    map: &dyn MapEngine,
    ctx: &Rc<ClickContext>,
    ids: &Rc<LayerIds>,
) -> [HandlerBinding; 2] {
    let handler: ClickHandler = {
        let ctx = ctx.clone();
        let ids = ids.clone();
        Rc::new(move |event: &ClickEvent| handle_click(&ctx, &ids, event))
    };

    [
        HandlerBinding::register(map, ids.category, &ids.cluster, handler.clone()),
        HandlerBinding::register(map, ids.category, &ids.marker, handler),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::MoveRequest;
    use crate::engine::{LngLat, ScreenPoint};
    use crate::epoch::Epoch;
    use crate::headless::HeadlessMap;
    use crate::selection::MarkerPopup;

    struct NoCamera;

    impl CameraController for NoCamera {
        fn handle_map_move(&self, _request: MoveRequest) {}
    }

    fn context(map: &Rc<dyn MapEngine>) -> Rc<ClickContext> {
        Rc::new(ClickContext {
            map: Rc::downgrade(map),
            places: Some(Rc::new(PlaceIndex::new(Vec::new()))),
            camera: Rc::new(NoCamera),
            selection: Rc::new(MarkerPopup::new()),
            settings: InteractionSettings::default(),
            token: Epoch::new().token(),
        })
    }

    #[test]
    fn test_bind_registers_both_layers() {
        let headless = Rc::new(HeadlessMap::new(LngLat::new(0.0, 0.0), 3.0, 800.0, 600.0));
        let engine: Rc<dyn MapEngine> = headless.clone();
        let ids = Rc::new(LayerIds::new(2, "category-thumb-"));

        let bindings = bind_category(engine.as_ref(), &context(&engine), &ids);
        assert_eq!(
            headless.handler_layers(MapEvent::Click),
            vec![Some("cluster-2".to_string()), Some("marker-2".to_string())]
        );

        for binding in bindings {
            assert!(binding.unregister(engine.as_ref()));
        }
        assert_eq!(headless.handler_count(MapEvent::Click), 0);
    }

    #[test]
    fn test_click_on_nothing_still_prevents_default() {
        let headless = Rc::new(HeadlessMap::new(LngLat::new(0.0, 0.0), 3.0, 800.0, 600.0));
        let engine: Rc<dyn MapEngine> = headless.clone();
        let ids = LayerIds::new(2, "category-thumb-");

        let event = ClickEvent::new(ScreenPoint::new(10.0, 10.0), LngLat::new(0.0, 0.0));
        handle_click(&context(&engine), &ids, &event);
        assert!(event.default_prevented());
    }

    #[test]
    fn test_click_after_map_dropped() {
        let headless = Rc::new(HeadlessMap::new(LngLat::new(0.0, 0.0), 3.0, 800.0, 600.0));
        let engine: Rc<dyn MapEngine> = headless.clone();
        let ctx = context(&engine);
        drop(engine);
        drop(headless);

        let event = ClickEvent::new(ScreenPoint::new(10.0, 10.0), LngLat::new(0.0, 0.0));
        handle_click(&ctx, &LayerIds::new(2, "category-thumb-"), &event);
        assert!(!event.default_prevented());
    }
}
