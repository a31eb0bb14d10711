//! Camera and selection response to a dispatched click

use geojson::Feature;
use std::rc::Rc;

use crate::camera::MoveRequest;
use crate::dispatch::ClickContext;
use crate::engine::{LngLat, MapEngine};
use crate::features::{feature_cluster_id, feature_place_id};
use crate::layers::LayerIds;
use crate::places::PlaceIndex;

impl ClickContext {
    /// Zoom into a clicked cluster, just past the level where it splits
    pub(crate) fn expand_cluster(
        &self,
        map: &Rc<dyn MapEngine>,
        ids: &LayerIds,
        cluster: &Feature,
        at: LngLat,
    ) {
        let Some(cluster_id) = feature_cluster_id(cluster) else {
            tracing::debug!("Cluster feature on {} has no cluster_id", ids.cluster);
            return;
        };

        let camera = self.camera.clone();
        let token = self.token.clone();
        let overshoot = self.settings.expansion_overshoot;
        let source = ids.source.clone();

        map.cluster_expansion_zoom(
            &ids.source,
            cluster_id,
            Box::new(move |result| {
                if !token.is_current() {
                    tracing::debug!("Dropping stale expansion zoom for cluster {}", cluster_id);
                    return;
                }
                let zoom = match result {
                    Ok(Some(zoom)) if zoom.is_finite() => zoom,
                    Ok(_) => {
                        tracing::debug!(
                            "No expansion zoom for cluster {} in {}",
                            cluster_id,
                            source
                        );
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Expansion zoom for cluster {} failed: {}", cluster_id, e);
                        return;
                    }
                };
                camera.handle_map_move(MoveRequest::new(at.lat, at.lng, zoom + overshoot));
            }),
        );
    }

    /// Select a clicked marker and center it under its popup
    pub(crate) fn select_marker(
        &self,
        map: &Rc<dyn MapEngine>,
        places: &PlaceIndex,
        marker: &Feature,
    ) {
        let Some(id) = feature_place_id(marker) else {
            tracing::debug!("Marker feature has no id");
            return;
        };
        let Some(place) = places.get(&id) else {
            tracing::debug!("Unknown place {}", id);
            return;
        };

        self.selection.set_marker_popup(Some(place.id.clone()));

        let selection = self.selection.clone();
        let released = place.id.clone();
        self.camera.handle_map_move(
            MoveRequest::new(place.latitude, place.longitude, map.zoom())
                .without_fly()
                .with_offset(self.settings.popup_offset)
                .on_release(move || selection.release(&released)),
        );
    }
}
