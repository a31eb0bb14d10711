//! Category icon registration

use std::rc::Rc;

use crate::engine::MapEngine;
use crate::epoch::EpochToken;
use crate::layers::LayerIds;
use crate::places::CategoryIndex;

/// Load a category's icon and register it under its icon key.
///
/// Does nothing if the category has no icon or the key is already
/// registered. The result is installed only while `token` is current and
/// the key is still free.
pub fn load_category_icon(
    map: &Rc<dyn MapEngine>,
    categories: &CategoryIndex,
    ids: &LayerIds,
    token: EpochToken,
) {
    let Some(url) = categories.icon(ids.category) else {
        return;
    };
    if map.has_image(&ids.icon_key) {
        tracing::debug!("Icon {} already registered", ids.icon_key);
        return;
    }

    let weak = Rc::downgrade(map);
    let key = ids.icon_key.clone();
    let source = url.to_string();
    map.load_image(
        url,
        Box::new(move |result| {
            if !token.is_current() {
                tracing::debug!("Dropping stale icon {}", key);
                return;
            }
            let Some(map) = weak.upgrade() else {
                return;
            };
            match result {
                Ok(Some(image)) => {
                    if map.has_image(&key) {
                        return;
                    }
                    tracing::debug!("Registered icon {} ({}x{})", key, image.width, image.height);
                    map.add_image(&key, image);
                }
                Ok(None) => tracing::debug!("Icon {} returned no image", source),
                Err(e) => tracing::warn!("Icon {} failed to load: {}", source, e),
            }
        }),
    );
}

pub fn remove_icon(map: &dyn MapEngine, ids: &LayerIds) {
    if map.has_image(&ids.icon_key) {
        map.remove_image(&ids.icon_key);
    }
}
