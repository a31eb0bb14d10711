//! Active selection (marker popup) store

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{ClickEvent, ClickHandler};
use crate::places::PlaceId;

pub trait SelectionStore {
    fn set_marker_popup(&self, place: Option<PlaceId>);

    fn marker_popup(&self) -> Option<PlaceId>;

    /// Clear the selection only if it still shows `place`
    fn release(&self, place: &str) {
        if self.marker_popup().as_deref() == Some(place) {
            self.set_marker_popup(None);
        }
    }
}

/// In-memory single-slot selection shared by clones
#[derive(Debug, Clone, Default)]
pub struct MarkerPopup {
    current: Rc<RefCell<Option<PlaceId>>>,
}

impl MarkerPopup {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for MarkerPopup {
    fn set_marker_popup(&self, place: Option<PlaceId>) {
        let mut current = self.current.borrow_mut();
        if *current != place {
            tracing::debug!("Marker popup {:?} -> {:?}", *current, place);
        }
        *current = place;
    }

    fn marker_popup(&self) -> Option<PlaceId> {
        self.current.borrow().clone()
    }
}

/// Map-wide click handler closing the popup, unless a layer handler took the click
pub fn deselect_on_map_click(selection: Rc<dyn SelectionStore>) -> ClickHandler {
    Rc::new(move |event: &ClickEvent| {
        if event.default_prevented() {
            return;
        }
        selection.set_marker_popup(None);
    })
}
