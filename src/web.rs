//! Browser hooks.
use std::sync::Arc;

use crate::screen::LivenessProbe;

/// A probe reporting whether the element with `canvas_id` is still attached
/// to the document. A missing element counts as detached.
pub fn canvas_probe(canvas_id: impl Into<String>) -> LivenessProbe {
    let canvas_id = canvas_id.into();
    Arc::new(move || {
        web_sys::window()
            .and_then(|window| window.document())
            .and_then(|document| document.get_element_by_id(&canvas_id))
            .is_some_and(|element| element.is_connected())
    })
}

/// The page's device pixel ratio, 1 when unavailable.
pub fn device_pixel_ratio() -> f32 {
    web_sys::window().map_or(1.0, |window| window.device_pixel_ratio() as f32)
}
