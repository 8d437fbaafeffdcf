use std::fmt;

use glam::{Vec2, Vec3, Vec4};
use serde::Deserialize;

use crate::camera::SceneCamera;
use crate::plot::PlotId;
use crate::protocol::SceneDescriptor;

/// Host-assigned scene identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct SceneId(String);

impl SceneId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SceneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SceneId {
    fn from(id: &str) -> Self {
        SceneId(id.to_string())
    }
}

impl From<String> for SceneId {
    fn from(id: String) -> Self {
        SceneId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub ambient: Vec3,
    pub color: Vec3,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            ambient: Vec3::splat(0.35),
            color: Vec3::splat(0.7),
        }
    }
}

/// Viewport rectangle in physical pixels, origin top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// A node of the scene tree. Children and plots are referenced by id and
/// owned by the registry.
#[derive(Debug, Clone)]
pub struct Scene {
    pub id: SceneId,
    pub parent: Option<SceneId>,
    /// `[x, y, width, height]` in unitless pixels, origin bottom-left.
    pub viewport: Option<[f32; 4]>,
    pub background: Vec4,
    pub clear: bool,
    pub visible: bool,
    pub camera: SceneCamera,
    pub light: Light,
    pub children: Vec<SceneId>,
    pub plots: Vec<PlotId>,
}

impl Scene {
    /// Builds the node itself; the registry attaches children and plots.
    pub fn from_descriptor(desc: &SceneDescriptor, parent: Option<SceneId>) -> Self {
        let mut light = Light::default();
        let mut camera = match &desc.light {
            Some(l) => {
                light.ambient = Vec3::from_array(l.ambient);
                light.color = Vec3::from_array(l.color);
                SceneCamera::new(Vec3::from_array(l.direction))
            }
            None => SceneCamera::default(),
        };
        let fallback_resolution = desc
            .viewport
            .map(|[_, _, w, h]| Vec2::new(w, h))
            .unwrap_or(Vec2::ONE);
        match &desc.camera {
            Some(c) => {
                let resolution = if c.resolution == [0.0, 0.0] {
                    fallback_resolution
                } else {
                    c.resolution()
                };
                camera.update_matrices(c.view(), c.projection(), resolution, c.eyeposition());
            }
            None => camera.update_matrices(
                camera.view(),
                camera.projection(),
                fallback_resolution,
                camera.eyeposition(),
            ),
        }
        Self {
            id: desc.uuid.clone(),
            parent,
            viewport: desc.viewport,
            background: Vec4::from_array(desc.backgroundcolor),
            clear: desc.clearscene,
            visible: desc.visible,
            camera,
            light,
            children: Vec::new(),
            plots: Vec::new(),
        }
    }

    /// Whether this scene draws itself. Children are drawn regardless.
    pub fn renders(&self) -> bool {
        self.visible && self.viewport.is_some_and(|[_, _, w, h]| w > 0.0 && h > 0.0)
    }

    /// The viewport in physical pixels of a canvas `canvas` unitless pixels
    /// tall, clamped to the canvas.
    pub fn device_viewport(&self, canvas: Vec2, px_per_unit: f32) -> Option<DeviceRect> {
        let [x, y, w, h] = self.viewport?;
        let top = canvas.y - (y + h);
        let x0 = (x * px_per_unit).max(0.0);
        let y0 = (top * px_per_unit).max(0.0);
        let x1 = ((x + w) * px_per_unit).min(canvas.x * px_per_unit);
        let y1 = ((top + h) * px_per_unit).min(canvas.y * px_per_unit);
        (x1 > x0 && y1 > y0).then_some(DeviceRect {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        })
    }
}
