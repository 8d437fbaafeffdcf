use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::camera::{CameraSpace, SceneCamera};
use crate::error::{Error, Result};
use crate::geometry::CommitOutcome;
use crate::line::{
    self, LineContext, LineLayout, LinePlot,
    shader::{ColorInput, LineShader},
};
use crate::protocol::PlotDescriptor;
use crate::scene::SceneId;
use crate::uniform::{
    AttributeData, RawUniform, Uniform, UniformSet, deserialize_attribute, deserialize_uniform,
};

/// Host-assigned plot identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(transparent)]
pub struct PlotId(String);

impl PlotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PlotId {
    fn from(id: &str) -> Self {
        PlotId(id.to_string())
    }
}

impl From<String> for PlotId {
    fn from(id: String) -> Self {
        PlotId(id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlotType {
    Lines,
    LineSegments,
}

impl FromStr for PlotType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Lines" => Ok(PlotType::Lines),
            "LineSegments" => Ok(PlotType::LineSegments),
            other => Err(Error::UnknownPlotType(other.to_string())),
        }
    }
}

/// The renderable behind a plot, one variant per supported plot type.
#[derive(Debug, Clone)]
pub enum PlotKind {
    Lines(LinePlot),
    LineSegments(LinePlot),
}

impl PlotKind {
    pub fn plot_type(&self) -> PlotType {
        match self {
            PlotKind::Lines(_) => PlotType::Lines,
            PlotKind::LineSegments(_) => PlotType::LineSegments,
        }
    }

    pub fn line(&self) -> &LinePlot {
        match self {
            PlotKind::Lines(line) | PlotKind::LineSegments(line) => line,
        }
    }

    pub fn line_mut(&mut self) -> &mut LinePlot {
        match self {
            PlotKind::Lines(line) | PlotKind::LineSegments(line) => line,
        }
    }
}

/// Uniforms a line accepts even when the host did not send them initially.
const OPTIONAL_UNIFORMS: &[&str] = &["pattern", "colormap"];

#[derive(Debug, Clone)]
pub struct Plot {
    id: PlotId,
    kind: PlotKind,
    scene: SceneId,
    space: CameraSpace,
    pub visible: bool,
    pub zvalue: f32,
    uniforms: UniformSet,
}

impl Plot {
    /// Builds a plot from its descriptor and binds it to `scene`'s camera.
    pub fn new(desc: PlotDescriptor, scene: SceneId, camera: &SceneCamera) -> Result<Self> {
        let plot_type: PlotType = desc.plot_type.parse()?;
        let space: CameraSpace = desc.cam_space.parse()?;

        let mut attributes = indexmap::IndexMap::new();
        for (name, value) in &desc.attributes {
            attributes.insert(name.clone(), deserialize_attribute(name, value)?);
        }
        let layout = match plot_type {
            PlotType::Lines => LineLayout::Polyline,
            PlotType::LineSegments => LineLayout::Segments,
        };
        let line = LinePlot::new(desc.uuid.clone(), layout, attributes, desc.ndim)?;

        let mut uniforms = UniformSet::new();
        for (name, value) in desc.uniforms {
            let uniform = deserialize_uniform(&name, value)?;
            line::set_uniform(&mut uniforms, &name, uniform)?;
        }
        line.default_uniforms(&mut uniforms, space);

        let kind = match plot_type {
            PlotType::Lines => PlotKind::Lines(line),
            PlotType::LineSegments => PlotKind::LineSegments(line),
        };
        let mut plot = Self {
            id: desc.uuid,
            kind,
            scene,
            space,
            visible: desc.visible,
            zvalue: desc.zvalue,
            uniforms,
        };
        plot.sync(camera)?;
        Ok(plot)
    }

    pub fn id(&self) -> &PlotId {
        &self.id
    }

    pub fn kind(&self) -> &PlotKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut PlotKind {
        &mut self.kind
    }

    pub fn scene(&self) -> &SceneId {
        &self.scene
    }

    pub fn space(&self) -> CameraSpace {
        self.space
    }

    pub fn uniforms(&self) -> &UniformSet {
        &self.uniforms
    }

    pub fn uniforms_mut(&mut self) -> &mut UniformSet {
        &mut self.uniforms
    }

    fn line_context(&self, camera: &SceneCamera) -> LineContext {
        LineContext {
            to_clip: camera.to_clip(self.space) * LinePlot::model(&self.uniforms),
            resolution: camera.resolution(),
            pattern: self.uniforms.get("pattern").is_some_and(Uniform::is_texture),
        }
    }

    fn sync(&mut self, camera: &SceneCamera) -> Result<CommitOutcome> {
        let ctx = self.line_context(camera);
        self.kind.line_mut().sync(&ctx)
    }

    /// Applies host updates in order, then commits the geometry once. Updates
    /// before a failing one stay applied.
    pub fn update(&mut self, updates: Vec<(String, Value)>, camera: &SceneCamera) -> Result<()> {
        let mut result = Ok(());
        for (key, value) in updates {
            if let Err(err) = self.apply(&key, value) {
                result = Err(err);
                break;
            }
        }
        let outcome = self.sync(camera)?;
        debug!("{}: update committed ({outcome:?})", self.id);
        result
    }

    fn apply(&mut self, key: &str, value: Value) -> Result<()> {
        if key == "visible" {
            self.visible = value
                .as_bool()
                .ok_or_else(|| Error::invalid("visible", "expected a boolean"))?;
            return Ok(());
        }
        if key == "color" {
            return self.apply_color(value);
        }
        let line = self.kind.line_mut();
        if line.is_attribute(key) {
            let AttributeData { data, .. } = deserialize_attribute(key, &value)?;
            return line.set_attribute(key, data);
        }
        if self.uniforms.contains_key(key) || OPTIONAL_UNIFORMS.contains(&key) {
            let uniform = deserialize_uniform(key, RawUniform::Json(value))?;
            return line::set_uniform(&mut self.uniforms, key, uniform);
        }
        // `faces` included: lines have no face buffer
        Err(Error::UnknownBuffer {
            plot: self.id.clone(),
            name: key.to_string(),
        })
    }

    /// `color` may switch between one uniform color and a per-point stream.
    /// A single `[r, g, b, a]` becomes the uniform unless it is exactly the
    /// size of the current per-point stream.
    fn apply_color(&mut self, value: Value) -> Result<()> {
        let line = self.kind.line_mut();
        let single = match deserialize_uniform("color", RawUniform::Json(value.clone()))? {
            Uniform::Vec4(color) => Some(color),
            _ => None,
        };
        let stream_size = match line.color_input() {
            ColorInput::Rgba => Some(4),
            ColorInput::Scalar => Some(1),
            ColorInput::Uniform => None,
        };
        match (single, stream_size) {
            (Some(color), Some(size)) if size * line.point_count() == 4 => {
                line.set_attribute("color", color.to_array().to_vec())
            }
            (Some(color), _) => {
                line.clear_color_attribute();
                self.uniforms.insert("color".to_string(), Uniform::Vec4(color));
                Ok(())
            }
            (None, size) => {
                let mut attr = deserialize_attribute("color", &value)?;
                // flat streams keep the components per point they already have
                if let Some(size) = size {
                    attr.item_size.get_or_insert(size);
                }
                self.uniforms.shift_remove("color");
                line.set_color_attribute(attr)
            }
        }
    }

    /// Called after the owning scene's camera moved.
    pub fn camera_changed(&mut self, camera: &SceneCamera) -> Result<CommitOutcome> {
        let ctx = self.line_context(camera);
        let space = self.space;
        self.kind.line_mut().camera_changed(&ctx, space)
    }

    /// Reparents the plot. Camera bindings are re-resolved against the new
    /// scene; the arc-length stream follows its camera.
    pub fn move_to(&mut self, scene: SceneId, camera: &SceneCamera) -> Result<()> {
        self.scene = scene;
        line::bind_camera(&mut self.uniforms, self.space);
        self.camera_changed(camera)?;
        Ok(())
    }

    pub fn dispose(self) {
        debug!("{}: disposed", self.id);
    }

    /// Maps an instance index from the pick buffer back to a point index.
    pub fn pick_index(&self, instance: u32) -> Option<u32> {
        self.kind.line().point_index(instance)
    }

    pub fn shader(&self) -> LineShader {
        self.kind.line().shader(&self.uniforms)
    }

    pub fn instance_count(&self) -> usize {
        self.kind.line().instance_count()
    }
}
