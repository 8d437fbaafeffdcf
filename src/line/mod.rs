//! Line and line-segment plots.
//!
//! Host arrays are kept as sources. Every sync regathers them into the
//! geometry: polylines go through [`points::nan_free_points_indices`] so each
//! run carries its neighbour padding, segments are uploaded pairwise.
use std::f32::consts::FRAC_PI_3;

use glam::{Mat4, Vec2, Vec4};
use indexmap::IndexMap;
use log::debug;

use crate::camera::{CameraBinding, CameraSpace};
use crate::error::{Error, Result};
use crate::geometry::{CommitOutcome, Geometry, ViewSpec};
use crate::layout::{UniformLayout, WgslType};
use crate::plot::PlotId;
use crate::uniform::{AttributeData, TypedBuffer, Uniform, UniformSet};

pub mod joint;
pub mod points;
pub mod shader;

use points::Slot;
use shader::{ColorInput, LineShader};

/// Smallest inner angle that still gets a sharp miter.
pub const DEFAULT_MITER_LIMIT: f32 = FRAC_PI_3;
pub const MAX_CLIP_PLANES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineLayout {
    /// Consecutive points are connected.
    Polyline,
    /// Every pair of points is an independent segment.
    Segments,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCap {
    Butt = 0,
    Square = 1,
    Round = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineJoin {
    Miter = 0,
    Round = 1,
    Bevel = 2,
}

impl TryFrom<f32> for LineCap {
    type Error = Error;

    fn try_from(value: f32) -> Result<Self> {
        match value.round() as i32 {
            0 => Ok(LineCap::Butt),
            1 => Ok(LineCap::Square),
            2 => Ok(LineCap::Round),
            _ => Err(Error::invalid("linecap", format!("unknown cap {value}"))),
        }
    }
}

impl TryFrom<f32> for LineJoin {
    type Error = Error;

    fn try_from(value: f32) -> Result<Self> {
        match value.round() as i32 {
            0 => Ok(LineJoin::Miter),
            1 => Ok(LineJoin::Round),
            2 => Ok(LineJoin::Bevel),
            _ => Err(Error::invalid("joinstyle", format!("unknown join {value}"))),
        }
    }
}

/// Per-frame inputs to a line sync.
#[derive(Debug, Clone, Copy)]
pub struct LineContext {
    /// Positions to clip space, model included.
    pub to_clip: Mat4,
    /// Scene resolution in unitless pixels.
    pub resolution: Vec2,
    pub pattern: bool,
}

#[derive(Debug, Clone)]
struct Source {
    data: Vec<f32>,
    size: usize,
}

impl Source {
    fn points(&self) -> usize {
        self.data.len() / self.size.max(1)
    }
}

#[derive(Debug, Clone)]
pub struct LinePlot {
    layout: LineLayout,
    ndim: usize,
    color: ColorInput,
    per_point_width: bool,
    sources: IndexMap<String, Source>,
    slots: Vec<Slot>,
    lastlen: Vec<f32>,
    geometry: Geometry,
}

impl LinePlot {
    /// Builds a line from the host's attribute arrays. `positions` is required;
    /// `color` (RGBA or scalar) and `linewidth` are optional per-point streams.
    pub fn new(
        id: PlotId,
        layout: LineLayout,
        attributes: IndexMap<String, AttributeData>,
        ndim_hint: Option<usize>,
    ) -> Result<Self> {
        let positions = attributes
            .get("positions")
            .ok_or_else(|| Error::invalid("positions", "line plots need positions"))?;
        let ndim = positions.item_size.or(ndim_hint).unwrap_or(2);
        if !(2..=3).contains(&ndim) {
            return Err(Error::invalid("positions", format!("{ndim}-dimensional points")));
        }
        let n = positions.data.len() / ndim;

        let mut sources = IndexMap::new();
        let mut color = ColorInput::Uniform;
        let mut per_point_width = false;
        for (name, attr) in attributes {
            let size = match name.as_str() {
                "positions" => ndim,
                "color" => {
                    let (input, size) = color_stream(&attr, n)?;
                    color = input;
                    size
                }
                "linewidth" => {
                    per_point_width = true;
                    1
                }
                _ => return Err(Error::UnknownBuffer { plot: id.clone(), name }),
            };
            sources.insert(name, Source { data: attr.data, size });
        }

        let spec = match layout {
            LineLayout::Polyline => ViewSpec::polyline(),
            LineLayout::Segments => ViewSpec::segments(),
        };
        let attribute_spec = match layout {
            LineLayout::Polyline => ViewSpec::polyline_attributes(),
            LineLayout::Segments => ViewSpec::segments(),
        };
        let geometry = Geometry::new(id)
            .with_buffer("positions", &[("positions", ndim + 1)], spec)
            .with_buffer(
                "attributes",
                &attribute_fields(color, per_point_width),
                attribute_spec,
            );

        Ok(Self {
            layout,
            ndim,
            color,
            per_point_width,
            sources,
            slots: Vec::new(),
            lastlen: Vec::new(),
            geometry,
        })
    }

    pub fn layout(&self) -> LineLayout {
        self.layout
    }

    pub fn ndim(&self) -> usize {
        self.ndim
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn geometry_mut(&mut self) -> &mut Geometry {
        &mut self.geometry
    }

    pub fn is_attribute(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    /// Replaces a source array. Takes effect on the next [`sync`](Self::sync).
    pub fn set_attribute(&mut self, name: &str, data: Vec<f32>) -> Result<()> {
        let source = self.sources.get_mut(name).ok_or_else(|| Error::UnknownBuffer {
            plot: self.geometry.owner().clone(),
            name: name.to_string(),
        })?;
        source.data = data;
        Ok(())
    }

    pub fn color_input(&self) -> ColorInput {
        self.color
    }

    /// Makes `color` a per-point stream, RGBA or scalar depending on its
    /// shape. The attribute buffer is rebuilt when the kind changes.
    pub fn set_color_attribute(&mut self, attr: AttributeData) -> Result<()> {
        let (color, size) = color_stream(&attr, self.point_count())?;
        self.sources.insert(
            "color".to_string(),
            Source {
                data: attr.data,
                size,
            },
        );
        if color != self.color {
            self.color = color;
            self.rebuild_attributes();
        }
        Ok(())
    }

    /// Drops the per-point color stream so the `color` uniform applies.
    pub fn clear_color_attribute(&mut self) {
        if self.sources.shift_remove("color").is_some() {
            self.color = ColorInput::Uniform;
            self.rebuild_attributes();
        }
    }

    fn rebuild_attributes(&mut self) {
        let spec = match self.layout {
            LineLayout::Polyline => ViewSpec::polyline_attributes(),
            LineLayout::Segments => ViewSpec::segments(),
        };
        let fields = attribute_fields(self.color, self.per_point_width);
        self.geometry.replace_buffer("attributes", &fields, spec);
        debug!(
            "{}: color is now {:?}",
            self.geometry.owner(),
            self.color
        );
    }

    pub(crate) fn point_count(&self) -> usize {
        self.sources.get("positions").map(Source::points).unwrap_or(0)
    }

    /// Sources whose length disagrees with the positions.
    fn mismatched(&self) -> Vec<&str> {
        let n = self.point_count();
        self.sources
            .iter()
            .filter(|(_, s)| s.points() != n || s.data.len() % s.size.max(1) != 0)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Rebuilds every geometry field from the sources and commits. While the
    /// sources disagree in length the geometry keeps its previous, consistent
    /// contents and the sync is deferred.
    pub fn sync(&mut self, ctx: &LineContext) -> Result<CommitOutcome> {
        let mismatched = self.mismatched();
        if !mismatched.is_empty() {
            debug!(
                "{}: waiting for {mismatched:?} to match {} points",
                self.geometry.owner(),
                self.point_count()
            );
            return Ok(CommitOutcome::Deferred);
        }
        let positions = self
            .sources
            .get("positions")
            .map(|s| s.data.clone())
            .unwrap_or_default();
        if self.layout == LineLayout::Polyline {
            self.slots = points::nan_free_points_indices(&positions, self.ndim);
        }
        self.lastlen = if ctx.pattern {
            self.compute_lastlen(&positions, ctx)
        } else {
            vec![0.0; self.point_count()]
        };

        let mut fields: Vec<(String, Vec<f32>)> = Vec::new();
        fields.push(("positions".to_string(), self.gather_positions(&positions)));
        for (name, source) in &self.sources {
            if name != "positions" {
                fields.push((name.clone(), self.gather(&source.data, source.size)));
            }
        }
        fields.push(("lastlen".to_string(), self.gather(&self.lastlen, 1)));
        self.write(fields)
    }

    /// Recomputes the arc-length stream after a camera change. Only lines with
    /// a pattern whose positions move with the camera need it.
    pub fn camera_changed(
        &mut self,
        ctx: &LineContext,
        space: CameraSpace,
    ) -> Result<CommitOutcome> {
        if !ctx.pattern || !space.follows_camera() || !self.mismatched().is_empty() {
            return Ok(CommitOutcome::Unchanged);
        }
        let positions = self
            .sources
            .get("positions")
            .map(|s| s.data.clone())
            .unwrap_or_default();
        self.lastlen = self.compute_lastlen(&positions, ctx);
        let gathered = self.gather(&self.lastlen, 1);
        self.write(vec![("lastlen".to_string(), gathered)])
    }

    fn write(&mut self, fields: Vec<(String, Vec<f32>)>) -> Result<CommitOutcome> {
        for (name, data) in fields {
            self.geometry.update(&name, data)?;
        }
        Ok(self.geometry.commit())
    }

    fn compute_lastlen(&self, positions: &[f32], ctx: &LineContext) -> Vec<f32> {
        match self.layout {
            LineLayout::Polyline => {
                points::compute_lastlen(positions, self.ndim, ctx.to_clip, ctx.resolution)
            }
            LineLayout::Segments => {
                points::compute_lastlen_segments(positions, self.ndim, ctx.to_clip, ctx.resolution)
            }
        }
    }

    fn gather(&self, data: &[f32], size: usize) -> Vec<f32> {
        match self.layout {
            LineLayout::Polyline => points::gather(data, size, &self.slots),
            LineLayout::Segments => data.to_vec(),
        }
    }

    fn gather_positions(&self, positions: &[f32]) -> Vec<f32> {
        match self.layout {
            LineLayout::Polyline => points::gather_positions(positions, self.ndim, &self.slots),
            LineLayout::Segments => points::flag_positions(positions, self.ndim),
        }
    }

    /// Maps a drawn instance back to the index of its first point in the
    /// host's positions array.
    pub fn point_index(&self, instance: u32) -> Option<u32> {
        match self.layout {
            LineLayout::Polyline => match self.slots.get(instance as usize + 1)? {
                Slot::Point(i) => Some(*i),
                _ => None,
            },
            LineLayout::Segments => {
                let index = instance.checked_mul(2)?;
                ((index as usize) < self.point_count()).then_some(index)
            }
        }
    }

    pub fn instance_count(&self) -> usize {
        self.geometry.instance_count()
    }

    /// Shader inputs for the current uniform set. Members are sorted so that
    /// equal sets give equal source.
    pub fn shader(&self, uniforms: &UniformSet) -> LineShader {
        let mut members: Vec<(String, WgslType)> = uniforms
            .iter()
            .filter(|(name, _)| !self.is_attribute(name))
            .filter_map(|(name, value)| WgslType::of(value).map(|ty| (name.clone(), ty)))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        LineShader {
            layout: self.layout,
            ndim: self.ndim,
            color: self.color,
            per_point_width: self.per_point_width,
            pattern: has_texture(uniforms, "pattern"),
            colormap: has_texture(uniforms, "colormap"),
            uniforms: UniformLayout::new(members),
        }
    }

    /// Fills in every uniform the line shader reads that the host left out,
    /// and binds the camera matrices for `space`.
    pub fn default_uniforms(&self, uniforms: &mut UniformSet, space: CameraSpace) {
        let defaults = [
            ("linewidth", Uniform::Float(1.0)),
            ("color", Uniform::Vec4(Vec4::new(0.0, 0.0, 0.0, 1.0))),
            ("linecap", Uniform::Float(LineCap::Butt as u8 as f32)),
            ("joinstyle", Uniform::Float(LineJoin::Miter as u8 as f32)),
            ("miter_limit", Uniform::Float(joint::miter_limit_threshold(DEFAULT_MITER_LIMIT))),
            ("pattern_length", Uniform::Float(1.0)),
            ("model", Uniform::Mat4(Mat4::IDENTITY)),
            ("depth_shift", Uniform::Float(0.0)),
            ("px_per_unit", Uniform::Float(1.0)),
            ("colorrange", Uniform::Vec2(Vec2::new(0.0, 1.0))),
            ("object_id", Uniform::Float(0.0)),
            ("num_clip_planes", Uniform::Float(0.0)),
            (
                "clip_planes",
                Uniform::Buffer(TypedBuffer::Float32(vec![0.0; 4 * MAX_CLIP_PLANES])),
            ),
        ];
        for (name, value) in defaults {
            if !self.is_attribute(name) && !uniforms.contains_key(name) {
                uniforms.insert(name.to_string(), value);
            }
        }
        bind_camera(uniforms, space);
    }

    /// Model matrix currently in effect.
    pub fn model(uniforms: &UniformSet) -> Mat4 {
        match uniforms.get("model") {
            Some(Uniform::Mat4(m)) => *m,
            _ => Mat4::IDENTITY,
        }
    }
}

/// Kind and components per point of a color stream for `points` points.
fn color_stream(attr: &AttributeData, points: usize) -> Result<(ColorInput, usize)> {
    let size = match attr.item_size {
        Some(size) => size,
        None if points > 0 && attr.data.len() == 4 * points => 4,
        None => 1,
    };
    match size {
        4 => Ok((ColorInput::Rgba, 4)),
        1 => Ok((ColorInput::Scalar, 1)),
        other => Err(Error::invalid("color", format!("{other} components"))),
    }
}

/// Field layout of the per-point attribute buffer.
fn attribute_fields(color: ColorInput, per_point_width: bool) -> Vec<(&'static str, usize)> {
    let mut fields = Vec::new();
    match color {
        ColorInput::Rgba => fields.push(("color", 4)),
        ColorInput::Scalar => fields.push(("color", 1)),
        ColorInput::Uniform => {}
    }
    if per_point_width {
        fields.push(("linewidth", 1));
    }
    fields.push(("lastlen", 1));
    fields
}

fn has_texture(uniforms: &UniformSet, name: &str) -> bool {
    uniforms.get(name).is_some_and(Uniform::is_texture)
}

/// Points the camera-derived uniforms at `space`. Re-run when a plot moves
/// to another scene or changes space.
pub fn bind_camera(uniforms: &mut UniformSet, space: CameraSpace) {
    uniforms.insert(
        "projectionview".to_string(),
        Uniform::Camera(CameraBinding::SpaceToClip(space)),
    );
    uniforms.insert(
        "resolution".to_string(),
        Uniform::Camera(CameraBinding::Resolution),
    );
}

/// Stores a host-provided uniform, converting the values the line shader
/// consumes in a derived form.
pub fn set_uniform(uniforms: &mut UniformSet, name: &str, value: Uniform) -> Result<()> {
    match name {
        "miter_limit" => {
            let angle = value
                .as_f32()
                .ok_or_else(|| Error::invalid(name, "expected an angle"))?;
            uniforms.insert(
                name.to_string(),
                Uniform::Float(joint::miter_limit_threshold(angle)),
            );
        }
        "linecap" => {
            let v = value.as_f32().ok_or_else(|| Error::invalid(name, "expected a number"))?;
            uniforms.insert(name.to_string(), Uniform::Float(LineCap::try_from(v)? as u8 as f32));
        }
        "joinstyle" => {
            let v = value.as_f32().ok_or_else(|| Error::invalid(name, "expected a number"))?;
            uniforms.insert(name.to_string(), Uniform::Float(LineJoin::try_from(v)? as u8 as f32));
        }
        "clip_planes" => {
            let planes = clip_planes(&value)?;
            uniforms.insert(
                "num_clip_planes".to_string(),
                Uniform::Float((planes.len() / 4) as f32),
            );
            let mut padded = planes;
            padded.resize(4 * MAX_CLIP_PLANES, 0.0);
            uniforms.insert(name.to_string(), Uniform::Buffer(TypedBuffer::Float32(padded)));
        }
        _ => {
            uniforms.insert(name.to_string(), value);
        }
    }
    Ok(())
}

/// Flattens one plane or a list of planes, each `(normal, distance)`.
fn clip_planes(value: &Uniform) -> Result<Vec<f32>> {
    let flat = match value {
        Uniform::Vec4(v) => v.to_array().to_vec(),
        Uniform::Mat4(m) => m.to_cols_array().to_vec(),
        Uniform::Buffer(b) => b.to_f32(),
        Uniform::List(items) if items.is_empty() => Vec::new(),
        _ => return Err(Error::invalid("clip_planes", "expected vec4 planes")),
    };
    if flat.len() % 4 != 0 {
        return Err(Error::invalid("clip_planes", "expected vec4 planes"));
    }
    if flat.len() > 4 * MAX_CLIP_PLANES {
        return Err(Error::invalid(
            "clip_planes",
            format!("at most {MAX_CLIP_PLANES} planes are supported"),
        ));
    }
    Ok(flat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(items: &[(&str, Vec<f32>, Option<usize>)]) -> IndexMap<String, AttributeData> {
        items
            .iter()
            .map(|(name, data, item_size)| {
                (
                    name.to_string(),
                    AttributeData {
                        data: data.clone(),
                        item_size: *item_size,
                    },
                )
            })
            .collect()
    }

    fn ctx() -> LineContext {
        LineContext {
            to_clip: Mat4::orthographic_rh_gl(0.0, 10.0, 0.0, 10.0, -1.0, 1.0),
            resolution: Vec2::new(100.0, 100.0),
            pattern: false,
        }
    }

    fn corner() -> LinePlot {
        let mut line = LinePlot::new(
            PlotId::from("l"),
            LineLayout::Polyline,
            attrs(&[
                ("positions", vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0], Some(2)),
                ("color", vec![1.0; 12], None),
            ]),
            None,
        )
        .unwrap();
        assert_eq!(line.sync(&ctx()).unwrap(), CommitOutcome::Reallocated);
        line
    }

    #[test]
    fn test_polyline_instances_and_pick_mapping() {
        let line = corner();
        // three points give two segments
        assert_eq!(line.instance_count(), 2);
        assert_eq!(line.point_index(0), Some(0));
        assert_eq!(line.point_index(1), Some(1));
        assert_eq!(line.point_index(2), Some(2));
        assert_eq!(line.point_index(3), None);
    }

    #[test]
    fn test_mismatched_lengths_defer() {
        let mut line = corner();
        let generation = line.geometry().generation();
        line.set_attribute("color", vec![0.5; 16]).unwrap();
        assert_eq!(line.sync(&ctx()).unwrap(), CommitOutcome::Deferred);
        assert_eq!(line.geometry().generation(), generation);
        assert_eq!(line.instance_count(), 2);

        line.set_attribute("positions", vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0])
            .unwrap();
        assert_eq!(line.sync(&ctx()).unwrap(), CommitOutcome::Reallocated);
        assert_eq!(line.geometry().generation(), generation + 1);
        assert_eq!(line.instance_count(), 3);
        assert_eq!(line.point_index(2), Some(2));
    }

    #[test]
    fn test_nan_gaps_map_back_to_source_indices() {
        let mut line = LinePlot::new(
            PlotId::from("gappy"),
            LineLayout::Polyline,
            attrs(&[(
                "positions",
                vec![0.0, 0.0, 1.0, 0.0, f32::NAN, f32::NAN, 2.0, 0.0, 3.0, 0.0],
                None,
            )]),
            Some(2),
        )
        .unwrap();
        line.sync(&ctx()).unwrap();
        // slots: pad 0 1 pad | break | pad 3 4 pad
        assert_eq!(line.point_index(0), Some(0));
        assert_eq!(line.point_index(5), Some(3));
        assert_eq!(line.point_index(3), None);
    }

    #[test]
    fn test_segments_pick_even_points() {
        let mut line = LinePlot::new(
            PlotId::from("segs"),
            LineLayout::Segments,
            attrs(&[("positions", vec![0.0, 0.0, 1.0, 0.0, 5.0, 5.0, 6.0, 5.0], Some(2))]),
            None,
        )
        .unwrap();
        line.sync(&ctx()).unwrap();
        assert_eq!(line.instance_count(), 2);
        assert_eq!(line.point_index(1), Some(2));
        assert_eq!(line.point_index(2), None);
    }

    #[test]
    fn test_lastlen_only_with_pattern() {
        let mut line = corner();
        let lastlen = |line: &LinePlot| {
            let buffer = line.geometry().buffer("attributes").unwrap();
            let offset = buffer.fields().iter().find(|f| f.name == "lastlen").unwrap().offset;
            buffer
                .data()
                .chunks_exact(buffer.record())
                .map(|r| r[offset])
                .collect::<Vec<_>>()
        };
        assert!(lastlen(&line).iter().all(|v| *v == 0.0));

        let near = |got: &[f32], want: [f32; 3]| {
            assert!(
                got.iter().zip(want).all(|(g, w)| (g - w).abs() < 1e-3),
                "{got:?} != {want:?}"
            );
        };
        let patterned = LineContext { pattern: true, ..ctx() };
        line.sync(&patterned).unwrap();
        // pad, 0, 100, 200, pad
        near(&lastlen(&line)[1..4], [0.0, 100.0, 200.0]);

        let zoomed = LineContext {
            to_clip: Mat4::orthographic_rh_gl(0.0, 20.0, 0.0, 20.0, -1.0, 1.0),
            ..patterned
        };
        assert_eq!(
            line.camera_changed(&zoomed, CameraSpace::Data).unwrap(),
            CommitOutcome::Unchanged
        );
        near(&lastlen(&line)[1..4], [0.0, 50.0, 100.0]);
        line.camera_changed(&patterned, CameraSpace::Relative).unwrap();
        near(&lastlen(&line)[1..4], [0.0, 50.0, 100.0]);
    }

    #[test]
    fn test_sync_reports_undeclared_fields() {
        let mut line = corner();
        line.geometry_mut().replace_buffer(
            "attributes",
            &[("lastlen", 1)],
            ViewSpec::polyline_attributes(),
        );
        let err = line.sync(&ctx()).unwrap_err();
        assert!(matches!(err, Error::UnknownBuffer { name, .. } if name == "color"));
    }

    #[test]
    fn test_color_kind_switch_rebuilds_attributes() {
        let mut line = corner();
        line.clear_color_attribute();
        assert_eq!(line.color_input(), ColorInput::Uniform);
        assert_eq!(line.sync(&ctx()).unwrap(), CommitOutcome::Reallocated);
        assert_eq!(line.geometry().buffer("attributes").unwrap().record(), 1);
        assert_eq!(line.instance_count(), 2);

        line.set_color_attribute(AttributeData {
            data: vec![0.0, 0.5, 1.0],
            item_size: None,
        })
        .unwrap();
        assert_eq!(line.color_input(), ColorInput::Scalar);
        assert_eq!(line.sync(&ctx()).unwrap(), CommitOutcome::Reallocated);
        assert_eq!(line.geometry().buffer("attributes").unwrap().record(), 2);
        assert_eq!(line.instance_count(), 2);
    }

    #[test]
    fn test_faces_are_rejected() {
        let err = LinePlot::new(
            PlotId::from("mesh"),
            LineLayout::Polyline,
            attrs(&[("positions", vec![0.0; 4], None), ("faces", vec![0.0; 3], None)]),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownBuffer { name, .. } if name == "faces"));
    }

    #[test]
    fn test_defaults_skip_attributes() {
        let line = corner();
        let mut uniforms = UniformSet::new();
        line.default_uniforms(&mut uniforms, CameraSpace::Pixel);
        assert!(!uniforms.contains_key("color"));
        assert_eq!(uniforms.get("linewidth"), Some(&Uniform::Float(1.0)));
        assert_eq!(
            uniforms.get("projectionview"),
            Some(&Uniform::Camera(CameraBinding::SpaceToClip(CameraSpace::Pixel)))
        );
        let shader = line.shader(&uniforms);
        assert_eq!(shader.color, ColorInput::Rgba);
        assert!(shader.uniforms.contains("clip_planes"));
        assert!(!shader.uniforms.contains("color"));
    }

    #[test]
    fn test_uniform_conversions() {
        let mut uniforms = UniformSet::new();
        set_uniform(&mut uniforms, "miter_limit", Uniform::Float(FRAC_PI_3)).unwrap();
        let Some(Uniform::Float(threshold)) = uniforms.get("miter_limit") else {
            panic!("missing miter limit");
        };
        assert!((threshold - 0.5).abs() < 1e-6);

        set_uniform(&mut uniforms, "clip_planes", Uniform::Vec4(Vec4::new(1.0, 0.0, 0.0, 2.0)))
            .unwrap();
        assert_eq!(uniforms.get("num_clip_planes"), Some(&Uniform::Float(1.0)));
        let Some(Uniform::Buffer(planes)) = uniforms.get("clip_planes") else {
            panic!("missing planes");
        };
        assert_eq!(planes.len(), 32);

        assert!(set_uniform(&mut uniforms, "linecap", Uniform::Float(7.0)).is_err());
        set_uniform(&mut uniforms, "joinstyle", Uniform::Float(2.0)).unwrap();
        assert_eq!(uniforms.get("joinstyle"), Some(&Uniform::Float(2.0)));
    }
}
