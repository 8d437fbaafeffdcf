//! WGSL generation for line plots.
//!
//! Each line gets a shader generated from the inputs it actually has: only the
//! uniforms present in its [`UniformLayout`] are declared, and per-point
//! attributes are read from vertex inputs while everything else falls back to
//! uniforms or constants. Identical plots produce identical source, which is
//! what the renderer keys its pipeline cache on.
use crate::layout::{UniformLayout, WgslType};

use super::LineLayout;

/// Where a line's color comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorInput {
    Uniform,
    /// Per-point RGBA.
    Rgba,
    /// Per-point scalar, mapped through the colormap.
    Scalar,
}

/// One `@location` of the vertex stage and the buffer view feeding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexInput {
    /// Geometry buffer holding the field.
    pub buffer: &'static str,
    /// Strided view of that buffer.
    pub view: &'static str,
    pub field: &'static str,
    pub components: usize,
    pub location: u32,
}

impl VertexInput {
    fn wgsl_name(&self) -> String {
        format!("{}_{}", self.field, self.view)
    }

    fn wgsl_type(&self) -> &'static str {
        match self.components {
            1 => "f32",
            2 => "vec2<f32>",
            3 => "vec3<f32>",
            _ => "vec4<f32>",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineShader {
    pub layout: LineLayout,
    /// 2 or 3.
    pub ndim: usize,
    pub color: ColorInput,
    pub per_point_width: bool,
    pub pattern: bool,
    pub colormap: bool,
    pub uniforms: UniformLayout,
}

pub const PATTERN_BINDING: u32 = 1;
pub const COLORMAP_BINDING: u32 = 2;

const IDENTITY: &str = "mat4x4<f32>(vec4<f32>(1.0, 0.0, 0.0, 0.0), vec4<f32>(0.0, 1.0, 0.0, 0.0), \
     vec4<f32>(0.0, 0.0, 1.0, 0.0), vec4<f32>(0.0, 0.0, 0.0, 1.0))";

impl LineShader {
    pub fn vertex_inputs(&self) -> Vec<VertexInput> {
        let position_views: &[&'static str] = match self.layout {
            LineLayout::Polyline => &["prev", "start", "end", "next"],
            LineLayout::Segments => &["start", "end"],
        };
        let mut inputs: Vec<VertexInput> = position_views
            .iter()
            .map(|&view| VertexInput {
                buffer: "positions",
                view,
                field: "positions",
                components: self.ndim + 1,
                location: 0,
            })
            .collect();

        let mut attributes: Vec<(&'static str, usize)> = Vec::new();
        match self.color {
            ColorInput::Rgba => attributes.push(("color", 4)),
            ColorInput::Scalar => attributes.push(("color", 1)),
            ColorInput::Uniform => {}
        }
        if self.per_point_width {
            attributes.push(("linewidth", 1));
        }
        if self.pattern {
            attributes.push(("lastlen", 1));
        }
        for (field, components) in attributes {
            for view in ["start", "end"] {
                inputs.push(VertexInput {
                    buffer: "attributes",
                    view,
                    field,
                    components,
                    location: 0,
                });
            }
        }
        for (location, input) in inputs.iter_mut().enumerate() {
            input.location = location as u32;
        }
        inputs
    }

    fn uniform_or(&self, name: &str, fallback: &str) -> String {
        if self.uniforms.contains(name) {
            format!("u.{name}")
        } else {
            fallback.to_string()
        }
    }

    fn uniform_type(&self, name: &str) -> Option<WgslType> {
        self.uniforms
            .fields()
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.ty)
    }

    fn color_exprs(&self) -> (String, String, bool) {
        let scalar = |e: &str| format!("vec4<f32>({e}, 0.0, 0.0, 0.0)");
        match self.color {
            ColorInput::Rgba => ("in.color_start".into(), "in.color_end".into(), false),
            ColorInput::Scalar => (scalar("in.color_start"), scalar("in.color_end"), true),
            ColorInput::Uniform => match self.uniform_type("color") {
                Some(WgslType::Vec4) => ("u.color".into(), "u.color".into(), false),
                Some(WgslType::F32) => (scalar("u.color"), scalar("u.color"), true),
                _ => {
                    let black = "vec4<f32>(0.0, 0.0, 0.0, 1.0)".to_string();
                    (black.clone(), black, false)
                }
            },
        }
    }

    fn clips(&self) -> bool {
        self.uniforms.contains("clip_planes") && self.uniforms.contains("num_clip_planes")
    }

    pub fn source(&self) -> String {
        let mut src = String::new();
        src.push_str(&self.uniforms.wgsl_struct("Uniforms"));
        src.push_str("@group(0) @binding(0) var<uniform> u: Uniforms;\n");
        if self.pattern {
            src.push_str(&format!(
                "@group(0) @binding({PATTERN_BINDING}) var pattern_tex: texture_2d<f32>;\n"
            ));
        }
        let (color_start, color_end, scalar_color) = self.color_exprs();
        let colormap = self.colormap && scalar_color;
        if colormap {
            src.push_str(&format!(
                "@group(0) @binding({COLORMAP_BINDING}) var colormap_tex: texture_2d<f32>;\n"
            ));
        }
        src.push_str(COMMON);

        src.push_str("\nstruct VertexInput {\n");
        src.push_str("    @builtin(vertex_index) vertex_index: u32,\n");
        src.push_str("    @builtin(instance_index) instance_index: u32,\n");
        for input in self.vertex_inputs() {
            src.push_str(&format!(
                "    @location({}) {}: {},\n",
                input.location,
                input.wgsl_name(),
                input.wgsl_type()
            ));
        }
        src.push_str("};\n");

        src.push_str(VERTEX_OUTPUT);
        if self.pattern {
            src.push_str(PATTERN_FNS);
        }
        if colormap {
            src.push_str(COLORMAP_FNS);
        }

        let polyline = self.layout == LineLayout::Polyline;
        let (flag, xyz) = if self.ndim >= 3 {
            ("w", "p.xyz")
        } else {
            ("z", "vec3<f32>(p.xy, 0.0)")
        };
        let vecn = if self.ndim >= 3 { "vec4<f32>" } else { "vec3<f32>" };
        let (width_start, width_end) = if self.per_point_width {
            ("in.linewidth_start".to_string(), "in.linewidth_end".to_string())
        } else {
            let w = self.uniform_or("linewidth", "1.0");
            (w.clone(), w)
        };
        let (lastlen_start, lastlen_end) = if self.pattern {
            ("in.lastlen_start", "in.lastlen_end")
        } else {
            ("0.0", "0.0")
        };

        let mut vs = VERTEX_MAIN.to_string();
        vs = vs.replace("$VECN", vecn).replace("$XYZ", xyz).replace("$FLAG", flag);
        vs = vs.replace(
            "$HAS_PREV",
            if polyline { "in.positions_prev.$FLAG > -0.5" } else { "false" },
        );
        vs = vs.replace(
            "$HAS_NEXT",
            if polyline { "in.positions_next.$FLAG > -0.5" } else { "false" },
        );
        vs = vs.replace("$FLAG", flag);
        vs = vs.replace("$CLIP", if self.clips() { CLIP_PLANES } else { "" });
        vs = vs.replace("$PREV_JOINT", if polyline { PREV_JOINT } else { "" });
        vs = vs.replace("$NEXT_JOINT", if polyline { NEXT_JOINT } else { "" });
        vs = vs
            .replace("$COLOR_START", &color_start)
            .replace("$COLOR_END", &color_end)
            .replace("$WIDTH_START", &width_start)
            .replace("$WIDTH_END", &width_end)
            .replace("$LASTLEN_START", lastlen_start)
            .replace("$LASTLEN_END", lastlen_end);
        src.push_str(&vs);

        let mut fs = FRAGMENT.to_string();
        fs = fs.replace("$PATTERN", if self.pattern { PATTERN_SDF } else { "" });
        fs = fs.replace(
            "$COLORMAP",
            if colormap {
                "    color = colormap_lookup(color.x);\n"
            } else if scalar_color {
                "    color = vec4<f32>(color.xxx, 1.0);\n"
            } else {
                ""
            },
        );
        src.push_str(&fs);

        let substitutions = [
            ("$PPU", self.uniform_or("px_per_unit", "1.0")),
            ("$LINECAP", self.uniform_or("linecap", "0.0")),
            ("$JOINSTYLE", self.uniform_or("joinstyle", "0.0")),
            ("$MITER_LIMIT", self.uniform_or("miter_limit", "0.5")),
            ("$DEPTH_SHIFT", self.uniform_or("depth_shift", "0.0")),
            ("$MODEL", self.uniform_or("model", IDENTITY)),
            ("$PATTERN_LENGTH", self.uniform_or("pattern_length", "1.0")),
            ("$OBJECT_ID", self.uniform_or("object_id", "0.0")),
            ("$COLORRANGE", self.uniform_or("colorrange", "vec2<f32>(0.0, 1.0)")),
            ("$PROJECTIONVIEW", self.uniform_or("projectionview", IDENTITY)),
            ("$RESOLUTION", self.uniform_or("resolution", "vec2<f32>(1.0, 1.0)")),
        ];
        for (token, expr) in substitutions {
            src = src.replace(token, &expr);
        }
        src
    }
}

const COMMON: &str = r#"
const AA_RADIUS: f32 = 0.8;
const CAP_BUTT: f32 = 0.0;
const CAP_SQUARE: f32 = 1.0;
const JOINT_MITER: f32 = 3.0;
const JOINT_ROUND: f32 = 4.0;
const JOINT_BEVEL: f32 = 5.0;

struct Joint {
    // bisector and outer-edge normal, in the (along, across) frame of the segment
    miter: vec2<f32>,
    outer: vec2<f32>,
    cos_half: f32,
    kind: f32,
    extension: f32,
};

fn to_local(v: vec2<f32>, dir: vec2<f32>) -> vec2<f32> {
    return vec2<f32>(dot(v, dir), dot(v, vec2<f32>(-dir.y, dir.x)));
}

fn screen_scale() -> vec2<f32> {
    return 0.5 * $RESOLUTION * $PPU;
}

fn to_screen(clip: vec4<f32>) -> vec2<f32> {
    return clip.xy / clip.w * screen_scale();
}

fn make_cap(halfwidth: f32) -> Joint {
    let kind = $LINECAP;
    var extension = halfwidth;
    if (kind == CAP_BUTT) {
        extension = 0.0;
    }
    return Joint(vec2<f32>(1.0, 0.0), vec2<f32>(0.0, 0.0), 1.0, kind, extension);
}

fn make_joint(t_in: vec2<f32>, t_out: vec2<f32>, dir: vec2<f32>, halfwidth: f32) -> Joint {
    let sum = t_in + t_out;
    var mv = t_out;
    if (length(sum) > 1e-3) {
        mv = normalize(sum);
    } else if (length(t_out - t_in) > 1e-6) {
        mv = normalize(t_out - t_in);
    }
    let cos_half = sqrt(max(0.5 * (1.0 + dot(t_in, t_out)), 0.0));
    let turn = select(-1.0, 1.0, t_in.x * t_out.y - t_in.y * t_out.x >= 0.0);
    let outer = -turn * vec2<f32>(-mv.y, mv.x);
    var kind = JOINT_MITER;
    if ($JOINSTYLE == 1.0) {
        kind = JOINT_ROUND;
    } else if ($JOINSTYLE == 2.0 || cos_half < $MITER_LIMIT) {
        kind = JOINT_BEVEL;
    }
    var extension = halfwidth;
    if (kind == JOINT_MITER) {
        let c = max(cos_half, 1e-3);
        extension = halfwidth * sqrt(max(1.0 - c * c, 0.0)) / c;
    }
    return Joint(to_local(mv, dir), to_local(outer, dir), cos_half, kind, extension);
}
"#;

const VERTEX_OUTPUT: &str = r#"
struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    // (along, across) in device pixels relative to the segment start
    @location(0) local: vec2<f32>,
    @location(1) @interpolate(flat) color_start: vec4<f32>,
    @location(2) @interpolate(flat) color_end: vec4<f32>,
    // halfwidth at start, halfwidth at end, segment length
    @location(3) @interpolate(flat) shape: vec4<f32>,
    @location(4) @interpolate(flat) joint_start: vec4<f32>,
    @location(5) @interpolate(flat) joint_end: vec4<f32>,
    // kind at start, kind at end, cos_half at start, cos_half at end
    @location(6) @interpolate(flat) joint_kind: vec4<f32>,
    // arc length at start, at end, joint extension at start, at end
    @location(7) @interpolate(flat) arc: vec4<f32>,
    @location(8) @interpolate(flat) instance: u32,
};
"#;

const PATTERN_FNS: &str = r#"
fn wrap_index(i: i32, n: i32) -> i32 {
    return ((i % n) + n) % n;
}

// Signed distance to the nearest "on" interval of the pattern, in pixels.
fn sample_pattern(arc: f32) -> f32 {
    let period = max($PATTERN_LENGTH * $PPU, 1e-3);
    let n = max(i32(textureDimensions(pattern_tex).x), 1);
    let x = fract(arc / period) * f32(n) - 0.5;
    let i0 = i32(floor(x));
    let f = x - floor(x);
    let a = textureLoad(pattern_tex, vec2<i32>(wrap_index(i0, n), 0), 0).x;
    let b = textureLoad(pattern_tex, vec2<i32>(wrap_index(i0 + 1, n), 0), 0).x;
    return mix(a, b, f) * period;
}
"#;

const COLORMAP_FNS: &str = r#"
fn colormap_lookup(value: f32) -> vec4<f32> {
    let range = $COLORRANGE;
    let span = range.y - range.x;
    let t = clamp(select(0.0, (value - range.x) / span, abs(span) > 1e-12), 0.0, 1.0);
    let n = max(i32(textureDimensions(colormap_tex).x), 1);
    let x = t * f32(n - 1);
    let i0 = min(i32(floor(x)), n - 1);
    let i1 = min(i0 + 1, n - 1);
    let a = textureLoad(colormap_tex, vec2<i32>(i0, 0), 0);
    let b = textureLoad(colormap_tex, vec2<i32>(i1, 0), 0);
    return mix(a, b, x - floor(x));
}
"#;

const CLIP_PLANES: &str = r#"
    for (var i = 0u; i < u32(u.num_clip_planes); i = i + 1u) {
        let plane = u.clip_planes[i];
        let d1 = dot(plane.xyz, w1.xyz) - plane.w;
        let d2 = dot(plane.xyz, w2.xyz) - plane.w;
        if (d1 < 0.0 && d2 < 0.0) {
            return out;
        }
        if (d1 < 0.0) {
            let t = d1 / (d1 - d2);
            w1 = mix(w1, w2, t);
            c1 = mix(c1, c2, t);
            l1 = mix(l1, l2, t);
            has_prev = false;
        } else if (d2 < 0.0) {
            let t = d2 / (d2 - d1);
            w2 = mix(w2, w1, t);
            c2 = mix(c2, c1, t);
            l2 = mix(l2, l1, t);
            has_next = false;
        }
    }
"#;

const PREV_JOINT: &str = r#"
    if (has_prev) {
        let clip0 = $PROJECTIONVIEW * to_world(in.positions_prev);
        let t_in = s1 - to_screen(clip0);
        if (clip0.w > 0.0 && length(t_in) > 1e-5) {
            start = make_joint(normalize(t_in), dir, dir, hw);
        }
    }
"#;

const NEXT_JOINT: &str = r#"
    if (has_next) {
        let clip3 = $PROJECTIONVIEW * to_world(in.positions_next);
        let t_out = to_screen(clip3) - s2;
        if (clip3.w > 0.0 && length(t_out) > 1e-5) {
            end = make_joint(dir, normalize(t_out), dir, hw);
        }
    }
"#;

const VERTEX_MAIN: &str = r#"
fn to_world(p: $VECN) -> vec4<f32> {
    return $MODEL * vec4<f32>($XYZ, 1.0);
}

@vertex
fn vs_main(in: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(-2.0, -2.0, -2.0, 1.0);
    out.instance = in.instance_index;
    if (in.positions_start.$FLAG < 0.5 || in.positions_end.$FLAG < 0.5) {
        return out;
    }

    var w1 = to_world(in.positions_start);
    var w2 = to_world(in.positions_end);
    var c1 = $COLOR_START;
    var c2 = $COLOR_END;
    var l1 = $LASTLEN_START;
    var l2 = $LASTLEN_END;
    var has_prev = $HAS_PREV;
    var has_next = $HAS_NEXT;
$CLIP
    let clip1 = $PROJECTIONVIEW * w1;
    let clip2 = $PROJECTIONVIEW * w2;
    if (clip1.w <= 0.0 || clip2.w <= 0.0) {
        return out;
    }
    let s1 = to_screen(clip1);
    let s2 = to_screen(clip2);
    let seg = s2 - s1;
    let len = length(seg);
    let dir = select(vec2<f32>(1.0, 0.0), seg / max(len, 1e-5), len > 1e-5);
    let normal = vec2<f32>(-dir.y, dir.x);
    let hw1 = 0.5 * $WIDTH_START * $PPU;
    let hw2 = 0.5 * $WIDTH_END * $PPU;
    let hw = max(hw1, hw2);

    var start = make_cap(hw);
    var end = make_cap(hw);
$PREV_JOINT$NEXT_JOINT
    let pad = AA_RADIUS + 1.0;
    var along = -(start.extension + pad);
    if (in.vertex_index >= 2u) {
        along = len + end.extension + pad;
    }
    let side = select(-1.0, 1.0, (in.vertex_index & 1u) == 1u);
    let across = side * (hw + pad);
    let pos = s1 + dir * along + normal * across;

    let t = clamp(along / max(len, 1e-5), 0.0, 1.0);
    let z = mix(clip1.z / clip1.w, clip2.z / clip2.w, t);
    let depth = clamp(0.5 * z + 0.5 + $DEPTH_SHIFT, 0.0, 1.0);

    out.position = vec4<f32>(pos / screen_scale(), depth, 1.0);
    out.local = vec2<f32>(along, across);
    out.color_start = c1;
    out.color_end = c2;
    out.shape = vec4<f32>(hw1, hw2, len, 0.0);
    out.joint_start = vec4<f32>(start.miter, start.outer);
    out.joint_end = vec4<f32>(end.miter, end.outer);
    out.joint_kind = vec4<f32>(start.kind, end.kind, start.cos_half, end.cos_half);
    out.arc = vec4<f32>(l1 * $PPU, l2 * $PPU, start.extension, end.extension);
    return out;
}
"#;

const PATTERN_SDF: &str = r#"
    let reach1 = in.arc.z + AA_RADIUS;
    let reach2 = in.arc.w + AA_RADIUS;
    var pattern = sample_pattern(in.arc.x + p.x);
    // joints take one decision for the whole joint region so both sides agree
    if (in.joint_kind.x >= JOINT_MITER && p.x < reach1) {
        pattern = max(sample_pattern(in.arc.x - reach1), sample_pattern(in.arc.x + reach1));
    } else if (in.joint_kind.y >= JOINT_MITER && p.x > len - reach2) {
        pattern = max(sample_pattern(in.arc.y - reach2), sample_pattern(in.arc.y + reach2));
    }
    sdf = max(sdf, pattern);
"#;

const FRAGMENT: &str = r#"
fn coverage(in: VertexOutput) -> vec4<f32> {
    let p = in.local;
    let hw1 = in.shape.x;
    let hw2 = in.shape.y;
    let len = in.shape.z;
    let t = clamp(p.x / max(len, 1e-5), 0.0, 1.0);
    var sdf = abs(p.y) - mix(hw1, hw2, t);

    let kind1 = in.joint_kind.x;
    if (kind1 < JOINT_MITER) {
        if (kind1 == CAP_BUTT) {
            sdf = max(sdf, -p.x);
        } else if (kind1 == CAP_SQUARE) {
            sdf = max(sdf, -p.x - hw1);
        } else if (p.x < 0.0) {
            sdf = max(sdf, length(p) - hw1);
        }
    } else {
        if (dot(p, in.joint_start.xy) < 0.0) {
            discard;
        }
        if (kind1 == JOINT_ROUND && p.x < 0.0) {
            sdf = max(sdf, length(p) - hw1);
        } else if (kind1 == JOINT_BEVEL) {
            sdf = max(sdf, dot(p, in.joint_start.zw) - hw1 * in.joint_kind.z);
        }
    }

    let q = p - vec2<f32>(len, 0.0);
    let kind2 = in.joint_kind.y;
    if (kind2 < JOINT_MITER) {
        if (kind2 == CAP_BUTT) {
            sdf = max(sdf, q.x);
        } else if (kind2 == CAP_SQUARE) {
            sdf = max(sdf, q.x - hw2);
        } else if (q.x > 0.0) {
            sdf = max(sdf, length(q) - hw2);
        }
    } else {
        if (dot(q, in.joint_end.xy) > 0.0) {
            discard;
        }
        if (kind2 == JOINT_ROUND && q.x > 0.0) {
            sdf = max(sdf, length(q) - hw2);
        } else if (kind2 == JOINT_BEVEL) {
            sdf = max(sdf, dot(q, in.joint_end.zw) - hw2 * in.joint_kind.w);
        }
    }
$PATTERN
    var color = mix(in.color_start, in.color_end, t);
$COLORMAP
    let alpha = smoothstep(-AA_RADIUS, AA_RADIUS, -sdf);
    return vec4<f32>(color.rgb, color.a * alpha);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let color = coverage(in);
    if (color.a <= 0.0) {
        discard;
    }
    return color;
}

@fragment
fn fs_pick(in: VertexOutput) -> @location(0) vec2<u32> {
    let color = coverage(in);
    if (color.a < 0.5) {
        discard;
    }
    return vec2<u32>(u32($OBJECT_ID + 0.5), in.instance);
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use iced::wgpu::naga;
    use serde_json::{Value, json};

    use crate::camera::SceneCamera;
    use crate::plot::Plot;
    use crate::scene::SceneId;

    fn layout(names: &[(&str, WgslType)]) -> UniformLayout {
        UniformLayout::new(names.iter().map(|(n, t)| (n.to_string(), *t)))
    }

    fn shader(layout_kind: LineLayout) -> LineShader {
        LineShader {
            layout: layout_kind,
            ndim: 2,
            color: ColorInput::Rgba,
            per_point_width: false,
            pattern: false,
            colormap: false,
            uniforms: layout(&[
                ("projectionview", WgslType::Mat4),
                ("resolution", WgslType::Vec2),
                ("linewidth", WgslType::F32),
            ]),
        }
    }

    #[test]
    fn test_polyline_inputs_share_buffers() {
        let inputs = shader(LineLayout::Polyline).vertex_inputs();
        let names: Vec<String> = inputs.iter().map(VertexInput::wgsl_name).collect();
        assert_eq!(
            names,
            vec![
                "positions_prev",
                "positions_start",
                "positions_end",
                "positions_next",
                "color_start",
                "color_end"
            ]
        );
        assert!(inputs.iter().enumerate().all(|(i, v)| v.location == i as u32));
        assert_eq!(inputs[0].components, 3);
        assert_eq!(inputs[4].buffer, "attributes");
    }

    #[test]
    fn test_segments_have_no_neighbours() {
        let mut s = shader(LineLayout::Segments);
        s.pattern = true;
        let names: Vec<String> = s.vertex_inputs().iter().map(VertexInput::wgsl_name).collect();
        assert_eq!(
            names,
            vec![
                "positions_start",
                "positions_end",
                "color_start",
                "color_end",
                "lastlen_start",
                "lastlen_end"
            ]
        );
        let src = s.source();
        assert!(!src.contains("positions_prev"));
        assert!(src.contains("var has_prev = false;"));
    }

    #[test]
    fn test_only_present_uniforms_are_referenced() {
        let src = shader(LineLayout::Polyline).source();
        assert!(src.contains("u.linewidth"));
        assert!(src.contains("u.projectionview"));
        assert!(!src.contains("u.clip_planes"));
        assert!(!src.contains("u.model"));
        assert!(!src.contains("pattern_tex"));
        assert!(!src.contains("colormap_tex"));
        assert!(!src.contains('$'), "unsubstituted token in:\n{src}");
    }

    #[test]
    fn test_optional_features_switch_on() {
        let mut s = shader(LineLayout::Polyline);
        s.ndim = 3;
        s.color = ColorInput::Scalar;
        s.colormap = true;
        s.pattern = true;
        s.per_point_width = true;
        s.uniforms = layout(&[
            ("projectionview", WgslType::Mat4),
            ("num_clip_planes", WgslType::F32),
            ("clip_planes", WgslType::Vec4Array(8)),
            ("pattern_length", WgslType::F32),
        ]);
        let src = s.source();
        assert!(src.contains("var pattern_tex: texture_2d<f32>"));
        assert!(src.contains("var colormap_tex: texture_2d<f32>"));
        assert!(src.contains("u.clip_planes[i]"));
        assert!(src.contains("@location(0) positions_prev: vec4<f32>"));
        assert!(src.contains("in.linewidth_start"));
        assert!(src.contains("colormap_lookup(color.x)"));
        assert!(!src.contains('$'));
    }

    fn plot_shader(plot_type: &str, attributes: Value, uniforms: Value) -> LineShader {
        let desc = serde_json::from_value(json!({
            "uuid": "p",
            "plot_type": plot_type,
            "attributes": attributes,
            "uniforms": uniforms,
        }))
        .unwrap();
        Plot::new(desc, SceneId::from("s"), &SceneCamera::default())
            .unwrap()
            .shader()
    }

    fn validate(name: &str, shader: &LineShader) {
        let src = shader.source();
        let module = naga::front::wgsl::parse_str(&src)
            .unwrap_or_else(|e| panic!("{name} does not parse:\n{}", e.emit_to_string(&src)));
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::default(),
        )
        .validate(&module)
        .unwrap_or_else(|e| panic!("{name} does not validate:\n{}", e.emit_to_string(&src)));
    }

    #[test]
    fn test_generated_variants_validate() {
        let points = json!([[0, 0], [1, 1], [2, 0]]);
        let rgba = json!([[1, 0, 0, 1], [0, 1, 0, 1], [0, 0, 1, 1]]);
        let points3 = json!([[0, 0, 0], [1, 1, 1], [2, 0, 1]]);
        let pattern = json!({"type": "Sampler", "data": [-1, 1, 1, -1], "size": [4, 1]});
        let colormap = json!({
            "type": "Sampler", "channels": 4, "size": [2, 1],
            "data": [0, 0, 1, 1, 1, 0, 0, 1]
        });
        let variants = [
            (
                "uniform color",
                plot_shader(
                    "Lines",
                    json!({"positions": points}),
                    json!({"color": [1, 0, 0, 1]}),
                ),
            ),
            (
                "rgba",
                plot_shader(
                    "Lines",
                    json!({"positions": points, "color": rgba}),
                    json!({}),
                ),
            ),
            (
                "scalar with colormap",
                plot_shader(
                    "Lines",
                    json!({"positions": points, "color": [0.0, 0.5, 1.0]}),
                    json!({"colormap": colormap, "colorrange": [0, 1]}),
                ),
            ),
            (
                "3d bevel round cap clipped",
                plot_shader(
                    "Lines",
                    json!({"positions": points3, "linewidth": [1, 2, 3]}),
                    json!({
                        "joinstyle": 2, "linecap": 2,
                        "clip_planes": {"type": "Float32Array", "data": [1, 0, 0, 0, 0, 1, 0, 0]}
                    }),
                ),
            ),
            (
                "pattern",
                plot_shader(
                    "Lines",
                    json!({"positions": points}),
                    json!({"pattern": pattern, "pattern_length": 10}),
                ),
            ),
            (
                "segments",
                plot_shader("LineSegments", json!({"positions": [[0, 0], [1, 1]]}), json!({})),
            ),
            (
                "segments with pattern",
                plot_shader(
                    "LineSegments",
                    json!({"positions": [[0, 0, 0], [1, 1, 1]]}),
                    json!({"pattern": pattern}),
                ),
            ),
        ];
        for (name, shader) in &variants {
            validate(name, shader);
        }
        assert_eq!(variants[1].1.color, ColorInput::Rgba);
        assert!(variants[2].1.colormap);
        assert!(variants[4].1.pattern);
    }

    #[test]
    fn test_identical_inputs_identical_source() {
        assert_eq!(
            shader(LineLayout::Polyline).source(),
            shader(LineLayout::Polyline).source()
        );
        assert_ne!(
            shader(LineLayout::Polyline).source(),
            shader(LineLayout::Segments).source()
        );
    }
}
