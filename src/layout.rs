//! WGSL uniform-buffer layout and packing.
use crate::camera::{CameraBinding, SceneCamera};
use crate::uniform::{Uniform, UniformSet};

/// Uniform member types a generated shader may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WgslType {
    F32,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
    /// `array<vec4<f32>, N>`; uniform arrays need a 16 byte element stride.
    Vec4Array(u32),
}

impl WgslType {
    pub fn align(self) -> u32 {
        match self {
            WgslType::F32 => 4,
            WgslType::Vec2 => 8,
            WgslType::Vec3 | WgslType::Vec4 | WgslType::Mat4 | WgslType::Vec4Array(_) => 16,
        }
    }

    pub fn size(self) -> u32 {
        match self {
            WgslType::F32 => 4,
            WgslType::Vec2 => 8,
            WgslType::Vec3 => 12,
            WgslType::Vec4 => 16,
            WgslType::Mat4 => 64,
            WgslType::Vec4Array(n) => 16 * n.max(1),
        }
    }

    pub fn wgsl(self) -> String {
        match self {
            WgslType::F32 => "f32".to_string(),
            WgslType::Vec2 => "vec2<f32>".to_string(),
            WgslType::Vec3 => "vec3<f32>".to_string(),
            WgslType::Vec4 => "vec4<f32>".to_string(),
            WgslType::Mat4 => "mat4x4<f32>".to_string(),
            WgslType::Vec4Array(n) => format!("array<vec4<f32>, {}>", n.max(1)),
        }
    }

    /// The member type a uniform value needs, or `None` for values that are not
    /// part of the uniform block (textures, passthrough lists).
    pub fn of(uniform: &Uniform) -> Option<Self> {
        match uniform {
            Uniform::Bool(_) | Uniform::Float(_) => Some(WgslType::F32),
            Uniform::Vec2(_) => Some(WgslType::Vec2),
            Uniform::Vec3(_) => Some(WgslType::Vec3),
            Uniform::Vec4(_) => Some(WgslType::Vec4),
            Uniform::Mat4(_) => Some(WgslType::Mat4),
            Uniform::Buffer(b) => Some(WgslType::Vec4Array(b.len().div_ceil(4).max(1) as u32)),
            Uniform::Camera(binding) => Some(match binding {
                CameraBinding::Resolution => WgslType::Vec2,
                CameraBinding::EyePosition | CameraBinding::LightDirection => WgslType::Vec3,
                _ => WgslType::Mat4,
            }),
            Uniform::Sampler(_) | Uniform::List(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniformField {
    pub name: String,
    pub ty: WgslType,
    pub offset: u32,
}

/// Byte layout of one generated `struct Uniforms`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: u32,
}

impl UniformLayout {
    pub fn new(members: impl IntoIterator<Item = (String, WgslType)>) -> Self {
        let mut fields = Vec::new();
        let mut cursor = 0u32;
        for (name, ty) in members {
            let offset = cursor.next_multiple_of(ty.align());
            cursor = offset + ty.size();
            fields.push(UniformField { name, ty, offset });
        }
        Self {
            fields,
            size: cursor.next_multiple_of(16).max(16),
        }
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn wgsl_struct(&self, struct_name: &str) -> String {
        let mut out = format!("struct {struct_name} {{\n");
        for field in &self.fields {
            out.push_str(&format!("    {}: {},\n", field.name, field.ty.wgsl()));
        }
        if self.fields.is_empty() {
            out.push_str("    _pad: vec4<f32>,\n");
        }
        out.push_str("};\n");
        out
    }

    /// Packs `values` into a buffer of [`size`](Self::size) bytes. Camera
    /// bindings are resolved against `camera`; missing values stay zero.
    pub fn pack(&self, values: &UniformSet, camera: &SceneCamera) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size as usize];
        for field in &self.fields {
            let Some(value) = values.get(&field.name) else {
                continue;
            };
            let floats = match value {
                Uniform::Camera(binding) => uniform_floats(&camera.resolve(*binding)),
                other => uniform_floats(other),
            };
            let capacity = (field.ty.size() / 4) as usize;
            let n = floats.len().min(capacity);
            let start = field.offset as usize;
            bytes[start..start + n * 4].copy_from_slice(bytemuck::cast_slice(&floats[..n]));
        }
        bytes
    }

    /// Overwrites a scalar member of packed bytes. Names the layout does not
    /// declare are ignored.
    pub fn write_f32(&self, bytes: &mut [u8], name: &str, value: f32) {
        let Some(field) = self.fields.iter().find(|f| f.name == name) else {
            return;
        };
        let start = field.offset as usize;
        if let Some(dst) = bytes.get_mut(start..start + 4) {
            dst.copy_from_slice(&value.to_le_bytes());
        }
    }
}

fn uniform_floats(uniform: &Uniform) -> Vec<f32> {
    match uniform {
        Uniform::Bool(b) => vec![if *b { 1.0 } else { 0.0 }],
        Uniform::Float(v) => vec![*v],
        Uniform::Vec2(v) => v.to_array().to_vec(),
        Uniform::Vec3(v) => v.to_array().to_vec(),
        Uniform::Vec4(v) => v.to_array().to_vec(),
        Uniform::Mat4(m) => m.to_cols_array().to_vec(),
        Uniform::Buffer(b) => b.to_f32(),
        Uniform::Sampler(_) | Uniform::List(_) | Uniform::Camera(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Mat4, Vec2, Vec3};

    #[test]
    fn test_offsets_follow_wgsl_alignment() {
        let layout = UniformLayout::new([
            ("a".to_string(), WgslType::F32),
            ("b".to_string(), WgslType::Vec3),
            ("c".to_string(), WgslType::F32),
            ("d".to_string(), WgslType::Vec2),
            ("e".to_string(), WgslType::Mat4),
        ]);
        let offsets: Vec<u32> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28, 32, 48]);
        assert_eq!(layout.size(), 112);
    }

    #[test]
    fn test_pack_resolves_camera_bindings() {
        let layout = UniformLayout::new([
            ("linewidth".to_string(), WgslType::F32),
            ("resolution".to_string(), WgslType::Vec2),
            ("model".to_string(), WgslType::Mat4),
        ]);
        let mut camera = SceneCamera::default();
        camera.update_matrices(Mat4::IDENTITY, Mat4::IDENTITY, Vec2::new(640.0, 480.0), Vec3::Z);
        let mut values = UniformSet::new();
        values.insert("linewidth".into(), Uniform::Float(3.0));
        values.insert("resolution".into(), Uniform::Camera(CameraBinding::Resolution));
        values.insert("model".into(), Uniform::Mat4(Mat4::from_scale(Vec3::splat(2.0))));

        let bytes = layout.pack(&values, &camera);
        let floats: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(floats[0], 3.0);
        assert_eq!(&floats[2..4], &[640.0, 480.0]);
        assert_eq!(floats[4], 2.0);
        assert_eq!(floats[4 + 15], 1.0);
    }

    #[test]
    fn test_struct_source() {
        let layout = UniformLayout::new([("planes".to_string(), WgslType::Vec4Array(8))]);
        assert_eq!(
            layout.wgsl_struct("Uniforms"),
            "struct Uniforms {\n    planes: array<vec4<f32>, 8>,\n};\n"
        );
    }
}
