//! Conversion of host values into uniforms and attribute streams.
use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::camera::CameraBinding;
use crate::error::{Error, Result};

/// Named uniforms of one plot, in host order.
pub type UniformSet = IndexMap<String, Uniform>;

/// Numeric buffer with the element type the host declared.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedBuffer {
    Float32(Vec<f32>),
    Int32(Vec<i32>),
    Uint32(Vec<u32>),
}

impl TypedBuffer {
    pub fn len(&self) -> usize {
        match self {
            TypedBuffer::Float32(v) => v.len(),
            TypedBuffer::Int32(v) => v.len(),
            TypedBuffer::Uint32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_f32(&self) -> Vec<f32> {
        match self {
            TypedBuffer::Float32(v) => v.clone(),
            TypedBuffer::Int32(v) => v.iter().map(|&x| x as f32).collect(),
            TypedBuffer::Uint32(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }
}

/// CPU copy of a sampled texture (line patterns, colormaps).
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    /// 1 (red only) or 4 (rgba).
    pub channels: u32,
    pub data: Vec<f32>,
}

/// A GPU-bindable value.
#[derive(Debug, Clone, PartialEq)]
pub enum Uniform {
    Bool(bool),
    Float(f32),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
    Buffer(TypedBuffer),
    Sampler(Arc<TextureData>),
    /// Non-numeric list, kept as sent.
    List(Vec<Value>),
    /// Live value read from the owning scene's camera at draw time.
    Camera(CameraBinding),
}

impl Uniform {
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Uniform::Float(v) => Some(*v),
            Uniform::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn is_texture(&self) -> bool {
        matches!(self, Uniform::Sampler(_))
    }
}

/// Input to [`deserialize_uniform`]: either raw JSON or an already-built uniform.
#[derive(Debug, Clone)]
pub enum RawUniform {
    Json(Value),
    Wrapped(Uniform),
}

impl From<Value> for RawUniform {
    fn from(value: Value) -> Self {
        RawUniform::Json(value)
    }
}

impl From<Uniform> for RawUniform {
    fn from(value: Uniform) -> Self {
        RawUniform::Wrapped(value)
    }
}

pub fn deserialize_uniform(name: &str, raw: impl Into<RawUniform>) -> Result<Uniform> {
    match raw.into() {
        RawUniform::Wrapped(uniform) => Ok(uniform),
        RawUniform::Json(value) => uniform_from_json(name, &value),
    }
}

fn uniform_from_json(name: &str, value: &Value) -> Result<Uniform> {
    match value {
        Value::Bool(b) => Ok(Uniform::Bool(*b)),
        Value::Number(n) => n
            .as_f64()
            .map(|v| Uniform::Float(v as f32))
            .ok_or_else(|| Error::invalid(name, "number out of range")),
        Value::Array(items) => {
            let Some(numbers) = items.iter().map(Value::as_f64).collect::<Option<Vec<f64>>>()
            else {
                return Ok(Uniform::List(items.clone()));
            };
            let v: Vec<f32> = numbers.into_iter().map(|x| x as f32).collect();
            Ok(match v.len() {
                2 => Uniform::Vec2(Vec2::from_slice(&v)),
                3 => Uniform::Vec3(Vec3::from_slice(&v)),
                4 => Uniform::Vec4(Vec4::from_slice(&v)),
                16 => Uniform::Mat4(Mat4::from_cols_slice(&v)),
                _ => Uniform::Buffer(TypedBuffer::Float32(v)),
            })
        }
        Value::Object(map) => match object_tag(map) {
            Some("Sampler") => Ok(Uniform::Sampler(Arc::new(texture_from_json(name, value)?))),
            Some(tag) if tag.ends_with("Array") => {
                Ok(Uniform::Buffer(typed_buffer_from_json(name, tag, map)?))
            }
            _ if is_compressed(map) => uniform_from_json(name, &expand_compressed(name, map)?),
            _ => Err(Error::invalid(name, "unrecognized object")),
        },
        Value::Null | Value::String(_) => Err(Error::invalid(name, "not a uniform value")),
    }
}

fn object_tag(map: &Map<String, Value>) -> Option<&str> {
    map.get("type").and_then(Value::as_str)
}

fn is_compressed(map: &Map<String, Value>) -> bool {
    map.contains_key("value") && map.contains_key("length")
}

/// Expands `{value, length}` into an array holding `value` repeated `length` times.
///
/// Array values are repeated element-wise, so `{value: [r, g, b, a], length: 3}`
/// becomes twelve numbers.
pub fn expand_compressed(name: &str, map: &Map<String, Value>) -> Result<Value> {
    let length = map
        .get("length")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::invalid(name, "compressed length must be a non-negative integer"))?
        as usize;
    let value = map
        .get("value")
        .ok_or_else(|| Error::invalid(name, "compressed value missing"))?;
    let out = match value {
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len() * length);
            for _ in 0..length {
                out.extend(items.iter().cloned());
            }
            out
        }
        other => vec![other.clone(); length],
    };
    Ok(Value::Array(out))
}

fn typed_buffer_from_json(name: &str, tag: &str, map: &Map<String, Value>) -> Result<TypedBuffer> {
    let data = map
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::invalid(name, "typed buffer without data"))?;
    let floats = flatten_numbers(name, data)?.0;
    Ok(match tag {
        "Float32Array" | "Float64Array" => TypedBuffer::Float32(floats),
        "Int32Array" | "Int16Array" | "Int8Array" => {
            TypedBuffer::Int32(floats.iter().map(|&x| x as i32).collect())
        }
        "Uint32Array" | "Uint16Array" | "Uint8Array" => {
            TypedBuffer::Uint32(floats.iter().map(|&x| x as u32).collect())
        }
        other => return Err(Error::invalid(name, format!("unsupported buffer type {other}"))),
    })
}

#[derive(Deserialize)]
struct SamplerDescriptor {
    data: Vec<Option<f32>>,
    #[serde(default)]
    size: Option<[u32; 2]>,
    #[serde(default = "default_channels")]
    channels: u32,
}

fn default_channels() -> u32 {
    1
}

fn texture_from_json(name: &str, value: &Value) -> Result<TextureData> {
    let desc = SamplerDescriptor::deserialize(value)?;
    if desc.channels != 1 && desc.channels != 4 {
        return Err(Error::invalid(name, "samplers must have 1 or 4 channels"));
    }
    let data: Vec<f32> = desc.data.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
    let texels = data.len() as u32 / desc.channels;
    let [width, height] = desc.size.unwrap_or([texels, 1]);
    let values = width
        .checked_mul(height)
        .and_then(|n| n.checked_mul(desc.channels))
        .ok_or_else(|| Error::invalid(name, format!("sampler size {width}x{height} overflows")))?;
    if values as usize != data.len() || texels == 0 {
        return Err(Error::invalid(name, "sampler size does not match its data"));
    }
    Ok(TextureData {
        width,
        height,
        channels: desc.channels,
        data,
    })
}

/// A per-point attribute stream as sent by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeData {
    pub data: Vec<f32>,
    /// Components per point, when the host sent nested arrays.
    pub item_size: Option<usize>,
}

/// Flattens a plain array, nested arrays, a typed buffer or a compressed
/// broadcast into one float stream. `null` entries become NaN break markers.
pub fn deserialize_attribute(name: &str, value: &Value) -> Result<AttributeData> {
    match value {
        Value::Array(items) => {
            let (data, item_size) = flatten_numbers(name, items)?;
            Ok(AttributeData { data, item_size })
        }
        Value::Number(n) => Ok(AttributeData {
            data: vec![n.as_f64().unwrap_or(f64::NAN) as f32],
            item_size: Some(1),
        }),
        Value::Object(map) => match object_tag(map) {
            Some(tag) if tag.ends_with("Array") => Ok(AttributeData {
                data: typed_buffer_from_json(name, tag, map)?.to_f32(),
                item_size: None,
            }),
            _ if is_compressed(map) => {
                let item_size = match map.get("value") {
                    Some(Value::Array(items)) => items.len(),
                    _ => 1,
                };
                let Value::Array(items) = expand_compressed(name, map)? else {
                    return Err(Error::invalid(name, "compressed value did not expand"));
                };
                let (data, _) = flatten_numbers(name, &items)?;
                Ok(AttributeData {
                    data,
                    item_size: Some(item_size),
                })
            }
            _ => Err(Error::invalid(name, "unrecognized attribute object")),
        },
        _ => Err(Error::invalid(name, "not an attribute buffer")),
    }
}

fn flatten_numbers(name: &str, items: &[Value]) -> Result<(Vec<f32>, Option<usize>)> {
    let mut out = Vec::with_capacity(items.len());
    let mut item_size = None;
    for item in items {
        match item {
            Value::Number(n) => out.push(n.as_f64().unwrap_or(f64::NAN) as f32),
            Value::Null => out.push(f32::NAN),
            Value::Array(inner) => {
                if *item_size.get_or_insert(inner.len()) != inner.len() {
                    return Err(Error::invalid(name, "ragged nested array"));
                }
                for v in inner {
                    out.push(v.as_f64().map_or(f32::NAN, |x| x as f32));
                }
            }
            _ => return Err(Error::invalid(name, "non-numeric entry in buffer")),
        }
    }
    Ok((out, item_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fixed_lengths_map_to_vectors() {
        assert_eq!(
            deserialize_uniform("a", json!([1, 2])).unwrap(),
            Uniform::Vec2(Vec2::new(1.0, 2.0))
        );
        assert_eq!(
            deserialize_uniform("a", json!([1, 2, 3])).unwrap(),
            Uniform::Vec3(Vec3::new(1.0, 2.0, 3.0))
        );
        assert_eq!(
            deserialize_uniform("a", json!([1, 2, 3, 4])).unwrap(),
            Uniform::Vec4(Vec4::new(1.0, 2.0, 3.0, 4.0))
        );
        let m: Vec<f32> = (0..16).map(|i| i as f32).collect();
        let Uniform::Mat4(mat) = deserialize_uniform("m", json!(m)).unwrap() else {
            panic!("expected mat4");
        };
        // column-major: element 4 starts the second column
        assert_eq!(mat.y_axis.x, 4.0);
    }

    #[test]
    fn test_scalars_and_other_lengths() {
        assert_eq!(deserialize_uniform("w", json!(2.5)).unwrap(), Uniform::Float(2.5));
        assert_eq!(deserialize_uniform("b", json!(true)).unwrap(), Uniform::Bool(true));
        assert_eq!(
            deserialize_uniform("x", json!([1, 2, 3, 4, 5])).unwrap(),
            Uniform::Buffer(TypedBuffer::Float32(vec![1.0, 2.0, 3.0, 4.0, 5.0]))
        );
    }

    #[test]
    fn test_typed_buffer_is_not_a_vector() {
        let value = json!({"type": "Float32Array", "data": [1, 2, 3, 4]});
        assert_eq!(
            deserialize_uniform("planes", value).unwrap(),
            Uniform::Buffer(TypedBuffer::Float32(vec![1.0, 2.0, 3.0, 4.0]))
        );
        let value = json!({"type": "Uint32Array", "data": [7, 8]});
        assert_eq!(
            deserialize_uniform("ids", value).unwrap(),
            Uniform::Buffer(TypedBuffer::Uint32(vec![7, 8]))
        );
    }

    #[test]
    fn test_non_numeric_lists_pass_through() {
        let value = json!([true, "round", 1]);
        assert_eq!(
            deserialize_uniform("l", value.clone()).unwrap(),
            Uniform::List(value.as_array().unwrap().clone())
        );
    }

    #[test]
    fn test_wrapped_values_pass_through() {
        let wrapped = Uniform::Camera(CameraBinding::Resolution);
        assert_eq!(deserialize_uniform("resolution", wrapped.clone()).unwrap(), wrapped);
    }

    #[test]
    fn test_sampler() {
        let value = json!({"type": "Sampler", "data": [0.0, 1.0, null, 2.0]});
        let Uniform::Sampler(tex) = deserialize_uniform("pattern", value).unwrap() else {
            panic!("expected sampler");
        };
        assert_eq!((tex.width, tex.height, tex.channels), (4, 1, 1));
        assert!(tex.data[2].is_nan());

        let bad = json!({"type": "Sampler", "data": [0.0, 1.0], "size": [3, 1]});
        assert!(deserialize_uniform("pattern", bad).is_err());
    }

    #[test]
    fn test_huge_sampler_size_is_rejected() {
        let huge = json!({
            "type": "Sampler", "data": [0.0, 1.0], "channels": 4,
            "size": [u32::MAX, u32::MAX]
        });
        assert!(matches!(
            deserialize_uniform("colormap", huge),
            Err(Error::InvalidValue { reason, .. }) if reason.contains("overflows")
        ));
    }

    #[test]
    fn test_null_is_rejected() {
        assert!(matches!(
            deserialize_uniform("x", Value::Null),
            Err(Error::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_attribute_flattening() {
        let attr = deserialize_attribute("positions", &json!([[0, 0], [1, null], [2, 2]])).unwrap();
        assert_eq!(attr.item_size, Some(2));
        assert_eq!(attr.data.len(), 6);
        assert!(attr.data[3].is_nan());

        assert!(deserialize_attribute("positions", &json!([[0, 0], [1]])).is_err());
    }

    #[test]
    fn test_compressed_attribute_expands() {
        let attr =
            deserialize_attribute("color", &json!({"value": [1, 0, 0, 1], "length": 3})).unwrap();
        assert_eq!(attr.item_size, Some(4));
        assert_eq!(attr.data, [1.0, 0.0, 0.0, 1.0].repeat(3));

        let attr = deserialize_attribute("linewidth", &json!({"value": 2, "length": 2})).unwrap();
        assert_eq!(attr.data, vec![2.0, 2.0]);
    }
}
