//! Messages the host sends to the renderer.
//!
//! Descriptors create scenes and plots; commands mutate them afterwards.
//! Plot types and camera spaces stay strings here and are checked when the
//! plot is built, so a bad tag surfaces as a protocol error naming the tag.
use glam::{Mat4, Vec2, Vec3};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::atlas::GlyphDescriptor;
use crate::error::Result;
use crate::plot::PlotId;
use crate::scene::SceneId;

fn yes() -> bool {
    true
}

fn data_space() -> String {
    "data".to_string()
}

fn identity() -> [f32; 16] {
    Mat4::IDENTITY.to_cols_array()
}

fn white() -> [f32; 4] {
    [1.0, 1.0, 1.0, 1.0]
}

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CameraDescriptor {
    #[serde(default = "identity")]
    pub view: [f32; 16],
    #[serde(default = "identity")]
    pub projection: [f32; 16],
    #[serde(default)]
    pub resolution: [f32; 2],
    #[serde(default)]
    pub eyeposition: [f32; 3],
}

impl CameraDescriptor {
    pub fn view(&self) -> Mat4 {
        Mat4::from_cols_array(&self.view)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::from_cols_array(&self.projection)
    }

    pub fn resolution(&self) -> Vec2 {
        Vec2::from_array(self.resolution)
    }

    pub fn eyeposition(&self) -> Vec3 {
        Vec3::from_array(self.eyeposition)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LightDescriptor {
    pub direction: [f32; 3],
    #[serde(default)]
    pub ambient: [f32; 3],
    #[serde(default)]
    pub color: [f32; 3],
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlotDescriptor {
    pub uuid: PlotId,
    pub plot_type: String,
    #[serde(default = "data_space")]
    pub cam_space: String,
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default)]
    pub zvalue: f32,
    #[serde(default)]
    pub attributes: IndexMap<String, Value>,
    #[serde(default)]
    pub uniforms: IndexMap<String, Value>,
    /// Point dimension, for flat position arrays.
    #[serde(default)]
    pub ndim: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SceneDescriptor {
    pub uuid: SceneId,
    /// `[x, y, width, height]` in unitless pixels, origin bottom-left.
    #[serde(default)]
    pub viewport: Option<[f32; 4]>,
    #[serde(default = "white")]
    pub backgroundcolor: [f32; 4],
    #[serde(default = "yes")]
    pub visible: bool,
    #[serde(default = "yes")]
    pub clearscene: bool,
    #[serde(default)]
    pub camera: Option<CameraDescriptor>,
    #[serde(default)]
    pub light: Option<LightDescriptor>,
    #[serde(default)]
    pub plots: Vec<PlotDescriptor>,
    #[serde(default)]
    pub children: Vec<SceneDescriptor>,
}

impl SceneDescriptor {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    InsertPlots {
        scene: SceneId,
        plots: Vec<PlotDescriptor>,
    },
    DeletePlots {
        plots: Vec<PlotId>,
    },
    DeleteScene {
        scene: SceneId,
    },
    DeleteScenes {
        scenes: Vec<SceneId>,
    },
    MovePlot {
        plot: PlotId,
        scene: SceneId,
    },
    UpdatePlot {
        plot: PlotId,
        /// Applied in the order listed.
        updates: Vec<(String, Value)>,
    },
    UpdateCamera {
        scene: SceneId,
        #[serde(flatten)]
        camera: CameraDescriptor,
        #[serde(default)]
        force: bool,
    },
    UpdateScene {
        scene: SceneId,
        #[serde(default, deserialize_with = "nullable")]
        viewport: Option<Option<[f32; 4]>>,
        #[serde(default)]
        visible: Option<bool>,
        #[serde(default)]
        backgroundcolor: Option<[f32; 4]>,
    },
    InsertGlyphs {
        glyphs: IndexMap<String, GlyphDescriptor>,
    },
}

/// A command plus its optional ordering tag. Tagged commands go through the
/// ordered executor; untagged ones apply on arrival.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub seq: Option<Value>,
    #[serde(flatten)]
    pub command: Command,
}

impl Envelope {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_scene_tree_defaults() {
        let scene = SceneDescriptor::from_json(
            r#"{
                "uuid": "root",
                "viewport": [0, 0, 400, 300],
                "children": [{
                    "uuid": "inner",
                    "plots": [{
                        "uuid": "p1",
                        "plot_type": "Lines",
                        "attributes": {"positions": [[0, 0], [1, 1]]}
                    }]
                }]
            }"#,
        )
        .unwrap();
        assert_eq!(scene.viewport, Some([0.0, 0.0, 400.0, 300.0]));
        assert!(scene.visible && scene.clearscene);
        let inner = &scene.children[0];
        assert_eq!(inner.viewport, None);
        let plot = &inner.plots[0];
        assert_eq!(plot.cam_space, "data");
        assert!(plot.visible);
        assert_eq!(plot.attributes["positions"], json!([[0, 0], [1, 1]]));
    }

    #[test]
    fn test_sequenced_update() {
        let envelope = Envelope::from_json(
            r#"{"seq": 4, "type": "update_plot", "plot": "p1",
                "updates": [["color", [1, 0, 0, 1]], ["visible", false]]}"#,
        )
        .unwrap();
        assert_eq!(envelope.seq, Some(json!(4)));
        let Command::UpdatePlot { plot, updates } = envelope.command else {
            panic!("wrong command");
        };
        assert_eq!(plot, PlotId::from("p1"));
        assert_eq!(updates[0].0, "color");
        assert_eq!(updates[1], ("visible".to_string(), json!(false)));
    }

    #[test]
    fn test_camera_update_flattens_matrices() {
        let envelope = Envelope::from_json(
            r#"{"type": "update_camera", "scene": "s", "resolution": [800, 600]}"#,
        )
        .unwrap();
        let Command::UpdateCamera { camera, force, .. } = envelope.command else {
            panic!("wrong command");
        };
        assert!(!force);
        assert_eq!(camera.view(), Mat4::IDENTITY);
        assert_eq!(camera.resolution(), Vec2::new(800.0, 600.0));
    }

    #[test]
    fn test_viewport_null_differs_from_absent() {
        let cleared = Envelope::from_json(r#"{"type": "update_scene", "scene": "s", "viewport": null}"#)
            .unwrap();
        let untouched = Envelope::from_json(r#"{"type": "update_scene", "scene": "s"}"#).unwrap();
        assert!(matches!(
            cleared.command,
            Command::UpdateScene { viewport: Some(None), .. }
        ));
        assert!(matches!(
            untouched.command,
            Command::UpdateScene { viewport: None, .. }
        ));
    }

    #[test]
    fn test_unknown_command_is_malformed() {
        assert!(Envelope::from_json(r#"{"type": "explode"}"#).is_err());
    }
}
