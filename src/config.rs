//! Screen and atlas configuration.
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

/// Settings for one [`Screen`](crate::Screen).
///
/// Every field has a default so hosts can send a partial JSON object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScreenConfig {
    /// Target frames per second for the render loop.
    pub framerate: f64,
    /// Device pixels per unitless scene unit. Falls back to the device pixel ratio.
    pub px_per_unit: Option<f32>,
    /// CSS scaling applied on top of the device pixel ratio.
    pub scalefactor: Option<f32>,
    /// Coalescing window for surface resizes.
    pub resize_throttle_ms: u64,
    /// Coalescing window for pointer hover picking.
    pub hover_throttle_ms: u64,
    /// Search radius, in unitless pixels, for hover picks.
    pub hover_range: f32,
    /// Share one atlas across every screen in the process.
    pub shared_atlas: bool,
    pub atlas: AtlasConfig,
}

impl Default for ScreenConfig {
    fn default() -> Self {
        Self {
            framerate: 30.0,
            px_per_unit: None,
            scalefactor: None,
            resize_throttle_ms: 100,
            hover_throttle_ms: 16,
            hover_range: 10.0,
            shared_atlas: true,
            atlas: AtlasConfig::default(),
        }
    }
}

impl ScreenConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.framerate.max(1.0))
    }

    pub fn resize_throttle(&self) -> Duration {
        Duration::from_millis(self.resize_throttle_ms)
    }

    pub fn hover_throttle(&self) -> Duration {
        Duration::from_millis(self.hover_throttle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
    /// Width and height of the square atlas bitmap.
    pub size: u32,
    /// Resolution glyphs were rasterized at, in pixels per em.
    pub pix_per_glyph: f32,
    /// SDF padding around every glyph, in atlas pixels.
    pub glyph_padding: f32,
}

impl Default for AtlasConfig {
    fn default() -> Self {
        Self {
            size: 2048,
            pix_per_glyph: 64.0,
            glyph_padding: 12.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ScreenConfig::from_json(r#"{"framerate": 60, "atlas": {"size": 512}}"#).unwrap();
        assert_eq!(config.framerate, 60.0);
        assert_eq!(config.atlas.size, 512);
        assert_eq!(config.atlas.glyph_padding, 12.0);
        assert_eq!(config.resize_throttle_ms, 100);
        assert!(config.px_per_unit.is_none());
    }

    #[test]
    fn test_frame_interval() {
        let config = ScreenConfig {
            framerate: 50.0,
            ..Default::default()
        };
        assert_eq!(config.frame_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_wrong_types() {
        assert!(ScreenConfig::from_json(r#"{"framerate": "fast"}"#).is_err());
    }
}
