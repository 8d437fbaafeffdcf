//! A GPU renderer for plot scene graphs streamed from a host process.
//!
//! - The host owns the scene tree and sends JSON messages; the renderer keeps
//!   an id-addressed mirror and GPU buffers for every plot
//! - Line plots get a WGSL shader generated from the inputs they actually have
//! - Tagged messages are applied in sequence order, even when they arrive out
//!   of order
//! - Picking reads plot and point ids back from an offscreen target
//!
//! Quick start:
//!
//! ```no_run
//! use std::sync::{Arc, Mutex};
//! use remote_plot::{SceneDescriptor, Screen, ScreenConfig, ScreenView};
//!
//! let mut screen = Screen::new(ScreenConfig::default(), 1.0);
//! let scene = SceneDescriptor::from_json(
//!     r#"{"uuid": "root", "viewport": [0, 0, 400, 300], "plots": [
//!         {"uuid": "line", "plot_type": "Lines",
//!          "attributes": {"positions": [[0, 0], [1, 1], [2, 0]]}}]}"#,
//! )
//! .unwrap();
//! screen.load_scene(&scene).unwrap();
//! screen
//!     .handle_message(r#"{"type": "update_plot", "plot": "line", "updates": [["linewidth", 4]]}"#)
//!     .unwrap();
//! let view = ScreenView::new(Arc::new(Mutex::new(screen)));
//! // `view.view()` is an iced element.
//! ```
//!
//! See `demos/` for more.
pub mod atlas;
pub mod camera;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod line;
pub mod ordered;
pub mod picking;
pub mod plot;
pub mod protocol;
pub mod registry;
pub mod render_loop;
pub mod scene;
pub mod screen;
pub mod throttle;
pub mod uniform;
pub mod widget;

pub(crate) mod renderer;

#[cfg(target_arch = "wasm32")]
pub mod web;

// Re-exports of public types.
pub use atlas::SharedAtlas;
pub use config::{AtlasConfig, ScreenConfig};
pub use error::{Error, Result};
pub use picking::{PickHit, PickQuery, PickResult};
pub use plot::PlotId;
pub use protocol::{Command, Envelope, PlotDescriptor, SceneDescriptor};
pub use scene::SceneId;
pub use screen::Screen;
pub use widget::{ScreenMessage, ScreenView, SharedScreen};
