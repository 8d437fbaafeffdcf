//! One rendering surface and everything hanging off it.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use glam::Vec2;
use log::{debug, warn};

use crate::atlas::SharedAtlas;
use crate::config::ScreenConfig;
use crate::error::Result;
use crate::ordered::OrderedExecutor;
use crate::picking::{PickMailbox, PickQuery, PickResult};
use crate::protocol::{Command, Envelope, SceneDescriptor};
use crate::registry::SceneRegistry;
use crate::render_loop::{FrameAction, RenderLoop};
use crate::scene::SceneId;

/// Reports whether the surface a screen draws into still exists.
pub type LivenessProbe = Arc<dyn Fn() -> bool + Send + Sync>;

static NEXT_SCREEN: AtomicU64 = AtomicU64::new(1);
static PROCESS_ATLAS: OnceLock<SharedAtlas> = OnceLock::new();

/// A rendering surface: the scene tree drawn into it, its scale factors, and
/// the render-loop and picking state tied to it.
///
/// Sizes are kept in unitless pixels. `px_per_unit` converts them to device
/// pixels and `winscale` converts client (CSS) pixels to unitless ones.
pub struct Screen {
    id: u64,
    config: ScreenConfig,
    registry: SceneRegistry,
    executor: OrderedExecutor<Command>,
    root: Option<SceneId>,
    scalefactor: f32,
    px_per_unit: f32,
    winscale: f32,
    canvas: Vec2,
    pick_size: (u32, u32),
    atlas: SharedAtlas,
    render_loop: RenderLoop,
    render_due: bool,
    picks: Arc<PickMailbox>,
    pick_seq: u64,
    liveness: Option<LivenessProbe>,
    disposed: bool,
    shader_warning: Option<String>,
}

impl std::fmt::Debug for Screen {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Screen")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("canvas", &self.canvas)
            .field("px_per_unit", &self.px_per_unit)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl Screen {
    /// Uses the process-wide atlas when `config.shared_atlas` is set, otherwise
    /// a private one.
    pub fn new(config: ScreenConfig, device_pixel_ratio: f32) -> Self {
        let atlas = if config.shared_atlas {
            PROCESS_ATLAS
                .get_or_init(|| SharedAtlas::new(config.atlas.clone()))
                .clone()
        } else {
            SharedAtlas::new(config.atlas.clone())
        };
        Self::with_atlas(config, device_pixel_ratio, atlas)
    }

    pub fn with_atlas(config: ScreenConfig, device_pixel_ratio: f32, atlas: SharedAtlas) -> Self {
        let dpr = if device_pixel_ratio > 0.0 {
            device_pixel_ratio
        } else {
            1.0
        };
        let scalefactor = config.scalefactor.unwrap_or(dpr);
        let px_per_unit = config.px_per_unit.unwrap_or(dpr);
        Self {
            id: NEXT_SCREEN.fetch_add(1, Ordering::Relaxed),
            render_loop: RenderLoop::new(config.frame_interval()),
            config,
            registry: SceneRegistry::new(),
            executor: OrderedExecutor::new(),
            root: None,
            scalefactor,
            px_per_unit,
            winscale: scalefactor / dpr,
            canvas: Vec2::ZERO,
            pick_size: (1, 1),
            atlas,
            render_due: true,
            picks: Arc::default(),
            pick_seq: 0,
            liveness: None,
            disposed: false,
            shader_warning: None,
        }
    }

    pub fn set_liveness_probe(&mut self, probe: LivenessProbe) {
        self.liveness = Some(probe);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &ScreenConfig {
        &self.config
    }

    pub fn registry(&self) -> &SceneRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SceneRegistry {
        &mut self.registry
    }

    pub fn root(&self) -> Option<&SceneId> {
        self.root.as_ref()
    }

    pub fn atlas(&self) -> &SharedAtlas {
        &self.atlas
    }

    pub fn scalefactor(&self) -> f32 {
        self.scalefactor
    }

    pub fn px_per_unit(&self) -> f32 {
        self.px_per_unit
    }

    pub fn winscale(&self) -> f32 {
        self.winscale
    }

    /// Canvas size in unitless pixels.
    pub fn canvas_size(&self) -> Vec2 {
        self.canvas
    }

    /// Pick target size in device pixels.
    pub fn pick_size(&self) -> (u32, u32) {
        self.pick_size
    }

    pub fn picks(&self) -> &Arc<PickMailbox> {
        &self.picks
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn shader_warning(&self) -> Option<&str> {
        self.shader_warning.as_deref()
    }

    pub(crate) fn report_shader_error(&mut self, report: String) {
        warn!("{report}");
        self.shader_warning = Some(report);
    }

    /// Replaces the whole scene tree.
    pub fn load_scene(&mut self, desc: &SceneDescriptor) -> Result<()> {
        if self.root.take().is_some() {
            self.registry.clear();
        }
        self.registry.add_scene(desc, None)?;
        self.root = Some(desc.uuid.clone());
        if let Some([_, _, w, h]) = desc.viewport {
            self.canvas = Vec2::new(w, h);
            self.update_pick_size();
        }
        self.render_due = true;
        debug!("screen {}: loaded scene {}", self.id, desc.uuid);
        Ok(())
    }

    pub fn handle_message(&mut self, json: &str) -> Result<()> {
        self.apply(Envelope::from_json(json)?)
    }

    /// Applies an envelope. Sequenced commands wait for their predecessors;
    /// when several become ready at once all of them run, the first failure
    /// is returned and later ones are logged.
    pub fn apply(&mut self, envelope: Envelope) -> Result<()> {
        let Some(seq) = envelope.seq else {
            return self.execute(envelope.command);
        };
        let seq = OrderedExecutor::<Command>::parse_seq(&seq)?;
        let ready = self.executor.submit(seq, envelope.command)?;
        let mut first_error = None;
        for command in ready {
            if let Err(err) = self.execute(command) {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    warn!("screen {}: {err}", self.id);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn execute(&mut self, command: Command) -> Result<()> {
        self.render_due = true;
        match command {
            Command::InsertPlots { scene, plots } => self.registry.insert_plots(&scene, plots),
            Command::DeletePlots { plots } => {
                self.registry.delete_plots(&plots);
                Ok(())
            }
            Command::DeleteScene { scene } => {
                self.delete_scenes(std::slice::from_ref(&scene));
                Ok(())
            }
            Command::DeleteScenes { scenes } => {
                self.delete_scenes(&scenes);
                Ok(())
            }
            Command::MovePlot { plot, scene } => self.registry.move_plot(&plot, &scene),
            Command::UpdatePlot { plot, updates } => self.registry.update_plot(&plot, updates),
            Command::UpdateCamera {
                scene,
                camera,
                force,
            } => {
                self.registry.update_camera(&scene, &camera, force);
                Ok(())
            }
            Command::UpdateScene {
                scene,
                viewport,
                visible,
                backgroundcolor,
            } => {
                self.registry
                    .update_scene(&scene, viewport, visible, backgroundcolor);
                Ok(())
            }
            Command::InsertGlyphs { glyphs } => {
                self.atlas.write().insert_glyphs(&glyphs)?;
                Ok(())
            }
        }
    }

    fn delete_scenes(&mut self, scenes: &[SceneId]) {
        self.registry.delete_scenes(scenes);
        if self.root.as_ref().is_some_and(|root| scenes.contains(root)) {
            self.root = None;
        }
    }

    /// Resizes the canvas to `width` x `height` unitless pixels. The canvas
    /// size, the root viewport and the pick target size change in that order.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.canvas = Vec2::new(width.max(0.0), height.max(0.0));
        if let Some(root) = self.root.as_ref()
            && let Some(scene) = self.registry.find_scene_mut(root)
        {
            scene.viewport = Some([0.0, 0.0, self.canvas.x, self.canvas.y]);
        }
        self.update_pick_size();
        self.render_due = true;
    }

    fn update_pick_size(&mut self) {
        let device = self.canvas * self.px_per_unit;
        self.pick_size = (device.x.round().max(1.0) as u32, device.y.round().max(1.0) as u32);
    }

    /// Converts a pointer position in client pixels (top-left origin) to
    /// unitless scene coordinates (bottom-left origin).
    pub fn client_to_scene(&self, pointer: Vec2) -> Vec2 {
        let unitless = pointer / self.winscale;
        Vec2::new(unitless.x, self.canvas.y - unitless.y)
    }

    /// Converts unitless scene coordinates to device pixels (top-left origin).
    pub fn scene_to_device(&self, point: Vec2) -> Vec2 {
        Vec2::new(point.x, self.canvas.y - point.y) * self.px_per_unit
    }

    /// Queues a pick; the answer carries the returned sequence number.
    pub fn request_pick(&mut self, query: PickQuery) -> u64 {
        self.pick_seq += 1;
        self.picks.submit(self.pick_seq, query);
        self.pick_seq
    }

    pub fn take_pick_result(&self) -> Option<PickResult> {
        self.picks.take_result()
    }

    /// Drops every scene and plot and stops the render loop for good. The
    /// renderer frees the GPU side on its next prepare.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.registry.clear();
        self.root = None;
        self.render_loop.stop();
        self.disposed = true;
        debug!("screen {} disposed", self.id);
    }

    /// Called on every frame callback with the current time.
    pub fn frame(&mut self, now: Duration) -> FrameAction {
        if self.disposed {
            return FrameAction::Stop;
        }
        let alive = self.liveness.as_ref().is_none_or(|probe| probe());
        let action = self.render_loop.on_frame(now, alive);
        match action {
            FrameAction::Render => self.render_due = true,
            FrameAction::Stop => self.dispose(),
            FrameAction::Skip => {}
        }
        action
    }

    /// Whether GPU state must be brought up to date this frame. Clears the
    /// flag.
    pub fn take_render_due(&mut self) -> bool {
        std::mem::take(&mut self.render_due)
    }
}
