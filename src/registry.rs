//! Id-addressed store of every live scene and plot of one screen.
//!
//! The host owns the authoritative scene graph and refers to nodes by id, so
//! the tree is kept flat: scenes and plots live in insertion-ordered maps and
//! reference each other by id.
use indexmap::IndexMap;
use log::{debug, warn};
use serde_json::Value;

use crate::camera::SceneCamera;
use crate::error::{Error, Result};
use crate::plot::{Plot, PlotId};
use crate::protocol::{CameraDescriptor, PlotDescriptor, SceneDescriptor};
use crate::scene::{Scene, SceneId};

/// One scene's share of a frame: the scene and its visible plots in draw
/// order.
#[derive(Debug)]
pub struct DrawList<'a> {
    pub scene: &'a Scene,
    pub plots: Vec<&'a Plot>,
}

#[derive(Debug, Default)]
pub struct SceneRegistry {
    scenes: IndexMap<SceneId, Scene>,
    plots: IndexMap<PlotId, Plot>,
    /// Plots removed since the renderer last collected them. Their GPU
    /// resources are dropped on the next prepare.
    released: Vec<PlotId>,
}

impl SceneRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    pub fn plot_count(&self) -> usize {
        self.plots.len()
    }

    pub fn scenes(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.values()
    }

    pub fn plots(&self) -> impl Iterator<Item = &Plot> {
        self.plots.values()
    }

    pub fn find_scene(&self, id: &SceneId) -> Option<&Scene> {
        self.scenes.get(id)
    }

    pub fn find_scene_mut(&mut self, id: &SceneId) -> Option<&mut Scene> {
        self.scenes.get_mut(id)
    }

    pub fn find_plot(&self, id: &PlotId) -> Option<&Plot> {
        self.plots.get(id)
    }

    /// A plot together with the camera of its scene, for uploads that need
    /// both.
    pub fn plot_with_camera_mut(&mut self, id: &PlotId) -> Option<(&mut Plot, &SceneCamera)> {
        let plot = self.plots.get_mut(id)?;
        let camera = &self.scenes.get(plot.scene())?.camera;
        Some((plot, camera))
    }

    /// Looks up several plots, skipping ids that are gone.
    pub fn find_plots<'a>(&'a self, ids: &'a [PlotId]) -> impl Iterator<Item = &'a Plot> + 'a {
        ids.iter().filter_map(|id| self.plots.get(id))
    }

    /// Registers a scene subtree with all its plots. On failure nothing of the
    /// subtree stays registered.
    pub fn add_scene(&mut self, desc: &SceneDescriptor, parent: Option<&SceneId>) -> Result<()> {
        if let Some(parent) = parent
            && !self.scenes.contains_key(parent)
        {
            return Err(Error::UnknownScene(parent.clone()));
        }
        if self.scenes.contains_key(&desc.uuid) {
            return Err(Error::DuplicateScene(desc.uuid.clone()));
        }
        let released = self.released.len();
        let result = self.add_scene_recursive(desc, parent);
        if result.is_err() {
            self.delete_scene(&desc.uuid);
            // rolled-back plots never reached the GPU
            self.released.truncate(released);
        }
        result
    }

    fn add_scene_recursive(&mut self, desc: &SceneDescriptor, parent: Option<&SceneId>) -> Result<()> {
        if self.scenes.contains_key(&desc.uuid) {
            return Err(Error::DuplicateScene(desc.uuid.clone()));
        }
        let scene = Scene::from_descriptor(desc, parent.cloned());
        self.scenes.insert(desc.uuid.clone(), scene);
        if let Some(parent) = parent
            && let Some(parent) = self.scenes.get_mut(parent)
        {
            parent.children.push(desc.uuid.clone());
        }
        debug!("scene {} added", desc.uuid);

        for plot in &desc.plots {
            self.add_plot(&desc.uuid, plot.clone())?;
        }
        for child in &desc.children {
            self.add_scene_recursive(child, Some(&desc.uuid))?;
        }
        Ok(())
    }

    /// Builds a plot against `scene`'s camera and appends it to the scene.
    pub fn add_plot(&mut self, scene_id: &SceneId, desc: PlotDescriptor) -> Result<()> {
        let Some(scene) = self.scenes.get_mut(scene_id) else {
            return Err(Error::UnknownScene(scene_id.clone()));
        };
        if self.plots.contains_key(&desc.uuid) {
            return Err(Error::DuplicatePlot(desc.uuid.clone()));
        }
        let plot = Plot::new(desc, scene_id.clone(), &scene.camera)?;
        debug!("plot {} added to scene {scene_id}", plot.id());
        scene.plots.push(plot.id().clone());
        self.plots.insert(plot.id().clone(), plot);
        Ok(())
    }

    /// Inserts plots in order, stopping at the first failure. Plots before it
    /// stay inserted.
    pub fn insert_plots(&mut self, scene_id: &SceneId, plots: Vec<PlotDescriptor>) -> Result<()> {
        for desc in plots {
            self.add_plot(scene_id, desc)?;
        }
        Ok(())
    }

    /// Removes a scene with every descendant scene and plot.
    pub fn delete_scene(&mut self, id: &SceneId) {
        let Some(scene) = self.scenes.get(id) else {
            warn!("delete of unknown scene {id} ignored");
            return;
        };
        if let Some(parent) = scene.parent.clone()
            && let Some(parent) = self.scenes.get_mut(&parent)
        {
            parent.children.retain(|child| child != id);
        }

        let mut stack = vec![id.clone()];
        while let Some(next) = stack.pop() {
            let Some(scene) = self.scenes.shift_remove(&next) else {
                continue;
            };
            for plot_id in scene.plots {
                self.release_plot(&plot_id);
            }
            stack.extend(scene.children);
            debug!("scene {next} deleted");
        }
    }

    pub fn delete_scenes(&mut self, ids: &[SceneId]) {
        for id in ids {
            self.delete_scene(id);
        }
    }

    pub fn delete_plots(&mut self, ids: &[PlotId]) {
        for id in ids {
            let Some(scene_id) = self.plots.get(id).map(|p| p.scene().clone()) else {
                warn!("delete of unknown plot {id} ignored");
                continue;
            };
            if let Some(scene) = self.scenes.get_mut(&scene_id) {
                scene.plots.retain(|p| p != id);
            }
            self.release_plot(id);
        }
    }

    fn release_plot(&mut self, id: &PlotId) {
        if let Some(plot) = self.plots.shift_remove(id) {
            plot.dispose();
            self.released.push(id.clone());
        }
    }

    /// Reparents a plot without rebuilding it.
    pub fn move_plot(&mut self, plot_id: &PlotId, scene_id: &SceneId) -> Result<()> {
        if !self.scenes.contains_key(scene_id) {
            return Err(Error::UnknownScene(scene_id.clone()));
        }
        let Some(plot) = self.plots.get_mut(plot_id) else {
            warn!("move of unknown plot {plot_id} ignored");
            return Ok(());
        };
        if let Some(old) = self.scenes.get_mut(plot.scene()) {
            old.plots.retain(|p| p != plot_id);
        }
        let Some(scene) = self.scenes.get_mut(scene_id) else {
            return Err(Error::UnknownScene(scene_id.clone()));
        };
        scene.plots.push(plot_id.clone());
        plot.move_to(scene_id.clone(), &scene.camera)?;
        debug!("plot {plot_id} moved to scene {scene_id}");
        Ok(())
    }

    /// Applies one update message to a plot. Updates for deleted plots are
    /// dropped.
    pub fn update_plot(&mut self, plot_id: &PlotId, updates: Vec<(String, Value)>) -> Result<()> {
        let Some(plot) = self.plots.get_mut(plot_id) else {
            warn!("update for unknown plot {plot_id} dropped");
            return Ok(());
        };
        let Some(scene) = self.scenes.get(plot.scene()) else {
            return Err(Error::UnknownScene(plot.scene().clone()));
        };
        plot.update(updates, &scene.camera)
    }

    /// Moves a scene's camera. Identical state is skipped unless `force` is
    /// set; otherwise every plot of the scene is told the camera changed.
    pub fn update_camera(&mut self, scene_id: &SceneId, desc: &CameraDescriptor, force: bool) {
        let Some(scene) = self.scenes.get_mut(scene_id) else {
            warn!("camera update for unknown scene {scene_id} dropped");
            return;
        };
        let camera = &mut scene.camera;
        let resolution = if desc.resolution == [0.0, 0.0] {
            camera.resolution()
        } else {
            desc.resolution()
        };
        let unchanged = camera.view() == desc.view()
            && camera.projection() == desc.projection()
            && camera.resolution() == resolution
            && camera.eyeposition() == desc.eyeposition();
        if unchanged && !force {
            return;
        }
        camera.update_matrices(desc.view(), desc.projection(), resolution, desc.eyeposition());

        for plot_id in &scene.plots {
            if let Some(plot) = self.plots.get_mut(plot_id)
                && let Err(err) = plot.camera_changed(&scene.camera)
            {
                warn!("{plot_id}: camera update failed: {err}");
            }
        }
    }

    pub fn update_scene(
        &mut self,
        scene_id: &SceneId,
        viewport: Option<Option<[f32; 4]>>,
        visible: Option<bool>,
        background: Option<[f32; 4]>,
    ) {
        let Some(scene) = self.scenes.get_mut(scene_id) else {
            warn!("update for unknown scene {scene_id} dropped");
            return;
        };
        if let Some(viewport) = viewport {
            scene.viewport = viewport;
        }
        if let Some(visible) = visible {
            scene.visible = visible;
        }
        if let Some(color) = background {
            scene.background = glam::Vec4::from_array(color);
        }
    }

    /// Plots deleted since the last call.
    pub fn take_released(&mut self) -> Vec<PlotId> {
        std::mem::take(&mut self.released)
    }

    /// Depth-first walk from `root`. Scenes that do not render are left out
    /// but their children are still visited. Plots are ordered by z-value,
    /// ties keeping insertion order.
    pub fn draw_order(&self, root: &SceneId) -> Vec<DrawList<'_>> {
        let mut lists = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(scene) = self.scenes.get(id) else {
                continue;
            };
            if scene.renders() {
                let mut plots: Vec<&Plot> = self
                    .find_plots(&scene.plots)
                    .filter(|plot| plot.visible)
                    .collect();
                plots.sort_by(|a, b| a.zvalue.total_cmp(&b.zvalue));
                lists.push(DrawList { scene, plots });
            }
            stack.extend(scene.children.iter().rev());
        }
        lists
    }

    pub fn clear(&mut self) {
        let plots: Vec<PlotId> = self.plots.keys().cloned().collect();
        for id in plots {
            self.release_plot(&id);
        }
        self.scenes.clear();
    }
}
