use std::{collections::HashMap, str::FromStr};

use glam::{Mat3, Mat4, Vec2, Vec3};

use crate::error::Error;
use crate::uniform::Uniform;

/// Near/far bounds of the pixel-space projection. Wide enough that 2D content
/// with small z offsets never clips.
const PIXEL_SPACE_DEPTH: f32 = 10_000.0;

/// Coordinate space a plot's positions are expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraSpace {
    /// Transformed by the scene's view and projection.
    Data,
    /// Device-independent pixels, origin at the bottom-left of the viewport.
    Pixel,
    /// 0..1 across the viewport.
    Relative,
    /// Already in clip space.
    Clip,
}

impl CameraSpace {
    /// Whether positions in this space move when the host moves the camera.
    pub fn follows_camera(self) -> bool {
        matches!(self, CameraSpace::Data | CameraSpace::Pixel)
    }
}

impl FromStr for CameraSpace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(CameraSpace::Data),
            "pixel" => Ok(CameraSpace::Pixel),
            "relative" => Ok(CameraSpace::Relative),
            "clip" => Ok(CameraSpace::Clip),
            other => Err(Error::UnknownSpace(other.to_string())),
        }
    }
}

/// A camera-derived uniform that is resolved every time it is packed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraBinding {
    View,
    Projection,
    ProjectionView,
    PixelSpace,
    Resolution,
    EyePosition,
    LightDirection,
    /// Matrix taking positions in the given space to clip space.
    SpaceToClip(CameraSpace),
    /// `space` to clip, then clip back into `markerspace`.
    Preprojection {
        space: CameraSpace,
        markerspace: CameraSpace,
    },
}

#[derive(Debug, Clone, PartialEq)]
/// Matrices of one scene, recomputed whenever the host moves the camera.
///
/// Projection-view and its inverse, the pixel-space projection and every
/// requested preprojection are always derived together in [`update_matrices`].
///
/// [`update_matrices`]: SceneCamera::update_matrices
pub struct SceneCamera {
    view: Mat4,
    projection: Mat4,
    projectionview: Mat4,
    projectionview_inverse: Mat4,
    pixel_space: Mat4,
    pixel_space_inverse: Mat4,
    relative_space: Mat4,
    relative_space_inverse: Mat4,
    resolution: Vec2,
    eyeposition: Vec3,
    light_base: Vec3,
    light_direction: Vec3,
    preprojections: HashMap<(CameraSpace, CameraSpace), Mat4>,
    /// Bumped on every update so consumers can tell stale derived data.
    version: u64,
}

impl Default for SceneCamera {
    fn default() -> Self {
        let relative_space = Mat4::from_translation(Vec3::new(-1.0, -1.0, 0.0))
            * Mat4::from_scale(Vec3::new(2.0, 2.0, 1.0));
        let mut camera = Self {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            projectionview: Mat4::IDENTITY,
            projectionview_inverse: Mat4::IDENTITY,
            pixel_space: Mat4::IDENTITY,
            pixel_space_inverse: Mat4::IDENTITY,
            relative_space,
            relative_space_inverse: relative_space.inverse(),
            resolution: Vec2::ONE,
            eyeposition: Vec3::Z,
            light_base: Vec3::new(-1.0, -1.0, -1.0),
            light_direction: Vec3::ZERO,
            preprojections: HashMap::new(),
            version: 0,
        };
        camera.update_matrices(Mat4::IDENTITY, Mat4::IDENTITY, Vec2::ONE, Vec3::Z);
        camera
    }
}

impl SceneCamera {
    pub fn new(light_base: Vec3) -> Self {
        let mut camera = Self::default();
        camera.set_light_base(light_base);
        camera
    }

    pub fn update_matrices(
        &mut self,
        view: Mat4,
        projection: Mat4,
        resolution: Vec2,
        eyeposition: Vec3,
    ) {
        let resolution = resolution.max(Vec2::ONE);
        self.view = view;
        self.projection = projection;
        self.resolution = resolution;
        self.eyeposition = eyeposition;

        self.pixel_space = Mat4::orthographic_rh_gl(
            0.0,
            resolution.x,
            0.0,
            resolution.y,
            -PIXEL_SPACE_DEPTH,
            PIXEL_SPACE_DEPTH,
        );
        self.pixel_space_inverse = self.pixel_space.inverse();

        self.projectionview = projection * view;
        self.projectionview_inverse = self.projectionview.inverse();

        self.light_direction = self.derive_light_direction();

        let requested: Vec<_> = self.preprojections.keys().copied().collect();
        for (space, markerspace) in requested {
            let matrix = self.compute_preprojection(space, markerspace);
            self.preprojections.insert((space, markerspace), matrix);
        }
        self.version = self.version.wrapping_add(1);
    }

    pub fn set_light_base(&mut self, light_base: Vec3) {
        self.light_base = light_base;
        self.light_direction = self.derive_light_direction();
    }

    fn derive_light_direction(&self) -> Vec3 {
        let rotation = Mat3::from_mat4(self.view);
        if rotation.determinant().abs() <= f32::EPSILON {
            return self.light_base.normalize_or_zero();
        }
        (rotation.inverse() * self.light_base).normalize_or_zero()
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn projectionview(&self) -> Mat4 {
        self.projectionview
    }

    pub fn projectionview_inverse(&self) -> Mat4 {
        self.projectionview_inverse
    }

    pub fn pixel_space(&self) -> Mat4 {
        self.pixel_space
    }

    pub fn resolution(&self) -> Vec2 {
        self.resolution
    }

    pub fn eyeposition(&self) -> Vec3 {
        self.eyeposition
    }

    pub fn light_direction(&self) -> Vec3 {
        self.light_direction
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn to_clip(&self, space: CameraSpace) -> Mat4 {
        match space {
            CameraSpace::Data => self.projectionview,
            CameraSpace::Pixel => self.pixel_space,
            CameraSpace::Relative => self.relative_space,
            CameraSpace::Clip => Mat4::IDENTITY,
        }
    }

    pub fn from_clip(&self, space: CameraSpace) -> Mat4 {
        match space {
            CameraSpace::Data => self.projectionview_inverse,
            CameraSpace::Pixel => self.pixel_space_inverse,
            CameraSpace::Relative => self.relative_space_inverse,
            CameraSpace::Clip => Mat4::IDENTITY,
        }
    }

    fn compute_preprojection(&self, space: CameraSpace, markerspace: CameraSpace) -> Mat4 {
        if space == markerspace {
            return Mat4::IDENTITY;
        }
        self.from_clip(markerspace) * self.to_clip(space)
    }

    /// Returns the cached preprojection, registering it so later camera
    /// updates keep it current.
    pub fn preprojection(&mut self, space: CameraSpace, markerspace: CameraSpace) -> Mat4 {
        if let Some(matrix) = self.preprojections.get(&(space, markerspace)) {
            return *matrix;
        }
        let matrix = self.compute_preprojection(space, markerspace);
        self.preprojections.insert((space, markerspace), matrix);
        matrix
    }

    pub fn resolve(&self, binding: CameraBinding) -> Uniform {
        match binding {
            CameraBinding::View => Uniform::Mat4(self.view),
            CameraBinding::Projection => Uniform::Mat4(self.projection),
            CameraBinding::ProjectionView => Uniform::Mat4(self.projectionview),
            CameraBinding::PixelSpace => Uniform::Mat4(self.pixel_space),
            CameraBinding::Resolution => Uniform::Vec2(self.resolution),
            CameraBinding::EyePosition => Uniform::Vec3(self.eyeposition),
            CameraBinding::LightDirection => Uniform::Vec3(self.light_direction),
            CameraBinding::SpaceToClip(space) => Uniform::Mat4(self.to_clip(space)),
            CameraBinding::Preprojection { space, markerspace } => Uniform::Mat4(
                self.preprojections
                    .get(&(space, markerspace))
                    .copied()
                    .unwrap_or_else(|| self.compute_preprojection(space, markerspace)),
            ),
        }
    }
}
