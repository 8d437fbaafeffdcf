//! Shared glyph SDF atlas.
use std::{
    collections::HashMap,
    sync::{
        Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use glam::Vec2;
use iced::wgpu::*;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::Deserialize;

use crate::config::AtlasConfig;
use crate::error::{Error, Result};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// Identifies one GPU device. Atlas textures cannot be shared between devices,
/// so each one gets its own copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub fn next() -> Self {
        ContextId(NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// A glyph as rasterized by the host.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GlyphDescriptor {
    /// SDF values, row-major over the pixel rectangle covered by `uv`.
    pub bitmap: Vec<f32>,
    /// `[x0, y0, x1, y1]` in 0..1 atlas coordinates.
    pub uv: [f32; 4],
    /// Glyph bounding box size, in em.
    pub size: [f32; 2],
    /// Offset of the bounding box's minimum corner from the glyph origin, in em.
    pub min_offset: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct GlyphInfo {
    uv: [f32; 4],
    size: Vec2,
    min_offset: Vec2,
}

/// Placement of one glyph quad.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphQuad {
    pub uv: [f32; 4],
    /// Quad size including SDF padding.
    pub size: Vec2,
    /// Quad offset from the glyph origin.
    pub offset: Vec2,
}

#[derive(Debug)]
struct AtlasTexture {
    texture: Texture,
    view: TextureView,
    sampler: Sampler,
}

#[derive(Debug, Default)]
struct ContextSlot {
    uploaded_version: Option<u64>,
    gpu: Option<AtlasTexture>,
}

/// Single-channel float bitmap holding every glyph SDF the host has sent.
#[derive(Debug)]
pub struct TextureAtlas {
    config: AtlasConfig,
    data: Vec<f32>,
    glyphs: HashMap<String, GlyphInfo>,
    /// Bumped whenever new pixels are written.
    version: u64,
    contexts: HashMap<ContextId, ContextSlot>,
}

impl TextureAtlas {
    pub fn new(config: AtlasConfig) -> Self {
        let side = config.size.max(1) as usize;
        Self {
            data: vec![config.glyph_padding; side * side],
            config,
            glyphs: HashMap::new(),
            version: 0,
            contexts: HashMap::new(),
        }
    }

    pub fn size(&self) -> u32 {
        self.config.size.max(1)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.glyphs.contains_key(hash)
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Writes one glyph. Returns `false` without touching the bitmap when the
    /// hash is already present.
    pub fn insert_glyph(
        &mut self,
        hash: &str,
        bitmap: &[f32],
        uv: [f32; 4],
        size: Vec2,
        min_offset: Vec2,
    ) -> Result<bool> {
        if self.glyphs.contains_key(hash) {
            return Ok(false);
        }
        let side = self.size() as usize;
        let to_px = |v: f32| ((v * side as f32).round().max(0.0) as usize).min(side);
        let (x0, y0, x1, y1) = (to_px(uv[0]), to_px(uv[1]), to_px(uv[2]), to_px(uv[3]));
        let width = x1.saturating_sub(x0);
        let height = y1.saturating_sub(y0);
        if bitmap.len() != width * height {
            return Err(Error::invalid(
                format!("glyph {hash}"),
                format!(
                    "bitmap has {} values but its uv rectangle covers {width}x{height} pixels",
                    bitmap.len()
                ),
            ));
        }
        for (row, src) in bitmap.chunks_exact(width.max(1)).enumerate().take(height) {
            let start = (y0 + row) * side + x0;
            self.data[start..start + width].copy_from_slice(src);
        }
        self.glyphs.insert(
            hash.to_string(),
            GlyphInfo {
                uv,
                size,
                min_offset,
            },
        );
        Ok(true)
    }

    /// Inserts a batch. Only a batch that wrote new pixels marks the GPU copies
    /// stale. A bad glyph stops the batch, but the glyphs written before it
    /// still reach the GPU.
    pub fn insert_glyphs(&mut self, glyphs: &IndexMap<String, GlyphDescriptor>) -> Result<bool> {
        let mut written = false;
        let mut result = Ok(());
        for (hash, glyph) in glyphs {
            match self.insert_glyph(
                hash,
                &glyph.bitmap,
                glyph.uv,
                Vec2::from(glyph.size),
                Vec2::from(glyph.min_offset),
            ) {
                Ok(new) => written |= new,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        if written {
            self.version = self.version.wrapping_add(1);
            debug!(
                "atlas v{}: {} glyphs, {} contexts to refresh",
                self.version,
                self.glyphs.len(),
                self.contexts.len()
            );
        }
        result.map(|()| written)
    }

    /// UV rectangle, padded quad size and quad offset of a glyph at `scale`.
    pub fn get_glyph_data(&self, hash: &str, scale: f32) -> Option<GlyphQuad> {
        let Some(info) = self.glyphs.get(hash) else {
            warn!("glyph {hash} not found in texture atlas");
            return None;
        };
        let pad = self.config.glyph_padding / self.config.pix_per_glyph.max(1.0);
        Some(GlyphQuad {
            uv: info.uv,
            size: (info.size + Vec2::splat(2.0 * pad)) * scale,
            offset: (info.min_offset - Vec2::splat(pad)) * scale,
        })
    }

    /// Starts tracking `context`. A new context is stale until its first upload.
    pub fn register_context(&mut self, context: ContextId) {
        self.contexts.entry(context).or_default();
    }

    /// Whether `context` holds a texture older than the bitmap.
    pub fn is_stale(&self, context: ContextId) -> bool {
        self.contexts
            .get(&context)
            .is_some_and(|slot| slot.uploaded_version != Some(self.version))
    }

    fn mark_uploaded(&mut self, context: ContextId) {
        let version = self.version;
        self.contexts.entry(context).or_default().uploaded_version = Some(version);
    }

    /// Texture view and sampler for `context`, created on first use and
    /// re-uploaded when glyphs were added since.
    pub fn get_texture(
        &mut self,
        context: ContextId,
        device: &Device,
        queue: &Queue,
    ) -> Option<(&TextureView, &Sampler)> {
        self.register_context(context);
        let needs_texture = self
            .contexts
            .get(&context)
            .is_none_or(|slot| slot.gpu.is_none());
        if needs_texture {
            let gpu = self.create_texture(device);
            self.contexts.entry(context).or_default().gpu = Some(gpu);
        }
        self.refresh(context, queue);
        self.contexts
            .get(&context)
            .and_then(|slot| slot.gpu.as_ref())
            .map(|gpu| (&gpu.view, &gpu.sampler))
    }

    /// Re-uploads the bitmap to `context` if it has a texture and it is stale.
    pub fn refresh(&mut self, context: ContextId, queue: &Queue) {
        if !self.is_stale(context) {
            return;
        }
        let Some(gpu) = self.contexts.get(&context).and_then(|s| s.gpu.as_ref()) else {
            return;
        };
        let side = self.size();
        queue.write_texture(
            TexelCopyTextureInfo {
                texture: &gpu.texture,
                mip_level: 0,
                origin: Origin3d::ZERO,
                aspect: TextureAspect::All,
            },
            bytemuck::cast_slice(&self.data),
            TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(side * 4),
                rows_per_image: Some(side),
            },
            Extent3d {
                width: side,
                height: side,
                depth_or_array_layers: 1,
            },
        );
        self.mark_uploaded(context);
    }

    /// Drops the texture owned by `context`.
    pub fn release_context(&mut self, context: ContextId) {
        if let Some(slot) = self.contexts.remove(&context)
            && let Some(gpu) = slot.gpu
        {
            gpu.texture.destroy();
        }
    }

    fn create_texture(&self, device: &Device) -> AtlasTexture {
        let side = self.size();
        let texture = device.create_texture(&TextureDescriptor {
            label: Some("glyph atlas"),
            size: Extent3d {
                width: side,
                height: side,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::R32Float,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&TextureViewDescriptor::default());
        // Nearest + clamp: interpolating would bleed neighbouring glyphs into each other.
        let sampler = device.create_sampler(&SamplerDescriptor {
            label: Some("glyph atlas sampler"),
            address_mode_u: AddressMode::ClampToEdge,
            address_mode_v: AddressMode::ClampToEdge,
            address_mode_w: AddressMode::ClampToEdge,
            mag_filter: FilterMode::Nearest,
            min_filter: FilterMode::Nearest,
            ..Default::default()
        });
        AtlasTexture {
            texture,
            view,
            sampler,
        }
    }
}

/// Atlas handle shared by every screen configured to use it.
#[derive(Clone, Debug)]
pub struct SharedAtlas {
    inner: Arc<RwLock<TextureAtlas>>,
}

impl SharedAtlas {
    pub fn new(config: AtlasConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(TextureAtlas::new(config))),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TextureAtlas> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, TextureAtlas> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ptr_eq(&self, other: &SharedAtlas) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_atlas() -> TextureAtlas {
        TextureAtlas::new(AtlasConfig {
            size: 8,
            pix_per_glyph: 4.0,
            glyph_padding: 1.0,
        })
    }

    fn glyph(value: f32) -> GlyphDescriptor {
        GlyphDescriptor {
            bitmap: vec![value; 4],
            uv: [0.25, 0.5, 0.5, 0.75],
            size: [0.5, 0.5],
            min_offset: [0.0, -0.1],
        }
    }

    #[test]
    fn test_glyph_written_at_uv_rectangle() {
        let mut atlas = small_atlas();
        let bitmap = [1.0, 2.0, 3.0, 4.0];
        assert!(
            atlas
                .insert_glyph("a", &bitmap, [0.25, 0.5, 0.5, 0.75], Vec2::ONE, Vec2::ZERO)
                .unwrap()
        );
        // uv (0.25, 0.5)..(0.5, 0.75) on an 8px atlas is columns 2..4, rows 4..6
        assert_eq!(&atlas.data()[4 * 8 + 2..4 * 8 + 4], &[1.0, 2.0]);
        assert_eq!(&atlas.data()[5 * 8 + 2..5 * 8 + 4], &[3.0, 4.0]);
        assert_eq!(atlas.data()[4 * 8 + 1], 1.0);
    }

    #[test]
    fn test_insert_is_idempotent() {
        let mut atlas = small_atlas();
        let context = ContextId::next();
        atlas.register_context(context);

        let first: IndexMap<_, _> = [("g".to_string(), glyph(0.1))].into_iter().collect();
        assert!(atlas.insert_glyphs(&first).unwrap());
        assert!(atlas.is_stale(context));
        atlas.mark_uploaded(context);

        let second: IndexMap<_, _> = [("g".to_string(), glyph(0.9))].into_iter().collect();
        assert!(!atlas.insert_glyphs(&second).unwrap());
        assert!(!atlas.is_stale(context), "duplicate hash must not trigger an upload");
        assert_eq!(atlas.data()[4 * 8 + 2], 0.1);

        let third: IndexMap<_, _> = [("h".to_string(), GlyphDescriptor {
            uv: [0.0, 0.0, 0.25, 0.25],
            ..glyph(0.5)
        })]
        .into_iter()
        .collect();
        assert!(atlas.insert_glyphs(&third).unwrap());
        assert!(atlas.is_stale(context));
    }

    #[test]
    fn test_bitmap_size_mismatch() {
        let mut atlas = small_atlas();
        let err = atlas
            .insert_glyph("bad", &[1.0; 3], [0.0, 0.0, 0.25, 0.25], Vec2::ONE, Vec2::ZERO)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
        assert!(!atlas.contains("bad"));
    }

    #[test]
    fn test_glyph_quad_includes_padding() {
        let mut atlas = small_atlas();
        let glyphs: IndexMap<_, _> = [("g".to_string(), glyph(0.1))].into_iter().collect();
        atlas.insert_glyphs(&glyphs).unwrap();
        let quad = atlas.get_glyph_data("g", 2.0).unwrap();
        // padding is 1px at 4px per glyph = 0.25em on each side
        assert_eq!(quad.size, Vec2::new(2.0, 2.0));
        assert!((quad.offset - Vec2::new(-0.5, -0.7)).length() < 1e-6);
        assert!(atlas.get_glyph_data("missing", 1.0).is_none());
    }

    #[test]
    fn test_partial_batch_still_marks_stale() {
        let mut atlas = small_atlas();
        let context = ContextId::next();
        atlas.register_context(context);
        let first: IndexMap<_, _> = [("h".to_string(), GlyphDescriptor {
            uv: [0.0, 0.0, 0.25, 0.25],
            ..glyph(0.5)
        })]
        .into_iter()
        .collect();
        atlas.insert_glyphs(&first).unwrap();
        atlas.mark_uploaded(context);
        let version = atlas.version();

        let batch: IndexMap<_, _> = [
            ("g".to_string(), glyph(0.7)),
            ("bad".to_string(), GlyphDescriptor {
                bitmap: vec![1.0; 3],
                uv: [0.5, 0.0, 0.75, 0.25],
                ..glyph(0.0)
            }),
        ]
        .into_iter()
        .collect();
        assert!(atlas.insert_glyphs(&batch).is_err());
        assert!(atlas.contains("g"));
        assert!(!atlas.contains("bad"));
        assert_eq!(atlas.version(), version + 1);
        assert!(atlas.is_stale(context), "written glyph must reach the GPU");
    }

    #[test]
    fn test_context_stale_until_uploaded() {
        let mut atlas = small_atlas();
        let context = ContextId::next();
        atlas.register_context(context);
        // the first upload is owed even before any glyph arrives
        assert!(atlas.is_stale(context));
        atlas.mark_uploaded(context);
        assert!(!atlas.is_stale(context));

        let glyphs: IndexMap<_, _> = [("g".to_string(), glyph(0.1))].into_iter().collect();
        atlas.insert_glyphs(&glyphs).unwrap();
        assert!(atlas.is_stale(context));
        atlas.mark_uploaded(context);
        assert!(!atlas.is_stale(context));

        atlas.release_context(context);
        assert!(!atlas.is_stale(context));
    }

    #[test]
    fn test_unregistered_context_is_not_stale() {
        let atlas = small_atlas();
        assert!(!atlas.is_stale(ContextId::next()));
    }
}
