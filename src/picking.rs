//! GPU picking: an offscreen pass writes `(object id, instance)` per pixel, a
//! small window around the query is read back asynchronously and scanned on
//! the CPU.
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use glam::Vec2;
use iced::wgpu::*;
use log::debug;
use serde::Deserialize;

use crate::plot::PlotId;

/// Picking queries, in unitless scene coordinates with a bottom-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PickQuery {
    /// The hit closest to `(x, y)` within `range`.
    Closest { x: f32, y: f32, range: f32 },
    /// Every distinct hit within `range`, nearest first.
    Sorted { x: f32, y: f32, range: f32 },
    /// Every distinct hit inside the rectangle.
    Rect { x: f32, y: f32, w: f32, h: f32 },
}

/// A plot and the point index under the pointer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PickHit {
    pub plot: PlotId,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickResult {
    pub seq: u64,
    pub query: PickQuery,
    pub hits: Vec<PickHit>,
}

/// Raw texel of the pick target: 1-based object id (0 is background) and
/// instance index.
pub type PickTexel = [u32; 2];

/// Device-pixel region to read back, clamped to the target, with the query
/// center relative to the target's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PickWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub cx: i32,
    pub cy: i32,
}

impl PickWindow {
    /// Returns `None` when the query lies entirely outside the target.
    pub fn new(query: &PickQuery, px_per_unit: f32, target: (u32, u32)) -> Option<Self> {
        let (tw, th) = (target.0 as f32, target.1 as f32);
        let to_device = |x: f32, y: f32| Vec2::new(x * px_per_unit, th - y * px_per_unit);
        let (min, max, center) = match *query {
            PickQuery::Closest { x, y, range } | PickQuery::Sorted { x, y, range } => {
                let c = to_device(x, y);
                let r = (range * px_per_unit).ceil().max(1.0);
                (c - r, c + r + 1.0, c)
            }
            PickQuery::Rect { x, y, w, h } => {
                let a = to_device(x, y + h);
                let b = to_device(x + w, y);
                (a, b, (a + b) * 0.5)
            }
        };
        let x0 = min.x.floor().clamp(0.0, tw);
        let y0 = min.y.floor().clamp(0.0, th);
        let x1 = max.x.ceil().clamp(0.0, tw);
        let y1 = max.y.ceil().clamp(0.0, th);
        (x1 > x0 && y1 > y0).then(|| Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
            cx: center.x.floor() as i32,
            cy: center.y.floor() as i32,
        })
    }

    fn distance2(&self, col: usize, row: usize) -> i64 {
        let dx = (self.x as i64 + col as i64) - self.cx as i64;
        let dy = (self.y as i64 + row as i64) - self.cy as i64;
        dx * dx + dy * dy
    }
}

/// Decodes a readback buffer with padded rows into row-major texels.
pub fn decode_texels(data: &[u8], bytes_per_row: u32, width: u32, height: u32) -> Vec<PickTexel> {
    let mut out = Vec::with_capacity((width * height) as usize);
    for row in 0..height as usize {
        let start = row * bytes_per_row as usize;
        let end = start + width as usize * 8;
        let Some(bytes) = data.get(start..end) else {
            break;
        };
        out.extend(bytes.chunks_exact(8).map(|px| {
            [
                u32::from_le_bytes([px[0], px[1], px[2], px[3]]),
                u32::from_le_bytes([px[4], px[5], px[6], px[7]]),
            ]
        }));
    }
    out
}

fn occupied<'a>(
    window: &'a PickWindow,
    data: &'a [PickTexel],
) -> impl Iterator<Item = (PickTexel, i64)> + 'a {
    let width = window.width.max(1) as usize;
    data.iter()
        .enumerate()
        .filter(|(_, texel)| texel[0] != 0)
        .map(move |(i, texel)| (*texel, window.distance2(i % width, i / width)))
}

/// Nearest non-background texel.
pub fn closest(window: &PickWindow, data: &[PickTexel]) -> Option<PickTexel> {
    let mut best: Option<(PickTexel, i64)> = None;
    for (texel, d2) in occupied(window, data) {
        if best.is_none_or(|(_, bd2)| d2 < bd2) {
            best = Some((texel, d2));
        }
    }
    best.map(|(texel, _)| texel)
}

/// Distinct texels ordered by their nearest distance to the center.
pub fn sorted(window: &PickWindow, data: &[PickTexel]) -> Vec<PickTexel> {
    let mut nearest: Vec<(PickTexel, i64)> = Vec::new();
    for (texel, d2) in occupied(window, data) {
        match nearest.iter_mut().find(|(t, _)| *t == texel) {
            Some(entry) => entry.1 = entry.1.min(d2),
            None => nearest.push((texel, d2)),
        }
    }
    nearest.sort_by_key(|&(_, d2)| d2);
    nearest.into_iter().map(|(texel, _)| texel).collect()
}

/// Distinct texels in first-seen row-major order.
pub fn in_rect(data: &[PickTexel]) -> Vec<PickTexel> {
    let mut seen = HashSet::new();
    data.iter()
        .filter(|texel| texel[0] != 0 && seen.insert(**texel))
        .copied()
        .collect()
}

/// Scans `data` for `query` and maps texels to plots. `objects[id - 1]` is the
/// plot drawn with object id `id`; `point_index` maps an instance back to a
/// point of that plot.
pub fn resolve(
    query: &PickQuery,
    window: &PickWindow,
    data: &[PickTexel],
    objects: &[PlotId],
    point_index: impl Fn(&PlotId, u32) -> Option<u32>,
) -> Vec<PickHit> {
    let raw = match query {
        PickQuery::Closest { .. } => closest(window, data).into_iter().collect(),
        PickQuery::Sorted { .. } => sorted(window, data),
        PickQuery::Rect { .. } => in_rect(data),
    };
    let mut hits = Vec::new();
    for [id, instance] in raw {
        let Some(plot) = (id as usize).checked_sub(1).and_then(|i| objects.get(i)) else {
            continue;
        };
        let Some(index) = point_index(plot, instance) else {
            debug!("pick hit on {plot} instance {instance} has no point");
            continue;
        };
        let hit = PickHit {
            plot: plot.clone(),
            index,
        };
        if !hits.contains(&hit) {
            hits.push(hit);
        }
    }
    hits
}

#[derive(Debug, Default)]
struct MailboxSlots {
    request: Option<(u64, PickQuery)>,
    result: Option<PickResult>,
}

/// Per-screen exchange between the event side, which submits queries, and the
/// renderer, which answers them. Only newer requests and results replace
/// older ones.
#[derive(Debug, Default)]
pub struct PickMailbox {
    slots: Mutex<MailboxSlots>,
}

impl PickMailbox {
    fn slots(&self) -> std::sync::MutexGuard<'_, MailboxSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn submit(&self, seq: u64, query: PickQuery) {
        let mut slots = self.slots();
        if slots.request.is_none_or(|(s, _)| s < seq) {
            slots.request = Some((seq, query));
        }
    }

    pub fn take_request(&self) -> Option<(u64, PickQuery)> {
        self.slots().request.take()
    }

    pub fn has_request(&self) -> bool {
        self.slots().request.is_some()
    }

    pub fn publish(&self, result: PickResult) {
        let mut slots = self.slots();
        if slots.result.as_ref().is_none_or(|r| r.seq < result.seq) {
            slots.result = Some(result);
        }
    }

    pub fn take_result(&self) -> Option<PickResult> {
        self.slots().result.take()
    }
}

pub const PICK_FORMAT: TextureFormat = TextureFormat::Rg32Uint;
const BYTES_PER_TEXEL: u32 = 8;

/// A readback in flight. The object table is captured with it since ids are
/// reassigned every frame.
struct PendingReadback {
    seq: u64,
    query: PickQuery,
    window: PickWindow,
    objects: Vec<PlotId>,
    bytes_per_row: u32,
    needed: u64,
    map_status: Arc<Mutex<Option<Result<(), BufferAsyncError>>>>,
}

/// A finished readback, ready to be resolved against the registry.
pub struct Readback {
    pub seq: u64,
    pub query: PickQuery,
    pub window: PickWindow,
    pub objects: Vec<PlotId>,
    pub texels: Vec<PickTexel>,
}

/// Offscreen id target plus the readback staging buffer.
#[derive(Default)]
pub struct PickingPass {
    texture: Option<Texture>,
    view: Option<TextureView>,
    size: (u32, u32),
    staging: Option<Buffer>,
    pending: Option<PendingReadback>,
}

impl PickingPass {
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.size = (width.max(1), height.max(1));
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    /// The id target, recreated when the size changed.
    pub fn target(&mut self, device: &Device) -> Option<&TextureView> {
        let stale = self.texture.as_ref().is_none_or(|t| {
            let size = t.size();
            (size.width, size.height) != self.size
        });
        if stale || self.view.is_none() {
            let texture = device.create_texture(&TextureDescriptor {
                label: Some("pick texture"),
                size: Extent3d {
                    width: self.size.0,
                    height: self.size.1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: TextureDimension::D2,
                format: PICK_FORMAT,
                usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
                view_formats: &[],
            });
            if let Some(old) = self.texture.replace(texture) {
                old.destroy();
            }
            self.view = self
                .texture
                .as_ref()
                .map(|t| t.create_view(&TextureViewDescriptor::default()));
        }
        self.view.as_ref()
    }

    fn ensure_staging(&mut self, device: &Device, needed: u64) {
        if self.staging.as_ref().is_some_and(|b| b.size() >= needed) {
            return;
        }
        self.staging = Some(device.create_buffer(&BufferDescriptor {
            label: Some("pick staging"),
            size: needed.max(4096),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
    }

    /// Copies `window` out of the id target (already drawn into by `encoder`),
    /// submits, and starts mapping the staging buffer.
    pub fn start_readback(
        &mut self,
        device: &Device,
        queue: &Queue,
        mut encoder: CommandEncoder,
        seq: u64,
        query: PickQuery,
        window: PickWindow,
        objects: Vec<PlotId>,
    ) {
        let bytes_per_row = (window.width * BYTES_PER_TEXEL).div_ceil(COPY_BYTES_PER_ROW_ALIGNMENT)
            * COPY_BYTES_PER_ROW_ALIGNMENT;
        let needed = bytes_per_row as u64 * window.height as u64;
        self.ensure_staging(device, needed);
        let (Some(texture), Some(staging)) = (self.texture.as_ref(), self.staging.as_ref()) else {
            return;
        };
        encoder.copy_texture_to_buffer(
            TexelCopyTextureInfo {
                texture,
                mip_level: 0,
                origin: Origin3d {
                    x: window.x,
                    y: window.y,
                    z: 0,
                },
                aspect: TextureAspect::All,
            },
            TexelCopyBufferInfo {
                buffer: staging,
                layout: TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(bytes_per_row),
                    rows_per_image: Some(window.height),
                },
            },
            Extent3d {
                width: window.width,
                height: window.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit(std::iter::once(encoder.finish()));

        let map_status = Arc::new(Mutex::new(None));
        let status = Arc::clone(&map_status);
        staging.slice(0..needed).map_async(MapMode::Read, move |res| {
            *status.lock().unwrap_or_else(PoisonError::into_inner) = Some(res);
        });
        self.pending = Some(PendingReadback {
            seq,
            query,
            window,
            objects,
            bytes_per_row,
            needed,
            map_status,
        });
    }

    /// Polls the device without blocking. Returns the texels once mapping
    /// finished; a failed mapping yields an empty readback.
    pub fn poll(&mut self, device: &Device) -> Option<Readback> {
        let pending = self.pending.as_ref()?;
        let _ = device.poll(PollType::Poll);
        let status = pending
            .map_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let pending = self.pending.take()?;

        let texels = match (status, self.staging.as_ref()) {
            (Ok(()), Some(staging)) => {
                let slice = staging.slice(0..pending.needed);
                let texels = decode_texels(
                    &slice.get_mapped_range(),
                    pending.bytes_per_row,
                    pending.window.width,
                    pending.window.height,
                );
                staging.unmap();
                texels
            }
            (Err(err), staging) => {
                debug!("pick readback failed: {err}");
                if let Some(staging) = staging {
                    staging.unmap();
                }
                Vec::new()
            }
            (Ok(()), None) => Vec::new(),
        };
        Some(Readback {
            seq: pending.seq,
            query: pending.query,
            window: pending.window,
            objects: pending.objects,
            texels,
        })
    }

    pub fn destroy(&mut self) {
        if let Some(texture) = self.texture.take() {
            texture.destroy();
        }
        self.view = None;
        if let Some(staging) = self.staging.take() {
            staging.destroy();
        }
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(width: u32, height: u32, cx: i32, cy: i32) -> PickWindow {
        PickWindow {
            x: 0,
            y: 0,
            width,
            height,
            cx,
            cy,
        }
    }

    #[test]
    fn test_window_flips_and_scales() {
        let query = PickQuery::Closest {
            x: 10.0,
            y: 10.0,
            range: 2.0,
        };
        let w = PickWindow::new(&query, 2.0, (200, 100)).unwrap();
        assert_eq!((w.cx, w.cy), (20, 80));
        assert_eq!((w.x, w.y, w.width, w.height), (16, 76, 9, 9));
    }

    #[test]
    fn test_window_clamps_to_target() {
        let query = PickQuery::Rect {
            x: -10.0,
            y: -10.0,
            w: 30.0,
            h: 30.0,
        };
        let w = PickWindow::new(&query, 1.0, (100, 100)).unwrap();
        assert_eq!((w.x, w.y, w.width, w.height), (0, 80, 20, 20));
        let outside = PickQuery::Closest {
            x: 500.0,
            y: 500.0,
            range: 1.0,
        };
        assert!(PickWindow::new(&outside, 1.0, (100, 100)).is_none());
    }

    #[test]
    fn test_decode_skips_row_padding() {
        let mut bytes = vec![0u8; 512];
        bytes[0..4].copy_from_slice(&3u32.to_le_bytes());
        bytes[4..8].copy_from_slice(&7u32.to_le_bytes());
        bytes[256..260].copy_from_slice(&1u32.to_le_bytes());
        let texels = decode_texels(&bytes, 256, 2, 2);
        assert_eq!(texels, vec![[3, 7], [0, 0], [1, 0], [0, 0]]);
    }

    #[test]
    fn test_closest_and_sorted() {
        // 3x3 window centered on (1, 1)
        let data = [
            [1, 0], [0, 0], [2, 5],
            [0, 0], [0, 0], [2, 4],
            [0, 0], [0, 0], [0, 0],
        ];
        let w = window(3, 3, 1, 1);
        assert_eq!(closest(&w, &data), Some([2, 4]));
        assert_eq!(sorted(&w, &data), vec![[2, 4], [1, 0], [2, 5]]);
        assert_eq!(in_rect(&data), vec![[1, 0], [2, 5], [2, 4]]);
        assert_eq!(closest(&w, &[[0, 0]; 9]), None);
    }

    #[test]
    fn test_resolve_maps_ids_to_plots() {
        let objects = vec![PlotId::from("a"), PlotId::from("b")];
        let data = [[2, 3], [1, 0], [9, 0], [2, 3]];
        let w = window(4, 1, 0, 0);
        let query = PickQuery::Rect {
            x: 0.0,
            y: 0.0,
            w: 4.0,
            h: 1.0,
        };
        let hits = resolve(&query, &w, &data, &objects, |plot, instance| {
            (plot.as_str() == "b").then_some(instance + 10)
        });
        assert_eq!(
            hits,
            vec![PickHit {
                plot: PlotId::from("b"),
                index: 13
            }]
        );
    }

    #[test]
    fn test_mailbox_keeps_newest() {
        let mailbox = PickMailbox::default();
        let q = PickQuery::Closest {
            x: 0.0,
            y: 0.0,
            range: 1.0,
        };
        mailbox.submit(2, q);
        mailbox.submit(1, q);
        assert_eq!(mailbox.take_request().map(|(s, _)| s), Some(2));
        mailbox.publish(PickResult {
            seq: 5,
            query: q,
            hits: Vec::new(),
        });
        mailbox.publish(PickResult {
            seq: 4,
            query: q,
            hits: Vec::new(),
        });
        assert_eq!(mailbox.take_result().map(|r| r.seq), Some(5));
        assert!(mailbox.take_result().is_none());
    }
}
