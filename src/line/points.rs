//! Polyline compaction and cumulative arc length.
use glam::{Mat4, Vec2, Vec4};

/// Relative tolerance for deciding that a run ends where it started.
const LOOP_EPSILON: f32 = 1e-6;

/// One record of the compacted polyline stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// A point of a run, by its index in the source array.
    Point(u32),
    /// Neighbour padding at either end of a run. Either a duplicate of the
    /// end point or, for closed loops, the wrap-around neighbour.
    Pad(u32),
    /// Separator between two runs.
    Break,
}

impl Slot {
    pub fn index(self) -> Option<u32> {
        match self {
            Slot::Point(i) | Slot::Pad(i) => Some(i),
            Slot::Break => None,
        }
    }

    /// Value of the validity flag stored next to each gathered position.
    pub fn flag(self) -> f32 {
        match self {
            Slot::Point(_) => 1.0,
            Slot::Pad(_) => 0.0,
            Slot::Break => -1.0,
        }
    }
}

fn point(points: &[f32], ndim: usize, i: usize) -> &[f32] {
    &points[i * ndim..(i + 1) * ndim]
}

fn is_finite(points: &[f32], ndim: usize, i: usize) -> bool {
    point(points, ndim, i).iter().all(|v| v.is_finite())
}

fn approx_eq(a: &[f32], b: &[f32]) -> bool {
    a.iter().zip(b).all(|(x, y)| {
        let scale = 1.0f32.max(x.abs()).max(y.abs());
        (x - y).abs() <= LOOP_EPSILON * scale
    })
}

/// Splits `points` (flat, `ndim` floats each) at non-finite entries and pads
/// every run so that `prev`/`next` lookups at run ends stay inside the run.
///
/// A run whose last point equals its first and that has at least three
/// segments is a closed loop: its padding wraps around (`prev` of the first
/// point is the second-to-last, `next` of the last is the second) so the seam
/// renders as a joint instead of two caps.
pub fn nan_free_points_indices(points: &[f32], ndim: usize) -> Vec<Slot> {
    let ndim = ndim.max(1);
    let n = points.len() / ndim;
    let mut out = Vec::with_capacity(n + 2);
    let mut was_break = true;
    // (first point of the run, slot holding its prev padding)
    let mut run_start: Option<(usize, usize)> = None;

    for i in 0..n {
        if is_finite(points, ndim, i) {
            if was_break {
                if !out.is_empty() {
                    out.push(Slot::Break);
                }
                run_start = Some((i, out.len()));
                out.push(Slot::Pad(i as u32));
            }
            out.push(Slot::Point(i as u32));
            was_break = false;
        } else {
            if let Some((start, pad_slot)) = run_start.take() {
                close_run(&mut out, points, ndim, start, i - 1, pad_slot);
            }
            was_break = true;
        }
    }
    if let Some((start, pad_slot)) = run_start {
        close_run(&mut out, points, ndim, start, n - 1, pad_slot);
    }
    out
}

fn close_run(
    out: &mut Vec<Slot>,
    points: &[f32],
    ndim: usize,
    start: usize,
    end: usize,
    pad_slot: usize,
) {
    let segments = end - start;
    let closed = segments >= 3 && approx_eq(point(points, ndim, start), point(points, ndim, end));
    if closed {
        out[pad_slot] = Slot::Pad((end - 1) as u32);
        out.push(Slot::Pad((start + 1) as u32));
    } else {
        out.push(Slot::Pad(end as u32));
    }
}

/// Copies `size`-float items of `src` into slot order. Breaks become zeros.
pub fn gather(src: &[f32], size: usize, slots: &[Slot]) -> Vec<f32> {
    let mut out = Vec::with_capacity(slots.len() * size);
    for slot in slots {
        match slot.index() {
            Some(i) => {
                let start = i as usize * size;
                match src.get(start..start + size) {
                    Some(item) => out.extend_from_slice(item),
                    None => out.extend(std::iter::repeat_n(0.0, size)),
                }
            }
            None => out.extend(std::iter::repeat_n(0.0, size)),
        }
    }
    out
}

/// Positions in slot order, each followed by its [`Slot::flag`].
pub fn gather_positions(points: &[f32], ndim: usize, slots: &[Slot]) -> Vec<f32> {
    let mut out = Vec::with_capacity(slots.len() * (ndim + 1));
    for (item, slot) in gather(points, ndim, slots).chunks_exact(ndim).zip(slots) {
        out.extend_from_slice(item);
        out.push(slot.flag());
    }
    out
}

/// Positions of independent segments, each followed by 1 or, for a
/// non-finite point, -1 with its coordinates zeroed.
pub fn flag_positions(points: &[f32], ndim: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(points.len() / ndim * (ndim + 1));
    for item in points.chunks_exact(ndim) {
        if item.iter().all(|v| v.is_finite()) {
            out.extend_from_slice(item);
            out.push(1.0);
        } else {
            out.extend(std::iter::repeat_n(0.0, ndim));
            out.push(-1.0);
        }
    }
    out
}

fn to_screen(points: &[f32], ndim: usize, i: usize, pv: &Mat4, half_res: Vec2) -> Vec2 {
    let p = point(points, ndim, i);
    let v = Vec4::new(p[0], p.get(1).copied().unwrap_or(0.0), p.get(2).copied().unwrap_or(0.0), 1.0);
    let clip = *pv * v;
    Vec2::new(clip.x, clip.y) / clip.w * half_res
}

/// Pixel distance travelled along each run up to every point, projected by
/// `pv` onto a viewport of `resolution` pixels. Non-finite points reset the
/// accumulation, so the next run starts at zero.
pub fn compute_lastlen(points: &[f32], ndim: usize, pv: Mat4, resolution: Vec2) -> Vec<f32> {
    let ndim = ndim.max(1);
    let n = points.len() / ndim;
    let half_res = resolution * 0.5;
    let mut out = Vec::with_capacity(n);
    let mut acc = 0.0f32;
    let mut prev: Option<Vec2> = None;
    for i in 0..n {
        if !is_finite(points, ndim, i) {
            acc = 0.0;
            prev = None;
            out.push(0.0);
            continue;
        }
        let screen = to_screen(points, ndim, i, &pv, half_res);
        if let Some(q) = prev {
            let step = (screen - q).length();
            if step.is_finite() {
                acc += step;
            }
        }
        out.push(acc);
        prev = Some(screen);
    }
    out
}

/// Like [`compute_lastlen`], but every pair of points is its own run.
pub fn compute_lastlen_segments(
    points: &[f32],
    ndim: usize,
    pv: Mat4,
    resolution: Vec2,
) -> Vec<f32> {
    let ndim = ndim.max(1);
    let half_res = resolution * 0.5;
    let n = points.len() / ndim;
    let mut out = vec![0.0; n];
    for k in 0..n / 2 {
        let (a, b) = (2 * k, 2 * k + 1);
        if is_finite(points, ndim, a) && is_finite(points, ndim, b) {
            let d = to_screen(points, ndim, b, &pv, half_res)
                - to_screen(points, ndim, a, &pv, half_res);
            out[b] = d.length();
        }
    }
    out
}
