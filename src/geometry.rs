//! CPU side of a plot's vertex buffers.
//!
//! A [`Geometry`] owns a set of interleaved buffers. Each buffer stores one
//! record per point and exposes overlapping strided views, so a polyline's
//! `prev`, `start`, `end` and `next` streams all read the same memory.
//!
//! Updates that fit the allocated capacity are written in place. Updates that
//! need more room are staged, and the whole geometry is reallocated once every
//! field has reported its new data. The generation counter bumps exactly once
//! per reallocation; GPU consumers compare it to decide whether to recreate
//! their buffers or just rewrite them.
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use log::debug;

use crate::error::{Error, Result};
use crate::plot::PlotId;

static NEXT_BUFFER: AtomicU64 = AtomicU64::new(1);

/// Identity of one allocation. Changes only when a buffer is reallocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_BUFFER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One named stream inside an interleaved record.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    /// Floats per point.
    pub size: usize,
    /// Float offset inside the record.
    pub offset: usize,
    /// Points currently holding valid data.
    pub count: usize,
}

/// Shape of the strided views over a buffer: one entry per view giving its
/// name and offset in records, plus the distance between instances in records.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewSpec {
    pub views: Vec<(String, usize)>,
    pub stride_records: usize,
}

impl ViewSpec {
    /// `prev`, `start`, `end` and `next` over consecutive points.
    pub fn polyline() -> Self {
        Self {
            views: vec![
                ("prev".into(), 0),
                ("start".into(), 1),
                ("end".into(), 2),
                ("next".into(), 3),
            ],
            stride_records: 1,
        }
    }

    /// `start` and `end` of the segment an interior point begins. The record
    /// before and after it only feed `prev`/`next` of the positions buffer.
    pub fn polyline_attributes() -> Self {
        Self {
            views: vec![("start".into(), 1), ("end".into(), 2)],
            stride_records: 1,
        }
    }

    /// Disjoint point pairs.
    pub fn segments() -> Self {
        Self {
            views: vec![("start".into(), 0), ("end".into(), 1)],
            stride_records: 2,
        }
    }

    fn max_offset(&self) -> usize {
        self.views.iter().map(|(_, o)| *o).max().unwrap_or(0)
    }

    /// Instances that can be drawn from `points` records.
    pub fn instances(&self, points: usize) -> usize {
        let max_offset = self.max_offset();
        if points <= max_offset {
            return 0;
        }
        (points - max_offset - 1) / self.stride_records.max(1) + 1
    }
}

/// Byte offset of a view, regenerated whenever the buffer is reallocated.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferView {
    pub name: String,
    /// Float offset from the start of the buffer.
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct InterleavedBuffer {
    id: BufferId,
    fields: Vec<Field>,
    record: usize,
    spec: ViewSpec,
    views: Vec<BufferView>,
    data: Vec<f32>,
    capacity: usize,
    dirty: bool,
}

impl InterleavedBuffer {
    fn new(fields: &[(&str, usize)], spec: ViewSpec) -> Self {
        let mut offset = 0;
        let fields = fields
            .iter()
            .map(|&(name, size)| {
                let field = Field {
                    name: name.to_string(),
                    size,
                    offset,
                    count: 0,
                };
                offset += size;
                field
            })
            .collect();
        let mut buffer = Self {
            id: BufferId::next(),
            fields,
            record: offset,
            spec,
            views: Vec::new(),
            data: Vec::new(),
            capacity: 0,
            dirty: true,
        };
        buffer.regenerate_views();
        buffer
    }

    fn regenerate_views(&mut self) {
        self.views = self
            .spec
            .views
            .iter()
            .map(|(name, records)| BufferView {
                name: name.clone(),
                offset: records * self.record,
            })
            .collect();
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn views(&self) -> &[BufferView] {
        &self.views
    }

    /// Floats per point.
    pub fn record(&self) -> usize {
        self.record
    }

    /// Floats between consecutive instances of one view.
    pub fn view_stride(&self) -> usize {
        self.record * self.spec.stride_records
    }

    /// Allocated size in points.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Points for which every field has data.
    pub fn point_count(&self) -> usize {
        self.fields.iter().map(|f| f.count).min().unwrap_or(0)
    }

    pub fn instance_count(&self) -> usize {
        self.spec.instances(self.point_count())
    }

    /// Returns and clears the dirty flag.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    fn write_field(&mut self, index: usize, src: &[f32]) {
        let Field { size, offset, .. } = self.fields[index];
        let points = src.len() / size.max(1);
        for (i, item) in src.chunks_exact(size.max(1)).enumerate() {
            let start = i * self.record + offset;
            self.data[start..start + size].copy_from_slice(item);
        }
        self.fields[index].count = points;
        self.dirty = true;
    }

    fn read_field(&self, index: usize) -> Vec<f32> {
        let Field {
            size, offset, count, ..
        } = self.fields[index];
        let mut out = Vec::with_capacity(count * size);
        for i in 0..count {
            let start = i * self.record + offset;
            out.extend_from_slice(&self.data[start..start + size]);
        }
        out
    }
}

/// Result of [`Geometry::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Written into the existing allocation.
    InPlace,
    /// Waiting for the rest of the geometry before reallocating.
    Staged,
}

/// Result of [`Geometry::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Unchanged,
    Reallocated,
    /// Some fields still have to report their new data.
    Deferred,
}

#[derive(Debug, Clone)]
pub struct Geometry {
    owner: PlotId,
    buffers: IndexMap<String, InterleavedBuffer>,
    pending: IndexMap<String, Vec<f32>>,
    touched: HashSet<String>,
    generation: u64,
}

impl Geometry {
    pub fn new(owner: PlotId) -> Self {
        Self {
            owner,
            buffers: IndexMap::new(),
            pending: IndexMap::new(),
            touched: HashSet::new(),
            generation: 0,
        }
    }

    pub fn with_buffer(mut self, name: &str, fields: &[(&str, usize)], spec: ViewSpec) -> Self {
        self.buffers
            .insert(name.to_string(), InterleavedBuffer::new(fields, spec));
        self
    }

    /// Swaps in an empty buffer with a new field set. It fills on the next
    /// update batch, which reallocates the whole geometry. Staged data for
    /// fields that no longer exist is dropped.
    pub fn replace_buffer(&mut self, name: &str, fields: &[(&str, usize)], spec: ViewSpec) {
        self.buffers
            .insert(name.to_string(), InterleavedBuffer::new(fields, spec));
        let known: HashSet<String> = self
            .buffers
            .values()
            .flat_map(|b| b.fields.iter().map(|f| f.name.clone()))
            .collect();
        self.pending.retain(|field, _| known.contains(field));
        self.touched.clear();
    }

    pub fn owner(&self) -> &PlotId {
        &self.owner
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn buffer(&self, name: &str) -> Option<&InterleavedBuffer> {
        self.buffers.get(name)
    }

    pub fn buffers(&self) -> impl Iterator<Item = (&String, &InterleavedBuffer)> {
        self.buffers.iter()
    }

    pub fn buffers_mut(&mut self) -> impl Iterator<Item = (&String, &mut InterleavedBuffer)> {
        self.buffers.iter_mut()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Instances drawable from every buffer at once.
    pub fn instance_count(&self) -> usize {
        self.buffers
            .values()
            .map(InterleavedBuffer::instance_count)
            .min()
            .unwrap_or(0)
    }

    fn locate(&self, field: &str) -> Option<(usize, usize)> {
        self.buffers
            .values()
            .enumerate()
            .find_map(|(bi, b)| b.field_index(field).map(|fi| (bi, fi)))
    }

    /// Writes `data` into `field`, or stages it when it does not fit (or when a
    /// reallocation is already pending, so the new data lands in the new buffer).
    pub fn update(&mut self, field: &str, data: Vec<f32>) -> Result<UpdateOutcome> {
        let (bi, fi) = self.locate(field).ok_or_else(|| Error::UnknownBuffer {
            plot: self.owner.clone(),
            name: field.to_string(),
        })?;
        let buffer = &mut self.buffers[bi];
        let points = data.len() / buffer.fields[fi].size.max(1);
        if !self.pending.is_empty() || points > buffer.capacity {
            self.pending.insert(field.to_string(), data);
            return Ok(UpdateOutcome::Staged);
        }
        buffer.write_field(fi, &data);
        self.touched.insert(field.to_string());
        Ok(UpdateOutcome::InPlace)
    }

    /// Ends an update batch. Reallocates once if a resize is pending and every
    /// field reported in this batch or an earlier pending one.
    pub fn commit(&mut self) -> CommitOutcome {
        if self.pending.is_empty() {
            self.touched.clear();
            return CommitOutcome::Unchanged;
        }
        let missing: Vec<&str> = self
            .buffers
            .values()
            .flat_map(|b| b.fields.iter())
            .map(|f| f.name.as_str())
            .filter(|name| !self.pending.contains_key(*name) && !self.touched.contains(*name))
            .collect();
        if !missing.is_empty() {
            debug!("{}: resize deferred, waiting for {missing:?}", self.owner);
            self.touched.clear();
            return CommitOutcome::Deferred;
        }
        self.reallocate();
        CommitOutcome::Reallocated
    }

    fn reallocate(&mut self) {
        let mut pending = std::mem::take(&mut self.pending);
        for buffer in self.buffers.values_mut() {
            let sources: Vec<Vec<f32>> = (0..buffer.fields.len())
                .map(|fi| {
                    pending
                        .shift_remove(&buffer.fields[fi].name)
                        .unwrap_or_else(|| buffer.read_field(fi))
                })
                .collect();
            let points = buffer
                .fields
                .iter()
                .zip(&sources)
                .map(|(f, src)| src.len() / f.size.max(1))
                .max()
                .unwrap_or(0);

            buffer.id = BufferId::next();
            buffer.capacity = points;
            buffer.data = vec![0.0; points * buffer.record];
            for (fi, src) in sources.iter().enumerate() {
                buffer.write_field(fi, src);
            }
            buffer.regenerate_views();
        }
        self.touched.clear();
        self.generation = self.generation.wrapping_add(1);
        debug!(
            "{}: geometry reallocated (generation {})",
            self.owner, self.generation
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_geometry() -> Geometry {
        let mut geometry = Geometry::new(PlotId::from("line"))
            .with_buffer("positions", &[("position", 2)], ViewSpec::polyline())
            .with_buffer(
                "attributes",
                &[("color", 4), ("linewidth", 1)],
                ViewSpec::polyline_attributes(),
            );
        geometry.update("position", vec![0.0; 10]).unwrap();
        geometry.update("color", vec![1.0; 20]).unwrap();
        geometry.update("linewidth", vec![2.0; 5]).unwrap();
        assert_eq!(geometry.commit(), CommitOutcome::Reallocated);
        geometry
    }

    #[test]
    fn test_update_within_capacity_is_in_place() {
        let mut geometry = line_geometry();
        let id = geometry.buffer("positions").unwrap().id();
        let generation = geometry.generation();

        assert_eq!(
            geometry.update("position", vec![1.0; 8]).unwrap(),
            UpdateOutcome::InPlace
        );
        assert_eq!(geometry.commit(), CommitOutcome::Unchanged);

        let positions = geometry.buffer("positions").unwrap();
        assert_eq!(positions.id(), id);
        assert_eq!(geometry.generation(), generation);
        assert_eq!(positions.point_count(), 4);
        assert_eq!(positions.instance_count(), 1);
    }

    #[test]
    fn test_growth_waits_for_every_field() {
        let mut geometry = line_geometry();
        let generation = geometry.generation();
        let old_id = geometry.buffer("attributes").unwrap().id();

        assert_eq!(
            geometry.update("color", vec![0.5; 28]).unwrap(),
            UpdateOutcome::Staged
        );
        assert_eq!(geometry.commit(), CommitOutcome::Deferred);
        assert_eq!(geometry.generation(), generation);
        assert_eq!(geometry.instance_count(), 2);

        geometry.update("position", vec![3.0; 14]).unwrap();
        geometry.update("linewidth", vec![1.0; 7]).unwrap();
        assert_eq!(geometry.commit(), CommitOutcome::Reallocated);
        assert_eq!(geometry.generation(), generation + 1);

        let attributes = geometry.buffer("attributes").unwrap();
        assert_ne!(attributes.id(), old_id);
        for field in attributes.fields() {
            assert_eq!(field.count, 7);
        }
        assert_eq!(geometry.buffer("positions").unwrap().point_count(), 14 / 2);
        assert_eq!(geometry.instance_count(), 4);
    }

    #[test]
    fn test_interleaved_fields_do_not_clobber_each_other() {
        let mut geometry = line_geometry();
        geometry.update("linewidth", vec![9.0; 5]).unwrap();
        geometry.commit();
        let attributes = geometry.buffer("attributes").unwrap();
        assert_eq!(attributes.record(), 5);
        assert_eq!(&attributes.data()[0..5], &[1.0, 1.0, 1.0, 1.0, 9.0]);
        assert_eq!(&attributes.data()[5..10], &[1.0, 1.0, 1.0, 1.0, 9.0]);
    }

    #[test]
    fn test_views_follow_record_size() {
        let geometry = line_geometry();
        let offsets: Vec<usize> = geometry
            .buffer("positions")
            .unwrap()
            .views()
            .iter()
            .map(|v| v.offset)
            .collect();
        assert_eq!(offsets, vec![0, 2, 4, 6]);
        let attributes = geometry.buffer("attributes").unwrap();
        assert_eq!(attributes.views()[0].offset, 5);
        assert_eq!(attributes.view_stride(), 5);
    }

    #[test]
    fn test_unknown_field_fails_fast() {
        let mut geometry = line_geometry();
        assert!(matches!(
            geometry.update("colour", vec![]),
            Err(Error::UnknownBuffer { name, .. }) if name == "colour"
        ));
    }

    #[test]
    fn test_replaced_buffer_fills_on_next_batch() {
        let mut geometry = line_geometry();
        let generation = geometry.generation();
        geometry.replace_buffer(
            "attributes",
            &[("linewidth", 1)],
            ViewSpec::polyline_attributes(),
        );
        assert!(!geometry.has_field("color"));
        assert_eq!(geometry.instance_count(), 0);

        geometry.update("position", vec![0.0; 10]).unwrap();
        assert_eq!(
            geometry.update("linewidth", vec![3.0; 5]).unwrap(),
            UpdateOutcome::Staged
        );
        assert_eq!(geometry.commit(), CommitOutcome::Reallocated);
        assert_eq!(geometry.generation(), generation + 1);
        assert_eq!(geometry.buffer("attributes").unwrap().record(), 1);
        assert_eq!(geometry.instance_count(), 2);
    }

    #[test]
    fn test_segment_instances() {
        let spec = ViewSpec::segments();
        assert_eq!(spec.instances(0), 0);
        assert_eq!(spec.instances(1), 0);
        assert_eq!(spec.instances(4), 2);
        assert_eq!(spec.instances(5), 2);
        assert_eq!(ViewSpec::polyline().instances(6), 3);
        assert_eq!(ViewSpec::polyline().instances(3), 0);
    }
}
