//! Logical volumes.

use lvm_alloc::Segment;
use lvm_types::{AllocPolicy, ExtentSize, LvId};
use serde::Serialize;

/// A named, resizable volume built from an ordered chain of segments.
///
/// The segments cover logical extents `0..le_count` without gaps or overlap,
/// in order. Only [`VolumeGroup`](crate::VolumeGroup) mutates a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogicalVolume {
    id: LvId,
    name: String,
    policy: AllocPolicy,
    le_count: u32,
    size: u64,
    pub(crate) segments: Vec<Segment>,
}

impl LogicalVolume {
    pub(crate) fn new(id: LvId, name: String, policy: AllocPolicy) -> Self {
        Self {
            id,
            name,
            policy,
            le_count: 0,
            size: 0,
            segments: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> LvId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn policy(&self) -> AllocPolicy {
        self.policy
    }

    /// Logical extent count.
    #[must_use]
    pub fn le_count(&self) -> u32 {
        self.le_count
    }

    /// Size in bytes (`le_count * extent_size`).
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Total length of the segment chain.
    #[must_use]
    pub fn mapped_extents(&self) -> u32 {
        self.segments.iter().map(Segment::len).sum()
    }

    /// Segment mapping logical extent `le`.
    #[must_use]
    pub fn find_segment(&self, le: u32) -> Option<&Segment> {
        let idx = self.segments.partition_point(|seg| seg.le_end() <= le);
        self.segments.get(idx).filter(|seg| seg.covers(le))
    }

    pub(crate) fn set_le_count(&mut self, le_count: u32, extent_size: ExtentSize) {
        self.le_count = le_count;
        self.size = extent_size.bytes_for(le_count);
    }
}
