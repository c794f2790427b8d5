#![forbid(unsafe_code)]
//! Physical extent allocation for logical volumes.
//!
//! ## Design
//!
//! The allocator is layered:
//!
//! 1. **Model**: [`PhysicalVolume`] and [`Segment`], the only state that
//!    outlives an allocation attempt.
//! 2. **FreeSpaceMap**: per-PV free areas derived from segments at the start
//!    of every attempt and thrown away at the end of it.
//! 3. **ExtentAccountant**: the single place that moves allocated-extent
//!    counters and the group free-extent counter.
//! 4. **Placement**: simple, contiguous and striped policies that consume
//!    free areas and emit new segments without touching any shared state.
//!
//! A lifecycle operation plans segments against a fresh map, then commits them
//! through the accountant. A failed plan therefore has nothing to undo.

pub mod accountant;
pub mod free_map;
pub mod placement;

pub use accountant::ExtentAccountant;
pub use free_map::{FreeArea, FreeSpaceMap, PvMap};
pub use placement::{AllocRequest, Placement, allocate, select_placement};

use lvm_types::{ExtentSize, LvId, PvId};
use serde::Serialize;
use std::ops::Range;

// ── Physical volumes ────────────────────────────────────────────────────────

/// A storage device divided into fixed-size extents.
///
/// `pe_allocated` is only ever changed by [`ExtentAccountant`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhysicalVolume {
    id: PvId,
    name: String,
    pe_count: u32,
    pe_allocated: u32,
    extent_size: ExtentSize,
}

impl PhysicalVolume {
    #[must_use]
    pub fn new(id: PvId, name: impl Into<String>, pe_count: u32, extent_size: ExtentSize) -> Self {
        Self {
            id,
            name: name.into(),
            pe_count,
            pe_allocated: 0,
            extent_size,
        }
    }

    #[must_use]
    pub fn id(&self) -> PvId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total extents on the device.
    #[must_use]
    pub fn pe_count(&self) -> u32 {
        self.pe_count
    }

    /// Extents currently reserved by segments.
    #[must_use]
    pub fn pe_allocated(&self) -> u32 {
        self.pe_allocated
    }

    #[must_use]
    pub fn pe_free(&self) -> u32 {
        self.pe_count - self.pe_allocated
    }

    #[must_use]
    pub fn extent_size(&self) -> ExtentSize {
        self.extent_size
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.extent_size.bytes_for(self.pe_count)
    }

    pub(crate) fn set_allocated(&mut self, pe_allocated: u32) {
        self.pe_allocated = pe_allocated;
    }
}

// ── Segments ────────────────────────────────────────────────────────────────

/// One stripe of a segment: where its extents start on which volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StripeArea {
    pub pv: PvId,
    pub pe: u32,
}

/// A contiguous logical-extent range mapped onto one run per stripe.
///
/// Each of the `stripes()` areas reserves `len / stripes()` extents on its
/// physical volume starting at `pe`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    lv: LvId,
    le: u32,
    len: u32,
    stripe_size: u32,
    areas: Vec<StripeArea>,
}

impl Segment {
    pub(crate) fn linear(lv: LvId, le: u32, len: u32, area: StripeArea) -> Self {
        Self {
            lv,
            le,
            len,
            stripe_size: 0,
            areas: vec![area],
        }
    }

    pub(crate) fn striped(
        lv: LvId,
        le: u32,
        len: u32,
        stripe_size: u32,
        areas: Vec<StripeArea>,
    ) -> Self {
        debug_assert!(!areas.is_empty());
        debug_assert!(u32::try_from(areas.len()).is_ok_and(|stripes| len % stripes == 0));
        Self {
            lv,
            le,
            len,
            stripe_size,
            areas,
        }
    }

    /// Owning logical volume.
    #[must_use]
    pub fn lv(&self) -> LvId {
        self.lv
    }

    /// First logical extent covered.
    #[must_use]
    pub fn le(&self) -> u32 {
        self.le
    }

    /// Length in logical extents.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last logical extent covered.
    #[must_use]
    pub fn le_end(&self) -> u32 {
        self.le + self.len
    }

    #[must_use]
    #[expect(clippy::cast_possible_truncation)]
    pub fn stripes(&self) -> u32 {
        self.areas.len() as u32
    }

    /// Chunk size in bytes; zero for single-stripe segments.
    #[must_use]
    pub fn stripe_size(&self) -> u32 {
        self.stripe_size
    }

    #[must_use]
    pub fn areas(&self) -> &[StripeArea] {
        &self.areas
    }

    /// Extents reserved on each referenced physical volume.
    #[must_use]
    pub fn area_len(&self) -> u32 {
        self.len / self.stripes()
    }

    /// Physical extent range reserved by stripe `idx`, or `None` if there is
    /// no such stripe or the range would pass the end of the extent space.
    #[must_use]
    pub fn pe_range(&self, idx: usize) -> Option<Range<u32>> {
        let area = self.areas.get(idx)?;
        let end = area.pe.checked_add(self.area_len())?;
        Some(area.pe..end)
    }

    #[must_use]
    pub fn covers(&self, le: u32) -> bool {
        (self.le..self.le_end()).contains(&le)
    }

    pub(crate) fn set_len(&mut self, len: u32) {
        self.len = len;
    }

    /// Whether `next` continues this segment both logically and on every
    /// stripe's physical volume.
    #[must_use]
    pub fn can_append(&self, next: &Self) -> bool {
        self.lv == next.lv
            && self.le_end() == next.le
            && self.stripes() == next.stripes()
            && self.stripe_size == next.stripe_size
            && self
                .areas
                .iter()
                .zip(&next.areas)
                .all(|(a, b)| a.pv == b.pv && a.pe + self.area_len() == b.pe)
    }
}

/// Merge physically adjacent segments from index `from` onward.
///
/// Only the tail starting one before `from` is examined, which is where a
/// fresh allocation can join an existing segment. Accounting is unchanged by
/// a merge: each volume keeps the same reserved extent count.
///
/// Returns the number of merges performed.
pub fn merge_adjacent(segments: &mut Vec<Segment>, from: usize) -> usize {
    let mut idx = from.saturating_sub(1);
    let mut merged = 0;
    while idx + 1 < segments.len() {
        if segments[idx].can_append(&segments[idx + 1]) {
            let next = segments.remove(idx + 1);
            segments[idx].len += next.len;
            merged += 1;
        } else {
            idx += 1;
        }
    }
    merged
}
