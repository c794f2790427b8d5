//! Per-physical-volume free areas for a single allocation attempt.
//!
//! The map is derived from segment area-mappings, not maintained
//! incrementally. Build a new one at the start of every attempt; a map that
//! outlives its attempt describes state that may no longer exist.

use crate::{PhysicalVolume, Segment};
use lvm_error::{LvmError, Result};
use lvm_types::PvId;
use tracing::{debug, error};

// ── Free areas ──────────────────────────────────────────────────────────────

/// A run of currently-free extents on one physical volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeArea {
    pub pv: PvId,
    pub start: u32,
    pub count: u32,
}

/// Free areas of one physical volume, largest first (ties by lower start).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PvMap {
    pv: PvId,
    areas: Vec<FreeArea>,
}

impl PvMap {
    fn new(pv: PvId, mut areas: Vec<FreeArea>) -> Self {
        sort_areas(&mut areas);
        Self { pv, areas }
    }

    #[must_use]
    pub fn pv(&self) -> PvId {
        self.pv
    }

    #[must_use]
    pub fn areas(&self) -> &[FreeArea] {
        &self.areas
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    #[must_use]
    pub fn largest(&self) -> Option<&FreeArea> {
        self.areas.first()
    }

    #[must_use]
    pub fn free_extents(&self) -> u64 {
        self.areas.iter().map(|a| u64::from(a.count)).sum()
    }

    /// Consume `n` extents from the front of the largest area.
    ///
    /// Returns the first consumed physical extent, or `None` when there is no
    /// area or `n` is zero or larger than the area. An exhausted area is
    /// removed; consumption never creates areas.
    pub fn consume_largest(&mut self, n: u32) -> Option<u32> {
        let area = self.areas.first_mut()?;
        if n == 0 || n > area.count {
            return None;
        }
        let start = area.start;
        area.start += n;
        area.count -= n;
        if area.count == 0 {
            self.areas.remove(0);
        } else {
            sort_areas(&mut self.areas);
        }
        Some(start)
    }
}

fn sort_areas(areas: &mut [FreeArea]) {
    areas.sort_by(|a, b| b.count.cmp(&a.count).then(a.start.cmp(&b.start)));
}

// ── Map construction ────────────────────────────────────────────────────────

/// Free areas of every candidate physical volume, in candidate order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeSpaceMap {
    maps: Vec<PvMap>,
}

impl FreeSpaceMap {
    /// Derive free areas for `candidates` from the group's segments.
    ///
    /// Duplicate candidates are ignored after their first occurrence. The
    /// extents covered by segments must match each volume's allocated-extent
    /// counter exactly; overlapping mappings, mappings past the end of a
    /// volume, and counter drift are all reported as internal consistency
    /// errors.
    pub fn build<'a, I>(pvs: &[PhysicalVolume], segments: I, candidates: &[PvId]) -> Result<Self>
    where
        I: IntoIterator<Item = &'a Segment>,
    {
        let mut slot_of: Vec<Option<usize>> = vec![None; pvs.len()];
        let mut chosen: Vec<&PhysicalVolume> = Vec::with_capacity(candidates.len());
        for &id in candidates {
            let pv = pvs.get(id.index()).ok_or_else(|| {
                LvmError::NotFound(format!("physical volume {id} is not in the volume group"))
            })?;
            if slot_of[id.index()].is_none() {
                slot_of[id.index()] = Some(chosen.len());
                chosen.push(pv);
            }
        }

        // Used ranges per candidate, as half-open `start..end` pairs.
        let mut used: Vec<Vec<(u32, u32)>> = vec![Vec::new(); chosen.len()];
        for seg in segments {
            for (idx, area) in seg.areas().iter().enumerate() {
                let Some(slot) = slot_of.get(area.pv.index()).copied().flatten() else {
                    continue;
                };
                let pv = chosen[slot];
                let Some(range) = seg.pe_range(idx).filter(|r| r.end <= pv.pe_count()) else {
                    error!(
                        target: "lvm::alloc",
                        pv = pv.name(),
                        pe = area.pe,
                        len = seg.area_len(),
                        "segment maps past end of physical volume"
                    );
                    return Err(LvmError::InternalConsistency(format!(
                        "segment of {} maps extents {}+{} past end of {} ({} extents)",
                        seg.lv(),
                        area.pe,
                        seg.area_len(),
                        pv.name(),
                        pv.pe_count()
                    )));
                };
                used[slot].push((range.start, range.end));
            }
        }

        let mut maps = Vec::with_capacity(chosen.len());
        for (pv, mut ranges) in chosen.iter().zip(used) {
            ranges.sort_unstable();
            let mut runs: Vec<(u32, u32)> = Vec::with_capacity(ranges.len() + 1);
            let mut next = 0_u32;
            let mut mapped = 0_u64;
            for (start, end) in ranges {
                if start < next {
                    error!(
                        target: "lvm::alloc",
                        pv = pv.name(),
                        pe = start,
                        "physical extent mapped twice"
                    );
                    return Err(LvmError::InternalConsistency(format!(
                        "physical extent {start} of {} is mapped by more than one segment",
                        pv.name()
                    )));
                }
                if start > next {
                    runs.push((next, start - next));
                }
                mapped += u64::from(end - start);
                next = end;
            }
            if next < pv.pe_count() {
                runs.push((next, pv.pe_count() - next));
            }
            if mapped != u64::from(pv.pe_allocated()) {
                error!(
                    target: "lvm::alloc",
                    pv = pv.name(),
                    mapped,
                    counter = pv.pe_allocated(),
                    "allocated-extent counter drift"
                );
                return Err(LvmError::InternalConsistency(format!(
                    "{}: segments map {mapped} extents but the allocated counter records {}",
                    pv.name(),
                    pv.pe_allocated()
                )));
            }
            let areas = runs
                .into_iter()
                .map(|(start, count)| FreeArea {
                    pv: pv.id(),
                    start,
                    count,
                })
                .collect();
            maps.push(PvMap::new(pv.id(), areas));
        }

        let map = Self { maps };
        debug!(
            target: "lvm::alloc",
            candidates = map.maps.len(),
            free_extents = map.total_free(),
            "free_space_map_built"
        );
        Ok(map)
    }

    #[must_use]
    pub fn maps(&self) -> &[PvMap] {
        &self.maps
    }

    pub(crate) fn maps_mut(&mut self) -> &mut [PvMap] {
        &mut self.maps
    }

    #[must_use]
    pub fn pv_map(&self, pv: PvId) -> Option<&PvMap> {
        self.maps.iter().find(|m| m.pv == pv)
    }

    /// Number of distinct candidate volumes.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.maps.len()
    }

    #[must_use]
    pub fn total_free(&self) -> u64 {
        self.maps.iter().map(PvMap::free_extents).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StripeArea;
    use lvm_types::{ExtentSize, LvId};

    fn pv(id: u32, pe_count: u32, allocated: u32) -> PhysicalVolume {
        let mut pv =
            PhysicalVolume::new(PvId(id), format!("pv{id}"), pe_count, ExtentSize::default());
        pv.set_allocated(allocated);
        pv
    }

    fn no_segments() -> &'static [Segment] {
        &[]
    }

    fn seg(pv: u32, pe: u32, le: u32, len: u32) -> Segment {
        Segment::linear(LvId(1), le, len, StripeArea { pv: PvId(pv), pe })
    }

    #[test]
    fn empty_pv_is_one_area() {
        let pvs = vec![pv(0, 100, 0)];
        let map = FreeSpaceMap::build(&pvs, no_segments(), &[PvId(0)]).unwrap();
        let expected = FreeArea {
            pv: PvId(0),
            start: 0,
            count: 100,
        };
        assert_eq!(map.maps()[0].areas(), &[expected]);
        assert_eq!(map.total_free(), 100);
    }

    #[test]
    fn areas_sorted_largest_first() {
        let pvs = vec![pv(0, 20, 6)];
        // Used: 2..4 and 10..14. Free: 0..2, 4..10, 14..20.
        let segs = [seg(0, 2, 0, 2), seg(0, 10, 2, 4)];
        let map = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap();
        let counts: Vec<(u32, u32)> = map.maps()[0]
            .areas()
            .iter()
            .map(|a| (a.start, a.count))
            .collect();
        assert_eq!(counts, vec![(4, 6), (14, 6), (0, 2)]);
    }

    #[test]
    fn candidate_order_preserved_and_deduplicated() {
        let pvs = vec![pv(0, 10, 0), pv(1, 10, 0), pv(2, 10, 0)];
        let map = FreeSpaceMap::build(&pvs, no_segments(), &[PvId(2), PvId(0), PvId(2)]).unwrap();
        let order: Vec<PvId> = map.maps().iter().map(PvMap::pv).collect();
        assert_eq!(order, vec![PvId(2), PvId(0)]);
        assert_eq!(map.candidate_count(), 2);
        assert!(map.pv_map(PvId(1)).is_none());
    }

    #[test]
    fn unknown_candidate_is_not_found() {
        let pvs = vec![pv(0, 10, 0)];
        let err = FreeSpaceMap::build(&pvs, no_segments(), &[PvId(3)]).unwrap_err();
        assert!(matches!(err, LvmError::NotFound(_)));
    }

    #[test]
    fn counter_drift_is_detected() {
        let pvs = vec![pv(0, 10, 5)];
        let segs = [seg(0, 0, 0, 3)];
        let err = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
    }

    #[test]
    fn overlap_is_detected() {
        let pvs = vec![pv(0, 10, 6)];
        let segs = [seg(0, 0, 0, 4), seg(0, 2, 4, 2)];
        let err = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
    }

    #[test]
    fn mapping_past_end_is_detected() {
        let pvs = vec![pv(0, 10, 4)];
        let segs = [seg(0, 8, 0, 4)];
        let err = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
    }

    #[test]
    fn non_candidate_segments_are_ignored() {
        let pvs = vec![pv(0, 10, 0), pv(1, 10, 99)];
        let segs = [seg(1, 0, 0, 4)];
        // pv1's counter is garbage, but pv1 is not a candidate.
        let map = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap();
        assert_eq!(map.total_free(), 10);
    }

    #[test]
    fn huge_volume_builds_from_used_ranges() {
        let pvs = vec![pv(0, u32::MAX, 15)];
        let mid = 1_u32 << 31;
        let segs = [
            seg(0, u32::MAX - 8, 0, 8),
            seg(0, 0, 8, 4),
            seg(0, mid, 12, 3),
        ];
        let map = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap();
        let areas: Vec<(u32, u32)> = map.maps()[0]
            .areas()
            .iter()
            .map(|a| (a.start, a.count))
            .collect();
        assert_eq!(
            areas,
            vec![(4, mid - 4), (mid + 3, u32::MAX - 8 - (mid + 3))]
        );
        assert_eq!(map.total_free(), u64::from(u32::MAX - 15));
    }

    #[test]
    fn contained_range_is_an_overlap() {
        let pvs = vec![pv(0, 20, 12)];
        let segs = [seg(0, 0, 0, 10), seg(0, 3, 10, 2)];
        let err = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
    }

    #[test]
    fn consume_shrinks_then_removes() {
        let pvs = vec![pv(0, 10, 0)];
        let mut map = FreeSpaceMap::build(&pvs, no_segments(), &[PvId(0)]).unwrap();
        let pvm = &mut map.maps_mut()[0];
        assert_eq!(pvm.consume_largest(4), Some(0));
        assert_eq!(pvm.largest().map(|a| (a.start, a.count)), Some((4, 6)));
        assert_eq!(pvm.consume_largest(7), None);
        assert_eq!(pvm.consume_largest(0), None);
        assert_eq!(pvm.consume_largest(6), Some(4));
        assert!(pvm.is_empty());
        assert_eq!(pvm.consume_largest(1), None);
    }

    #[test]
    fn consume_reorders_shrunken_area() {
        let pvs = vec![pv(0, 20, 1)];
        // Used: PE 8. Free: 0..8 (8), 9..20 (11).
        let segs = [seg(0, 8, 0, 1)];
        let mut map = FreeSpaceMap::build(&pvs, &segs, &[PvId(0)]).unwrap();
        let pvm = &mut map.maps_mut()[0];
        assert_eq!(pvm.consume_largest(5), Some(9));
        // 14..20 (6) is now smaller than 0..8.
        assert_eq!(pvm.largest().map(|a| (a.start, a.count)), Some((0, 8)));
    }
}
