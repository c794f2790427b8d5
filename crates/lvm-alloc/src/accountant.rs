//! Allocated-extent bookkeeping.
//!
//! Every change to a physical volume's allocated-extent counter, and to the
//! volume group's free-extent counter, goes through [`ExtentAccountant`].
//! Each call checks the whole change before applying any of it, so a
//! rejected call leaves both counters untouched.

use crate::{PhysicalVolume, Segment};
use lvm_error::{LvmError, Result};
use lvm_types::PvId;
use tracing::{error, trace};

/// Mutable view over the counters a segment change must keep in step.
#[derive(Debug)]
pub struct ExtentAccountant<'a> {
    pvs: &'a mut [PhysicalVolume],
    free_count: &'a mut u32,
}

impl<'a> ExtentAccountant<'a> {
    pub fn new(pvs: &'a mut [PhysicalVolume], free_count: &'a mut u32) -> Self {
        Self { pvs, free_count }
    }

    /// Reserve the extents mapped by `seg`.
    pub fn charge(&mut self, seg: &Segment) -> Result<()> {
        self.apply(seg, Direction::Charge)
    }

    /// Return the extents mapped by `seg` to the free pool.
    pub fn release(&mut self, seg: &Segment) -> Result<()> {
        self.apply(seg, Direction::Release)
    }

    /// Charge a batch of new segments, all or nothing.
    pub fn charge_all(&mut self, segs: &[Segment]) -> Result<()> {
        for (idx, seg) in segs.iter().enumerate() {
            if let Err(err) = self.charge(seg) {
                for done in segs[..idx].iter().rev() {
                    // Undoing a charge that just succeeded cannot underflow.
                    self.release(done)?;
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Change a segment's length, releasing its old reservation and charging
    /// the new one.
    ///
    /// `new_len` must be non-zero and a multiple of the stripe count.
    pub fn resize(&mut self, seg: &mut Segment, new_len: u32) -> Result<()> {
        if new_len == 0 || new_len % seg.stripes() != 0 {
            return Err(LvmError::InvalidRequest(format!(
                "segment length {new_len} is not a positive multiple of {} stripes",
                seg.stripes()
            )));
        }
        let old_len = seg.len();
        self.release(seg)?;
        seg.set_len(new_len);
        if let Err(err) = self.charge(seg) {
            seg.set_len(old_len);
            self.charge(seg)?;
            return Err(err);
        }
        Ok(())
    }

    #[must_use]
    pub fn free_count(&self) -> u32 {
        *self.free_count
    }

    fn apply(&mut self, seg: &Segment, dir: Direction) -> Result<()> {
        let per_area = seg.area_len();

        // A volume may appear in more than one stripe; sum before checking.
        let mut deltas: Vec<(PvId, u32)> = Vec::with_capacity(seg.areas().len());
        for area in seg.areas() {
            match deltas.iter_mut().find(|(pv, _)| *pv == area.pv) {
                Some((_, n)) => *n += per_area,
                None => deltas.push((area.pv, per_area)),
            }
        }

        let mut updated: Vec<(usize, u32)> = Vec::with_capacity(deltas.len());
        for &(pv_id, delta) in &deltas {
            let Some(pv) = self.pvs.get(pv_id.index()) else {
                return Err(self.violation(format!(
                    "segment of {} references unknown physical volume {pv_id}",
                    seg.lv()
                )));
            };
            let next = match dir {
                Direction::Charge => pv
                    .pe_allocated()
                    .checked_add(delta)
                    .filter(|&n| n <= pv.pe_count()),
                Direction::Release => pv.pe_allocated().checked_sub(delta),
            };
            let Some(next) = next else {
                return Err(self.violation(format!(
                    "{}: {} of {delta} extents would leave {} allocated of {}",
                    pv.name(),
                    dir.verb(),
                    pv.pe_allocated(),
                    pv.pe_count()
                )));
            };
            updated.push((pv_id.index(), next));
        }

        let free = match dir {
            Direction::Charge => self.free_count.checked_sub(seg.len()),
            Direction::Release => self.free_count.checked_add(seg.len()),
        };
        let Some(free) = free else {
            return Err(self.violation(format!(
                "group free count {} cannot absorb {} of {} extents",
                self.free_count,
                dir.verb(),
                seg.len()
            )));
        };

        for (idx, pe_allocated) in updated {
            self.pvs[idx].set_allocated(pe_allocated);
        }
        *self.free_count = free;

        trace!(
            target: "lvm::accountant",
            lv = seg.lv().0,
            le = seg.le(),
            len = seg.len(),
            stripes = seg.stripes(),
            op = dir.verb(),
            free_count = free,
            "extents_accounted"
        );
        Ok(())
    }

    fn violation(&self, detail: String) -> LvmError {
        error!(
            target: "lvm::accountant",
            free_count = *self.free_count,
            %detail,
            "accounting invariant violated"
        );
        LvmError::InternalConsistency(detail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Charge,
    Release,
}

impl Direction {
    fn verb(self) -> &'static str {
        match self {
            Self::Charge => "charge",
            Self::Release => "release",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StripeArea;
    use lvm_types::{ExtentSize, LvId};

    fn pvs(sizes: &[u32]) -> Vec<PhysicalVolume> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &n)| {
                PhysicalVolume::new(PvId(i as u32), format!("pv{i}"), n, ExtentSize::default())
            })
            .collect()
    }

    fn area(pv: u32, pe: u32) -> StripeArea {
        StripeArea { pv: PvId(pv), pe }
    }

    #[test]
    fn charge_and_release_striped() {
        let mut pvs = pvs(&[10, 10, 10]);
        let mut free = 30;
        let seg = Segment::striped(LvId(1), 0, 9, 4096, vec![area(0, 0), area(1, 0), area(2, 0)]);
        let mut acct = ExtentAccountant::new(&mut pvs, &mut free);
        acct.charge(&seg).unwrap();
        assert_eq!(acct.free_count(), 21);
        acct.release(&seg).unwrap();
        assert_eq!(acct.free_count(), 30);
        drop(acct);
        assert!(pvs.iter().all(|pv| pv.pe_allocated() == 0));
    }

    #[test]
    fn charge_updates_each_referenced_pv() {
        let mut pvs = pvs(&[10, 10]);
        let mut free = 20;
        let seg = Segment::striped(LvId(1), 0, 8, 4096, vec![area(0, 0), area(1, 2)]);
        ExtentAccountant::new(&mut pvs, &mut free).charge(&seg).unwrap();
        assert_eq!(pvs[0].pe_allocated(), 4);
        assert_eq!(pvs[1].pe_allocated(), 4);
        assert_eq!(free, 12);
    }

    #[test]
    fn release_underflow_is_fatal_and_changes_nothing() {
        let mut pvs = pvs(&[10, 10]);
        let mut free = 20;
        pvs[0].set_allocated(4);
        free -= 4;
        // pv1 has nothing allocated, so releasing this segment must fail.
        let seg = Segment::striped(LvId(1), 0, 8, 4096, vec![area(0, 0), area(1, 0)]);
        let err = ExtentAccountant::new(&mut pvs, &mut free)
            .release(&seg)
            .unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
        assert!(!err.is_recoverable());
        assert_eq!(pvs[0].pe_allocated(), 4);
        assert_eq!(free, 16);
    }

    #[test]
    fn charge_past_capacity_is_fatal() {
        let mut pvs = pvs(&[4]);
        let mut free = 4;
        let seg = Segment::linear(LvId(1), 0, 5, area(0, 0));
        let err = ExtentAccountant::new(&mut pvs, &mut free)
            .charge(&seg)
            .unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
        assert_eq!(pvs[0].pe_allocated(), 0);
        assert_eq!(free, 4);
    }

    #[test]
    fn unknown_pv_is_fatal() {
        let mut pvs = pvs(&[4]);
        let mut free = 4;
        let seg = Segment::linear(LvId(1), 0, 1, area(7, 0));
        let err = ExtentAccountant::new(&mut pvs, &mut free)
            .charge(&seg)
            .unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
    }

    #[test]
    fn charge_all_rolls_back_on_failure() {
        let mut pvs = pvs(&[4, 2]);
        let mut free = 6;
        let segs = [
            Segment::linear(LvId(1), 0, 4, area(0, 0)),
            Segment::linear(LvId(1), 4, 3, area(1, 0)),
        ];
        let err = ExtentAccountant::new(&mut pvs, &mut free)
            .charge_all(&segs)
            .unwrap_err();
        assert!(matches!(err, LvmError::InternalConsistency(_)));
        assert_eq!(pvs[0].pe_allocated(), 0);
        assert_eq!(pvs[1].pe_allocated(), 0);
        assert_eq!(free, 6);
    }

    #[test]
    fn resize_shrinks_striped_segment() {
        let mut pvs = pvs(&[10, 10]);
        let mut free = 20;
        let mut seg = Segment::striped(LvId(1), 0, 10, 4096, vec![area(0, 0), area(1, 0)]);
        let mut acct = ExtentAccountant::new(&mut pvs, &mut free);
        acct.charge(&seg).unwrap();
        acct.resize(&mut seg, 6).unwrap();
        assert_eq!(acct.free_count(), 14);
        assert!(matches!(
            acct.resize(&mut seg, 3),
            Err(LvmError::InvalidRequest(_))
        ));
        assert!(matches!(
            acct.resize(&mut seg, 0),
            Err(LvmError::InvalidRequest(_))
        ));
        drop(acct);
        assert_eq!(seg.len(), 6);
        assert_eq!(pvs[0].pe_allocated(), 3);
        assert_eq!(pvs[1].pe_allocated(), 3);
    }
}
