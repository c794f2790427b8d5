//! Whole-group invariant verification.

use super::VolumeGroup;
use crate::lv::LogicalVolume;
use lvm_alloc::{FreeSpaceMap, PhysicalVolume};
use lvm_error::{LvmError, Result};
use lvm_types::PvId;
use std::collections::HashSet;
use tracing::error;

impl VolumeGroup {
    /// Verify every structural invariant of the group.
    ///
    /// Returns [`LvmError::InternalConsistency`] describing the first
    /// violation found. Checked:
    ///
    /// - the volume count is within `max_lv`, with unique names and ids
    /// - each volume's segments cover `0..le_count` in order, with no gap
    /// - every segment length is a positive multiple of its stripe count
    /// - no physical extent is mapped twice or past the end of its volume
    /// - each allocated-extent counter matches the extents mapped on it
    /// - the free count equals total extents minus allocated extents
    pub fn check_consistency(&self) -> Result<()> {
        if self.lvs.len() > self.max_lv as usize {
            return Err(self.inconsistent(format!(
                "{} logical volumes exceed the maximum of {}",
                self.lvs.len(),
                self.max_lv
            )));
        }

        let mut names = HashSet::with_capacity(self.lvs.len());
        let mut ids = HashSet::with_capacity(self.lvs.len());
        for lv in &self.lvs {
            if !names.insert(lv.name()) {
                return Err(self.inconsistent(format!("duplicate volume name {}", lv.name())));
            }
            if !ids.insert(lv.id()) || lv.id().0 >= self.next_lv_id {
                return Err(self.inconsistent(format!("{}: bad identity {}", lv.name(), lv.id())));
            }
            self.check_chain(lv)?;
        }

        let every_pv: Vec<PvId> = self.pvs.iter().map(PhysicalVolume::id).collect();
        FreeSpaceMap::build(
            &self.pvs,
            self.lvs.iter().flat_map(LogicalVolume::segments),
            &every_pv,
        )?;

        let allocated: u64 = self
            .pvs
            .iter()
            .map(|pv| u64::from(pv.pe_allocated()))
            .sum();
        if u64::from(self.free_count) + allocated != self.extent_count() {
            return Err(self.inconsistent(format!(
                "free count {} plus allocated {allocated} does not equal {} total extents",
                self.free_count,
                self.extent_count()
            )));
        }
        Ok(())
    }

    fn check_chain(&self, lv: &LogicalVolume) -> Result<()> {
        if lv.le_count() == 0 {
            return Err(self.inconsistent(format!("{} has no extents", lv.name())));
        }
        if lv.size() != self.extent_size.bytes_for(lv.le_count()) {
            return Err(self.inconsistent(format!(
                "{}: size {} does not match {} extents",
                lv.name(),
                lv.size(),
                lv.le_count()
            )));
        }
        let mut next_le = 0_u32;
        for seg in lv.segments() {
            if seg.lv() != lv.id() {
                return Err(self.inconsistent(format!(
                    "{}: segment at {} belongs to {}",
                    lv.name(),
                    seg.le(),
                    seg.lv()
                )));
            }
            if seg.le() != next_le {
                return Err(self.inconsistent(format!(
                    "{}: segment starts at {} but {next_le} was expected",
                    lv.name(),
                    seg.le()
                )));
            }
            if seg.stripes() == 0 || seg.is_empty() || seg.len() % seg.stripes() != 0 {
                return Err(self.inconsistent(format!(
                    "{}: segment at {} has length {} over {} stripes",
                    lv.name(),
                    seg.le(),
                    seg.len(),
                    seg.stripes()
                )));
            }
            next_le = seg.le_end();
        }
        if next_le != lv.le_count() {
            return Err(self.inconsistent(format!(
                "{}: segments cover {next_le} of {} extents",
                lv.name(),
                lv.le_count()
            )));
        }
        Ok(())
    }

    fn inconsistent(&self, detail: String) -> LvmError {
        error!(target: "lvm::lv", vg = %self.name, %detail, "consistency_check_failed");
        LvmError::InternalConsistency(detail)
    }
}

#[cfg(test)]
mod tests {
    use crate::{VgConfig, VolumeGroup};
    use lvm_error::LvmError;
    use lvm_types::{AllocPolicy, PvId};

    #[test]
    fn detects_free_count_drift() {
        let mut vg = VolumeGroup::new(&VgConfig::default()).unwrap();
        vg.add_pv("pv0", 10).unwrap();
        vg.create_lv(None, AllocPolicy::Simple, 4, &[PvId(0)]).unwrap();
        vg.check_consistency().unwrap();
        vg.free_count += 1;
        assert!(matches!(
            vg.check_consistency(),
            Err(LvmError::InternalConsistency(_))
        ));
    }

    #[test]
    fn detects_broken_chain() {
        let mut vg = VolumeGroup::new(&VgConfig::default()).unwrap();
        vg.add_pv("pv0", 10).unwrap();
        let id = vg.create_lv(None, AllocPolicy::Simple, 4, &[PvId(0)]).unwrap();
        let idx = vg.lv_index(id).unwrap();
        vg.lvs[idx].set_le_count(5, vg.extent_size);
        assert!(matches!(
            vg.check_consistency(),
            Err(LvmError::InternalConsistency(_))
        ));
    }
}
