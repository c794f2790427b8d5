//! Volume groups and the logical-volume lifecycle.
//!
//! Every lifecycle operation follows the same shape: validate, plan segments
//! against a freshly built [`FreeSpaceMap`], then commit the plan through the
//! [`ExtentAccountant`] and splice it into the volume's segment chain. A
//! recoverable failure returns before the commit, so the group is left
//! exactly as it was.

mod check;
mod report;

pub use report::{PvSegment, PvSegmentOwner};

use crate::config::VgConfig;
use crate::lv::LogicalVolume;
use lvm_alloc::{
    AllocRequest, ExtentAccountant, FreeSpaceMap, PhysicalVolume, merge_adjacent,
    select_placement,
};
use lvm_error::{LvmError, Result};
use lvm_types::{AllocPolicy, ExtentSize, LvId, PvId, Striping, validate_name};
use serde::Serialize;
use tracing::{debug, info, warn};

/// A pool of physical volumes sharing one extent size, from which logical
/// volumes are carved.
#[derive(Debug, Clone, Serialize)]
pub struct VolumeGroup {
    name: String,
    extent_size: ExtentSize,
    max_lv: u32,
    #[serde(skip)]
    lv_name_prefix: String,
    pvs: Vec<PhysicalVolume>,
    lvs: Vec<LogicalVolume>,
    free_count: u32,
    #[serde(skip)]
    next_lv_id: u64,
}

impl VolumeGroup {
    /// Create an empty volume group.
    pub fn new(config: &VgConfig) -> Result<Self> {
        let extent_size = config.validate()?;
        debug!(
            target: "lvm::lv",
            vg = %config.name,
            extent_size = extent_size.get(),
            max_lv = config.max_lv,
            "vg_created"
        );
        Ok(Self {
            name: config.name.clone(),
            extent_size,
            max_lv: config.max_lv,
            lv_name_prefix: config.lv_name_prefix.clone(),
            pvs: Vec::new(),
            lvs: Vec::new(),
            free_count: 0,
            next_lv_id: 0,
        })
    }

    /// Add a physical volume of `pe_count` extents to the group.
    pub fn add_pv(&mut self, name: &str, pe_count: u32) -> Result<PvId> {
        validate_name(name).map_err(|e| LvmError::Naming(e.to_string()))?;
        if self.pv_by_name(name).is_some() {
            return Err(LvmError::Naming(format!(
                "physical volume {name} already exists in volume group {}",
                self.name
            )));
        }
        if pe_count == 0 {
            return Err(LvmError::Configuration(format!(
                "physical volume {name} has no extents"
            )));
        }
        let free_count = self.free_count.checked_add(pe_count).ok_or_else(|| {
            LvmError::CapacityExceeded(format!(
                "volume group {} cannot hold more than {} extents",
                self.name,
                u32::MAX
            ))
        })?;
        let id = u32::try_from(self.pvs.len())
            .map(PvId)
            .map_err(|_| LvmError::CapacityExceeded("too many physical volumes".into()))?;

        self.pvs
            .push(PhysicalVolume::new(id, name, pe_count, self.extent_size));
        self.free_count = free_count;
        info!(
            target: "lvm::lv",
            vg = %self.name,
            pv = %name,
            pe_count,
            free_count,
            "pv_added"
        );
        Ok(id)
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn extent_size(&self) -> ExtentSize {
        self.extent_size
    }

    /// Unallocated extents across every member physical volume.
    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.free_count
    }

    /// Extents across every member physical volume.
    #[must_use]
    pub fn extent_count(&self) -> u64 {
        self.pvs.iter().map(|pv| u64::from(pv.pe_count())).sum()
    }

    #[must_use]
    pub fn max_lv(&self) -> u32 {
        self.max_lv
    }

    #[must_use]
    pub fn lv_count(&self) -> usize {
        self.lvs.len()
    }

    #[must_use]
    pub fn pvs(&self) -> &[PhysicalVolume] {
        &self.pvs
    }

    #[must_use]
    pub fn lvs(&self) -> &[LogicalVolume] {
        &self.lvs
    }

    #[must_use]
    pub fn pv(&self, id: PvId) -> Option<&PhysicalVolume> {
        self.pvs.get(id.index())
    }

    #[must_use]
    pub fn pv_by_name(&self, name: &str) -> Option<&PhysicalVolume> {
        self.pvs.iter().find(|pv| pv.name() == name)
    }

    #[must_use]
    pub fn lv(&self, id: LvId) -> Option<&LogicalVolume> {
        self.lvs.iter().find(|lv| lv.id() == id)
    }

    #[must_use]
    pub fn lv_by_name(&self, name: &str) -> Option<&LogicalVolume> {
        self.lvs.iter().find(|lv| lv.name() == name)
    }

    fn lv_index(&self, id: LvId) -> Result<usize> {
        self.lvs
            .iter()
            .position(|lv| lv.id() == id)
            .ok_or_else(|| {
                LvmError::NotFound(format!(
                    "logical volume {id} not found in volume group {}",
                    self.name
                ))
            })
    }

    // ── Allocation ──────────────────────────────────────────────────────────

    /// Map logical extents `already_allocated..le_count` of volume `lv`.
    ///
    /// `already_allocated` must equal the length of the volume's current
    /// segment chain; new segments are appended after it. On failure the
    /// volume, the physical volumes and the free count are unchanged.
    pub fn allocate(
        &mut self,
        lv: LvId,
        candidates: &[PvId],
        already_allocated: u32,
        striping: Striping,
    ) -> Result<()> {
        let idx = self.lv_index(lv)?;
        let target = &self.lvs[idx];
        let mapped = target.mapped_extents();
        if mapped != already_allocated {
            return Err(LvmError::InvalidRequest(format!(
                "{}: {already_allocated} extents claimed allocated but {mapped} are mapped",
                target.name()
            )));
        }
        let wanted = target.le_count();
        if wanted < already_allocated {
            return Err(LvmError::InvalidRequest(format!(
                "{}: {already_allocated} extents allocated exceeds extent count {wanted}",
                target.name()
            )));
        }
        if wanted == already_allocated {
            return Ok(());
        }

        let mut map = FreeSpaceMap::build(
            &self.pvs,
            self.lvs.iter().flat_map(LogicalVolume::segments),
            candidates,
        )?;
        let placement = select_placement(
            target.policy(),
            striping,
            self.extent_size,
            map.candidate_count(),
            wanted - already_allocated,
        )?;
        let planned = lvm_alloc::allocate(
            &mut map,
            &AllocRequest {
                lv,
                lv_name: target.name(),
                allocated: already_allocated,
                target: wanted,
                placement,
            },
        )?;

        ExtentAccountant::new(&mut self.pvs, &mut self.free_count).charge_all(&planned)?;

        let target = &mut self.lvs[idx];
        let from = target.segments.len();
        target.segments.extend(planned);
        let merged = merge_adjacent(&mut target.segments, from);
        debug!(
            target: "lvm::lv",
            lv = %target.name(),
            from = already_allocated,
            to = wanted,
            segments = target.segments.len(),
            merged,
            "lv_mapped"
        );
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Create a logical volume of `extents` extents.
    ///
    /// Without a name the lowest unused `<prefix>N` is chosen. Nothing is
    /// registered unless every extent can be placed.
    pub fn create_lv(
        &mut self,
        name: Option<&str>,
        policy: AllocPolicy,
        extents: u32,
        candidates: &[PvId],
    ) -> Result<LvId> {
        if extents == 0 {
            warn!(target: "lvm::lv", vg = %self.name, "lv_create_rejected_empty");
            return Err(LvmError::CapacityExceeded(
                "unable to create a logical volume with no extents".into(),
            ));
        }
        if self.free_count < extents {
            warn!(
                target: "lvm::lv",
                vg = %self.name,
                free = self.free_count,
                required = extents,
                "lv_create_rejected_space"
            );
            return Err(LvmError::InsufficientVgExtents {
                vg: self.name.clone(),
                free: self.free_count,
                required: extents,
            });
        }
        if self.lvs.len() >= self.max_lv as usize {
            warn!(target: "lvm::lv", vg = %self.name, max_lv = self.max_lv, "lv_create_rejected_limit");
            return Err(LvmError::CapacityExceeded(format!(
                "maximum number of logical volumes ({}) reached in volume group {}",
                self.max_lv, self.name
            )));
        }
        let name = match name {
            Some(name) => {
                validate_name(name).map_err(|e| LvmError::Naming(e.to_string()))?;
                if self.lv_by_name(name).is_some() {
                    return Err(LvmError::Naming(format!(
                        "logical volume {name} already exists in volume group {}",
                        self.name
                    )));
                }
                name.to_owned()
            }
            None => self.generate_lv_name()?,
        };

        let id = LvId(self.next_lv_id);
        let mut lv = LogicalVolume::new(id, name, policy);
        lv.set_le_count(extents, self.extent_size);
        self.lvs.push(lv);

        if let Err(err) = self.allocate(id, candidates, 0, policy.striping()) {
            self.lvs.pop();
            return Err(err);
        }
        self.next_lv_id += 1;

        info!(
            target: "lvm::lv",
            vg = %self.name,
            lv = %self.lvs[self.lvs.len() - 1].name(),
            id = id.0,
            %policy,
            extents,
            free_count = self.free_count,
            "lv_created"
        );
        Ok(id)
    }

    /// Grow `lv` by `extents` extents, appending new segments.
    ///
    /// On failure the extent count and size are restored and the existing
    /// segments are untouched.
    pub fn extend_lv(
        &mut self,
        lv: LvId,
        striping: Striping,
        extents: u32,
        candidates: &[PvId],
    ) -> Result<()> {
        let idx = self.lv_index(lv)?;
        if extents == 0 {
            return Ok(());
        }
        let volume = &mut self.lvs[idx];
        let prior = volume.le_count();
        let grown = prior.checked_add(extents).ok_or_else(|| {
            LvmError::InvalidRequest(format!(
                "{}: extending by {extents} extents overflows the extent count",
                volume.name()
            ))
        })?;
        volume.set_le_count(grown, self.extent_size);

        if let Err(err) = self.allocate(lv, candidates, prior, striping) {
            self.lvs[idx].set_le_count(prior, self.extent_size);
            warn!(target: "lvm::lv", %lv, extents, error = %err, "lv_extend_failed");
            return Err(err);
        }
        info!(
            target: "lvm::lv",
            lv = %self.lvs[idx].name(),
            from = prior,
            to = grown,
            free_count = self.free_count,
            "lv_extended"
        );
        Ok(())
    }

    /// Shrink `lv` by `extents` extents, taking them from the tail of the
    /// segment chain.
    pub fn reduce_lv(&mut self, lv: LvId, extents: u32) -> Result<()> {
        let idx = self.lv_index(lv)?;
        if extents == 0 {
            return Ok(());
        }
        let volume = &self.lvs[idx];
        if extents >= volume.le_count() {
            return Err(LvmError::InvalidRequest(format!(
                "{}: cannot remove {extents} of {} extents; remove the volume instead",
                volume.name(),
                volume.le_count()
            )));
        }
        // Walk the tail once without mutating so a bad split fails cleanly.
        let mut remaining = extents;
        for seg in volume.segments().iter().rev() {
            if seg.len() <= remaining {
                remaining -= seg.len();
                continue;
            }
            if remaining % seg.stripes() != 0 {
                return Err(LvmError::InvalidRequest(format!(
                    "{}: cannot remove {remaining} extents from a segment with {} stripes",
                    volume.name(),
                    seg.stripes()
                )));
            }
            break;
        }

        let extent_size = self.extent_size;
        let Self {
            pvs,
            lvs,
            free_count,
            ..
        } = self;
        let volume = &mut lvs[idx];
        let mut acct = ExtentAccountant::new(pvs, free_count);
        let mut remaining = extents;
        while remaining > 0 {
            let Some(seg) = volume.segments.last_mut() else {
                return Err(LvmError::InternalConsistency(format!(
                    "{}: segment chain shorter than extent count",
                    volume.name()
                )));
            };
            let len = seg.len();
            if len <= remaining {
                acct.release(seg)?;
                volume.segments.pop();
                remaining -= len;
            } else {
                acct.resize(seg, len - remaining)?;
                remaining = 0;
            }
        }
        let shrunk = volume.le_count() - extents;
        volume.set_le_count(shrunk, extent_size);

        info!(
            target: "lvm::lv",
            lv = %volume.name(),
            to = shrunk,
            free_count = acct.free_count(),
            "lv_reduced"
        );
        Ok(())
    }

    /// Release every extent of `lv` and unregister it.
    pub fn remove_lv(&mut self, lv: LvId) -> Result<LogicalVolume> {
        let idx = self.lv_index(lv)?;
        {
            let mut acct = ExtentAccountant::new(&mut self.pvs, &mut self.free_count);
            for seg in self.lvs[idx].segments().iter().rev() {
                acct.release(seg)?;
            }
        }
        let removed = self.lvs.remove(idx);
        info!(
            target: "lvm::lv",
            vg = %self.name,
            lv = %removed.name(),
            extents = removed.le_count(),
            free_count = self.free_count,
            "lv_removed"
        );
        Ok(removed)
    }

    /// Lowest unused `<prefix>N`. The number can grow the name past the
    /// length limit, so each pick is validated like an explicit name.
    fn generate_lv_name(&self) -> Result<String> {
        let unable = |detail: String| {
            LvmError::Naming(format!(
                "unable to generate a unique logical volume name in volume group {}: {detail}",
                self.name
            ))
        };
        let name = (0..=self.lvs.len())
            .map(|n| format!("{}{n}", self.lv_name_prefix))
            .find(|candidate| self.lv_by_name(candidate).is_none())
            .ok_or_else(|| unable("every candidate is taken".into()))?;
        validate_name(&name).map_err(|e| unable(e.to_string()))?;
        Ok(name)
    }
}
