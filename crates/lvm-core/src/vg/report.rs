//! Per-physical-volume segment view for reporting.

use super::VolumeGroup;
use lvm_error::{LvmError, Result};
use lvm_types::{LvId, PvId};
use serde::Serialize;

/// Which logical volume stripe holds a used run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PvSegmentOwner {
    pub lv: LvId,
    /// First logical extent of the owning segment.
    pub le: u32,
    /// Stripe index within the owning segment.
    pub stripe: u32,
}

/// A run of physical extents, either free or held by one segment stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PvSegment {
    pub pe: u32,
    pub len: u32,
    pub owner: Option<PvSegmentOwner>,
}

impl PvSegment {
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }
}

impl VolumeGroup {
    /// Runs covering every extent of `pv`, in physical order.
    pub fn pv_segments(&self, pv: PvId) -> Result<Vec<PvSegment>> {
        let volume = self.pv(pv).ok_or_else(|| {
            LvmError::NotFound(format!(
                "physical volume {pv} not found in volume group {}",
                self.name
            ))
        })?;

        let mut used: Vec<PvSegment> = Vec::new();
        for lv in &self.lvs {
            for seg in lv.segments() {
                for (stripe, area) in (0_u32..).zip(seg.areas()) {
                    if area.pv == pv {
                        used.push(PvSegment {
                            pe: area.pe,
                            len: seg.area_len(),
                            owner: Some(PvSegmentOwner {
                                lv: lv.id(),
                                le: seg.le(),
                                stripe,
                            }),
                        });
                    }
                }
            }
        }
        used.sort_by_key(|run| run.pe);

        let mut out = Vec::with_capacity(used.len() * 2 + 1);
        let mut next = 0_u32;
        for run in used {
            if run.pe < next {
                return Err(LvmError::InternalConsistency(format!(
                    "physical extent {} of {} is mapped more than once",
                    run.pe,
                    volume.name()
                )));
            }
            if run.pe > next {
                out.push(PvSegment {
                    pe: next,
                    len: run.pe - next,
                    owner: None,
                });
            }
            next = run.pe + run.len;
            out.push(run);
        }
        if next < volume.pe_count() {
            out.push(PvSegment {
                pe: next,
                len: volume.pe_count() - next,
                owner: None,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VgConfig;
    use lvm_types::AllocPolicy;

    #[test]
    fn runs_cover_the_whole_volume() {
        let mut vg = VolumeGroup::new(&VgConfig::default()).unwrap();
        vg.add_pv("pv0", 20).unwrap();
        vg.add_pv("pv1", 20).unwrap();
        let pvs = [PvId(0), PvId(1)];
        let a = vg.create_lv(Some("a"), AllocPolicy::Simple, 5, &pvs).unwrap();
        let b = vg.create_lv(Some("b"), AllocPolicy::Simple, 5, &pvs).unwrap();
        let c = vg.create_lv(Some("c"), AllocPolicy::Simple, 3, &pvs).unwrap();
        vg.remove_lv(b).unwrap();

        let runs = vg.pv_segments(PvId(0)).unwrap();
        let shape: Vec<(u32, u32, Option<LvId>)> = runs
            .iter()
            .map(|r| (r.pe, r.len, r.owner.map(|o| o.lv)))
            .collect();
        assert_eq!(
            shape,
            vec![
                (0, 5, Some(a)),
                (5, 5, None),
                (10, 3, Some(c)),
                (13, 7, None),
            ]
        );
        assert_eq!(runs.iter().map(|r| r.len).sum::<u32>(), 20);

        let untouched = vg.pv_segments(PvId(1)).unwrap();
        assert_eq!(untouched.len(), 1);
        assert!(untouched[0].is_free());
    }

    #[test]
    fn striped_runs_name_their_stripe() {
        let mut vg = VolumeGroup::new(&VgConfig::default()).unwrap();
        vg.add_pv("pv0", 8).unwrap();
        vg.add_pv("pv1", 8).unwrap();
        let policy = AllocPolicy::Striped {
            stripes: 2,
            stripe_size: 65536,
        };
        let id = vg.create_lv(None, policy, 8, &[PvId(0), PvId(1)]).unwrap();
        let runs = vg.pv_segments(PvId(1)).unwrap();
        assert_eq!(runs[0].len, 4);
        assert_eq!(
            runs[0].owner,
            Some(PvSegmentOwner {
                lv: id,
                le: 0,
                stripe: 1
            })
        );
        assert!(matches!(
            vg.pv_segments(PvId(5)),
            Err(LvmError::NotFound(_))
        ));
    }
}
