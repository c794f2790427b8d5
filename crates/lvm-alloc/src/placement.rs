//! Placement policies: turn free areas into new segments.
//!
//! Placement only consumes areas from the attempt's [`FreeSpaceMap`] and
//! returns the planned segments. It never touches physical-volume counters
//! or the group free count; committing the plan is the caller's job (through
//! [`ExtentAccountant`](crate::ExtentAccountant)).

use crate::{FreeSpaceMap, PvMap, Segment, StripeArea};
use lvm_error::{LvmError, Result};
use lvm_types::{AllocPolicy, ExtentSize, LvId, MIN_STRIPE_SIZE, Striping};
use std::cmp::Reverse;
use tracing::{debug, trace, warn};

/// Resolved placement strategy for one allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    Simple,
    Contiguous,
    Striped { stripes: u32, stripe_size: u32 },
}

/// Pick the placement for allocating `extents` more extents.
///
/// More than one stripe always selects striped placement. Otherwise the
/// volume's own policy decides: contiguous, then simple. A striped volume
/// asked for a single stripe has no linear policy to fall back on.
pub fn select_placement(
    policy: AllocPolicy,
    striping: Striping,
    extent_size: ExtentSize,
    candidate_count: usize,
    extents: u32,
) -> Result<Placement> {
    let Striping {
        stripes,
        stripe_size,
    } = striping;

    if stripes == 0 {
        return Err(LvmError::Configuration(
            "stripe count must be at least 1".into(),
        ));
    }

    if striping.is_striped() {
        if stripes as usize > candidate_count {
            return Err(LvmError::Configuration(format!(
                "{stripes} stripes requested but only {candidate_count} physical volumes are candidates"
            )));
        }
        if !stripe_size.is_power_of_two()
            || stripe_size < MIN_STRIPE_SIZE
            || u64::from(stripe_size) > extent_size.get()
        {
            return Err(LvmError::Configuration(format!(
                "stripe size {stripe_size} must be a power of two between {MIN_STRIPE_SIZE} and the extent size {}",
                extent_size.get()
            )));
        }
        if extents % stripes != 0 {
            return Err(LvmError::Configuration(format!(
                "{extents} extents cannot be split evenly across {stripes} stripes"
            )));
        }
        return Ok(Placement::Striped {
            stripes,
            stripe_size,
        });
    }

    match policy {
        AllocPolicy::Contiguous => Ok(Placement::Contiguous),
        AllocPolicy::Simple => Ok(Placement::Simple),
        AllocPolicy::Striped { .. } => Err(LvmError::Configuration(
            "unknown allocation policy: striped volume requested with a single stripe".into(),
        )),
    }
}

/// One allocation: fill logical extents `allocated..target` of volume `lv`.
#[derive(Debug, Clone, Copy)]
pub struct AllocRequest<'a> {
    pub lv: LvId,
    pub lv_name: &'a str,
    pub allocated: u32,
    pub target: u32,
    pub placement: Placement,
}

/// Plan the segments for `req`, consuming areas from `map`.
///
/// On success the returned segments cover `req.allocated..req.target`
/// contiguously, in logical order. On failure nothing outside `map` has
/// changed and `map` should be discarded.
pub fn allocate(map: &mut FreeSpaceMap, req: &AllocRequest<'_>) -> Result<Vec<Segment>> {
    if req.allocated > req.target {
        return Err(LvmError::InvalidRequest(format!(
            "{}: {} extents already allocated exceeds target {}",
            req.lv_name, req.allocated, req.target
        )));
    }

    debug!(
        target: "lvm::alloc",
        lv = req.lv_name,
        from = req.allocated,
        to = req.target,
        placement = ?req.placement,
        "allocate"
    );

    let mut progress = Progress {
        lv: req.lv,
        allocated: req.allocated,
        target: req.target,
        segments: Vec::new(),
    };

    let satisfied = match req.placement {
        Placement::Striped {
            stripes,
            stripe_size,
        } => alloc_striped(map, &mut progress, stripes, stripe_size)?,
        Placement::Contiguous => alloc_contiguous(map, &mut progress),
        Placement::Simple => alloc_simple(map, &mut progress),
    };

    if !satisfied {
        warn!(
            target: "lvm::alloc",
            lv = req.lv_name,
            required = req.target,
            short_by = progress.remaining(),
            placement = ?req.placement,
            "insufficient free extents"
        );
        return Err(LvmError::InsufficientSpace {
            lv: req.lv_name.to_owned(),
            required: req.target,
        });
    }

    Ok(progress.segments)
}

struct Progress {
    lv: LvId,
    allocated: u32,
    target: u32,
    segments: Vec<Segment>,
}

impl Progress {
    fn remaining(&self) -> u32 {
        self.target - self.allocated
    }

    fn done(&self) -> bool {
        self.allocated == self.target
    }
}

// ── Striped ─────────────────────────────────────────────────────────────────

/// Allocate equal-width stripes in rounds.
///
/// Each round takes the single largest area of every volume that still has
/// one, keeps the `stripes` largest of those, and advances by the width of
/// the smallest kept area (or by what is still needed, if less).
fn alloc_striped(
    map: &mut FreeSpaceMap,
    progress: &mut Progress,
    stripes: u32,
    stripe_size: u32,
) -> Result<bool> {
    let stripe_count = stripes as usize;

    while !progress.done() {
        let mut candidates: Vec<(usize, u32)> = map
            .maps()
            .iter()
            .enumerate()
            .filter_map(|(idx, pvm)| pvm.largest().map(|a| (idx, a.count)))
            .collect();

        if candidates.len() < stripe_count {
            return Ok(false);
        }

        // Stable: equal widths keep candidate order.
        candidates.sort_by_key(|&(_, count)| Reverse(count));
        candidates.truncate(stripe_count);

        let bound = candidates[stripe_count - 1].1;
        let per_stripe = (progress.remaining() / stripes).min(bound);
        if per_stripe == 0 {
            return Err(LvmError::Configuration(format!(
                "{} remaining extents cannot be split evenly across {stripes} stripes",
                progress.remaining()
            )));
        }

        let maps = map.maps_mut();
        let mut areas = Vec::with_capacity(stripe_count);
        for &(idx, _) in &candidates {
            let pvm = &mut maps[idx];
            let pv = pvm.pv();
            let pe = pvm.consume_largest(per_stripe).ok_or_else(|| {
                LvmError::InternalConsistency(format!(
                    "free area on {pv} shrank below {per_stripe} extents during a round"
                ))
            })?;
            areas.push(StripeArea { pv, pe });
        }

        let len = per_stripe * stripes;
        trace!(
            target: "lvm::alloc",
            le = progress.allocated,
            len,
            per_stripe,
            bound,
            "striped_round"
        );
        progress.segments.push(Segment::striped(
            progress.lv,
            progress.allocated,
            len,
            stripe_size,
            areas,
        ));
        progress.allocated += len;
    }

    Ok(true)
}

// ── Linear ──────────────────────────────────────────────────────────────────

/// Allocate from the largest area of `pvm` into one single-stripe segment.
///
/// The width is the smaller of the area and what is still needed, so an
/// over-large area is split and a small one is used up.
fn alloc_linear_area(pvm: &mut PvMap, progress: &mut Progress) -> bool {
    let Some(area) = pvm.largest().copied() else {
        return false;
    };
    let count = area.count.min(progress.remaining());
    if pvm.consume_largest(count).is_none() {
        return false;
    }

    trace!(
        target: "lvm::alloc",
        pv = area.pv.0,
        pe = area.start,
        le = progress.allocated,
        len = count,
        "linear_area"
    );
    progress.segments.push(Segment::linear(
        progress.lv,
        progress.allocated,
        count,
        StripeArea {
            pv: area.pv,
            pe: area.start,
        },
    ));
    progress.allocated += count;
    true
}

/// At most one area per volume: the largest, in candidate order.
fn alloc_contiguous(map: &mut FreeSpaceMap, progress: &mut Progress) -> bool {
    for pvm in map.maps_mut() {
        if progress.done() {
            break;
        }
        if pvm.is_empty() {
            continue;
        }
        alloc_linear_area(pvm, progress);
    }
    progress.done()
}

/// Every area of every volume, in order, until the request is met.
fn alloc_simple(map: &mut FreeSpaceMap, progress: &mut Progress) -> bool {
    for pvm in map.maps_mut() {
        while !progress.done() && alloc_linear_area(pvm, progress) {}
        if progress.done() {
            break;
        }
    }
    progress.done()
}
