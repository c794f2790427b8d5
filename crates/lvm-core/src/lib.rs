#![forbid(unsafe_code)]
//! Volume groups and the logical-volume lifecycle.
//!
//! [`VolumeGroup`] owns the member [`PhysicalVolume`]s and the
//! [`LogicalVolume`]s carved from them. Create, extend, reduce and remove
//! plan new segments with `lvm-alloc` and commit them through its extent
//! accountant, so a failed operation leaves the group as it found it.
//!
//! The group itself is single-threaded; wrap it in a [`SharedVolumeGroup`]
//! to serialize operations across threads.

pub mod config;
pub mod lv;
pub mod shared;
pub mod vg;

pub use config::{DEFAULT_LV_NAME_PREFIX, DEFAULT_MAX_LV, VgConfig};
pub use lv::LogicalVolume;
pub use shared::SharedVolumeGroup;
pub use vg::{PvSegment, PvSegmentOwner, VolumeGroup};

pub use lvm_alloc::{PhysicalVolume, Segment, StripeArea};
pub use lvm_error::{LvmError, Result};
pub use lvm_types::{AllocPolicy, ExtentSize, LvId, PvId, Striping};
