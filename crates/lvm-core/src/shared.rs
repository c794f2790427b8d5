//! Serialized access to a volume group from several threads.

use crate::VolumeGroup;
use parking_lot::Mutex;
use std::sync::Arc;

/// A cloneable handle that runs each operation under one exclusive lock.
///
/// A lifecycle operation holds the lock for its whole duration, so no other
/// thread can observe segments without their accounting or the reverse.
#[derive(Debug, Clone)]
pub struct SharedVolumeGroup {
    inner: Arc<Mutex<VolumeGroup>>,
}

impl SharedVolumeGroup {
    #[must_use]
    pub fn new(vg: VolumeGroup) -> Self {
        Self {
            inner: Arc::new(Mutex::new(vg)),
        }
    }

    /// Run `f` with exclusive access to the group.
    pub fn with<R>(&self, f: impl FnOnce(&mut VolumeGroup) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }

    /// Point-in-time copy of the group.
    #[must_use]
    pub fn snapshot(&self) -> VolumeGroup {
        self.inner.lock().clone()
    }
}

impl From<VolumeGroup> for SharedVolumeGroup {
    fn from(vg: VolumeGroup) -> Self {
        Self::new(vg)
    }
}
