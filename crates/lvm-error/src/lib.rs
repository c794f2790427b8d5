#![forbid(unsafe_code)]
//! Error types for the logical volume extent allocator.
//!
//! # Error Taxonomy
//!
//! | Kind | Variant(s) | Recoverable | errno |
//! |------|------------|-------------|-------|
//! | Insufficient space | `InsufficientSpace`, `InsufficientVgExtents` | yes | `ENOSPC` |
//! | Configuration | `Configuration` | yes | `EINVAL` |
//! | Capacity | `CapacityExceeded` | yes | `EDQUOT` |
//! | Naming | `Naming` | yes | `EEXIST` |
//! | Internal consistency | `InternalConsistency` | **no** | `EIO` |
//! | Lookup | `NotFound` | yes | `ENOENT` |
//! | Bad request | `InvalidRequest` | yes | `EINVAL` |
//!
//! Every recoverable failure leaves the volume group, its physical volumes and
//! the target logical volume exactly as they were before the call. The caller
//! may retry with different parameters (for example a wider set of candidate
//! physical volumes); nothing is retried automatically.
//!
//! `InternalConsistency` means the accounting discipline itself has been
//! broken: an allocated-extent counter would go negative or exceed its
//! physical volume's size, or two segments claim the same physical extent.
//! Operations abort on it and do not attempt repair.
//!
//! ## Design Constraints
//!
//! - `lvm-error` MUST NOT depend on `lvm-types` (no cyclic deps). Validation
//!   errors from `lvm-types` convert into `LvmError::Naming` (names) or
//!   `LvmError::Configuration` (fields) in `lvm-core`.
//! - All payloads are owned `String`s so errors can outlive the volume group
//!   they describe.

use thiserror::Error;

/// Unified error type for all allocation and lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LvmError {
    /// Not enough free extents matching the requested policy.
    ///
    /// `required` is the volume's full target extent count, which is what an
    /// operator needs to size a retry.
    #[error("insufficient free extents to allocate logical volume {lv}: {required} required")]
    InsufficientSpace { lv: String, required: u32 },

    /// The volume group as a whole lacks the free extents a create needs.
    #[error("insufficient free extents ({free}) in volume group {vg}: {required} required")]
    InsufficientVgExtents { vg: String, free: u32, required: u32 },

    /// No recognized allocation policy, or stripe settings inconsistent with
    /// the request.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Logical-volume limit reached, or a zero-extent volume requested.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// A unique logical-volume name could not be produced or was rejected.
    #[error("naming error: {0}")]
    Naming(String),

    /// An accounting invariant has been violated. Always fatal.
    #[error("internal consistency error: {0}")]
    InternalConsistency(String),

    /// Named volume or physical volume is not a member of the group.
    #[error("not found: {0}")]
    NotFound(String),

    /// Request violates an operation precondition.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl LvmError {
    /// Map this error onto a POSIX errno for callers that report through a
    /// C-style interface.
    ///
    /// The match is exhaustive so that a new variant cannot ship without an
    /// errno.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::InsufficientSpace { .. } | Self::InsufficientVgExtents { .. } => libc::ENOSPC,
            Self::Configuration(_) | Self::InvalidRequest(_) => libc::EINVAL,
            Self::CapacityExceeded(_) => libc::EDQUOT,
            Self::Naming(_) => libc::EEXIST,
            Self::InternalConsistency(_) => libc::EIO,
            Self::NotFound(_) => libc::ENOENT,
        }
    }

    /// Whether the failed operation left all state untouched.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InternalConsistency(_))
    }

    /// Whether this is one of the insufficient-space kinds.
    #[must_use]
    pub fn is_insufficient_space(&self) -> bool {
        matches!(
            self,
            Self::InsufficientSpace { .. } | Self::InsufficientVgExtents { .. }
        )
    }
}

/// Result alias using `LvmError`.
pub type Result<T> = std::result::Result<T, LvmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping_covers_all_variants() {
        let cases: Vec<(LvmError, libc::c_int)> = vec![
            (
                LvmError::InsufficientSpace {
                    lv: "lvol0".into(),
                    required: 10,
                },
                libc::ENOSPC,
            ),
            (
                LvmError::InsufficientVgExtents {
                    vg: "vg0".into(),
                    free: 1,
                    required: 2,
                },
                libc::ENOSPC,
            ),
            (LvmError::Configuration("test".into()), libc::EINVAL),
            (LvmError::CapacityExceeded("test".into()), libc::EDQUOT),
            (LvmError::Naming("test".into()), libc::EEXIST),
            (LvmError::InternalConsistency("test".into()), libc::EIO),
            (LvmError::NotFound("test".into()), libc::ENOENT),
            (LvmError::InvalidRequest("test".into()), libc::EINVAL),
        ];

        for (error, expected_errno) in &cases {
            assert_eq!(
                error.to_errno(),
                *expected_errno,
                "wrong errno for {error:?}",
            );
        }
    }

    #[test]
    fn only_internal_consistency_is_fatal() {
        assert!(!LvmError::InternalConsistency("pv0 underflow".into()).is_recoverable());
        assert!(LvmError::Configuration("x".into()).is_recoverable());
        assert!(
            LvmError::InsufficientSpace {
                lv: "a".into(),
                required: 1
            }
            .is_recoverable()
        );
    }

    #[test]
    fn display_formatting() {
        let err = LvmError::InsufficientSpace {
            lv: "lvol3".into(),
            required: 24,
        };
        assert_eq!(
            err.to_string(),
            "insufficient free extents to allocate logical volume lvol3: 24 required"
        );

        let vg = LvmError::InsufficientVgExtents {
            vg: "vg0".into(),
            free: 7,
            required: 9,
        };
        assert_eq!(
            vg.to_string(),
            "insufficient free extents (7) in volume group vg0: 9 required"
        );
        assert!(vg.is_insufficient_space());

        let cap = LvmError::CapacityExceeded("maximum number of logical volumes (2) reached".into());
        assert!(cap.to_string().starts_with("capacity exceeded:"));
        assert!(!cap.is_insufficient_space());
    }
}
