#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Extent sizes are powers of two between 4 KiB and 16 GiB.
pub const MIN_EXTENT_SIZE: u64 = 4 * 1024;
pub const MAX_EXTENT_SIZE: u64 = 16 * 1024 * 1024 * 1024;
pub const DEFAULT_EXTENT_SIZE: u64 = 4 * 1024 * 1024;

/// Smallest stripe chunk accepted for striped placement.
pub const MIN_STRIPE_SIZE: u32 = 4 * 1024;

/// Longest volume, group or physical volume name accepted.
pub const MAX_NAME_LEN: usize = 127;

/// Index of a physical volume within its volume group.
///
/// Physical volumes are never removed from a group, so the index is stable
/// for the group's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PvId(pub u32);

impl PvId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pv#{}", self.0)
    }
}

/// Stable identity token of a logical volume. Never reused within a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LvId(pub u64);

impl fmt::Display for LvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lv#{}", self.0)
    }
}

/// Validated extent size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExtentSize(u64);

impl ExtentSize {
    /// Create an `ExtentSize` if `bytes` is a power of two in
    /// [`MIN_EXTENT_SIZE`, `MAX_EXTENT_SIZE`].
    pub fn new(bytes: u64) -> Result<Self, TypeError> {
        if !bytes.is_power_of_two() || !(MIN_EXTENT_SIZE..=MAX_EXTENT_SIZE).contains(&bytes) {
            return Err(TypeError::InvalidField {
                field: "extent_size",
                reason: "must be power of two in 4KiB..=16GiB",
            });
        }
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }

    /// Byte length of `extents` extents.
    #[must_use]
    pub fn bytes_for(self, extents: u32) -> u64 {
        u64::from(extents) * self.0
    }
}

impl Default for ExtentSize {
    fn default() -> Self {
        Self(DEFAULT_EXTENT_SIZE)
    }
}

/// Per-call striping request: how many physical volumes a new segment spans
/// and the interleave chunk in bytes. `stripe_size` is ignored for one stripe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Striping {
    pub stripes: u32,
    pub stripe_size: u32,
}

impl Striping {
    /// A single, non-striped mapping.
    #[must_use]
    pub fn linear() -> Self {
        Self {
            stripes: 1,
            stripe_size: 0,
        }
    }

    #[must_use]
    pub fn striped(stripes: u32, stripe_size: u32) -> Self {
        Self {
            stripes,
            stripe_size,
        }
    }

    #[must_use]
    pub fn is_striped(self) -> bool {
        self.stripes > 1
    }
}

impl Default for Striping {
    fn default() -> Self {
        Self::linear()
    }
}

/// Allocation policy selected for a logical volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocPolicy {
    /// Fill free areas in candidate order until the request is satisfied.
    Simple,
    /// At most one (the largest) area per physical volume.
    Contiguous,
    /// Equal-width stripes across `stripes` physical volumes.
    Striped { stripes: u32, stripe_size: u32 },
}

impl AllocPolicy {
    /// Striping implied by this policy when no explicit request is made.
    #[must_use]
    pub fn striping(self) -> Striping {
        match self {
            Self::Simple | Self::Contiguous => Striping::linear(),
            Self::Striped {
                stripes,
                stripe_size,
            } => Striping::striped(stripes, stripe_size),
        }
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Contiguous => "contiguous",
            Self::Striped { .. } => "striped",
        }
    }
}

impl fmt::Display for AllocPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Striped {
                stripes,
                stripe_size,
            } => write!(f, "striped({stripes}x{stripe_size})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },
}

/// Check a volume, group or physical volume name.
///
/// Accepted names are 1..=127 bytes of `[A-Za-z0-9._+-]`, do not start with
/// `-`, and are not `.` or `..`.
pub fn validate_name(name: &str) -> Result<(), TypeError> {
    let reason = if name.is_empty() {
        Some("empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("longer than 127 bytes")
    } else if name == "." || name == ".." {
        Some("reserved")
    } else if name.starts_with('-') {
        Some("starts with '-'")
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'+' | b'-'))
    {
        Some("contains characters outside [A-Za-z0-9._+-]")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(TypeError::InvalidName {
            name: name.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extent_size_bounds() {
        assert!(ExtentSize::new(4096).is_ok());
        assert!(ExtentSize::new(DEFAULT_EXTENT_SIZE).is_ok());
        assert!(ExtentSize::new(MAX_EXTENT_SIZE).is_ok());
        assert!(ExtentSize::new(2048).is_err());
        assert!(ExtentSize::new(0).is_err());
        assert!(ExtentSize::new(3 * 1024 * 1024).is_err());
        assert!(ExtentSize::new(MAX_EXTENT_SIZE * 2).is_err());
    }

    #[test]
    fn extent_size_conversions() {
        let es = ExtentSize::new(4 * 1024 * 1024).unwrap();
        assert_eq!(es.bytes_for(3), 12 * 1024 * 1024);
        assert_eq!(ExtentSize::default(), es);
    }

    #[test]
    fn policy_striping() {
        assert_eq!(AllocPolicy::Simple.striping(), Striping::linear());
        assert_eq!(AllocPolicy::Contiguous.striping().stripes, 1);
        let striped = AllocPolicy::Striped {
            stripes: 3,
            stripe_size: 65536,
        };
        assert_eq!(striped.striping(), Striping::striped(3, 65536));
        assert!(striped.striping().is_striped());
        assert_eq!(striped.to_string(), "striped(3x65536)");
        assert_eq!(AllocPolicy::Contiguous.to_string(), "contiguous");
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("lvol0").is_ok());
        assert!(validate_name("data.root_1+x-y").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("-lv").is_err());
        assert!(validate_name("has space").is_err());
        assert!(validate_name("slash/name").is_err());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN)).is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn ids_order_and_display() {
        let ids = [PvId(2), PvId(0)];
        let mut sorted = ids;
        sorted.sort();
        assert_eq!(sorted, [PvId(0), PvId(2)]);
        assert_eq!(PvId(4).to_string(), "pv#4");
        assert_eq!(LvId(9).to_string(), "lv#9");
    }
}
