//! Volume group configuration.

use lvm_error::{LvmError, Result};
use lvm_types::{DEFAULT_EXTENT_SIZE, ExtentSize, validate_name};
use serde::{Deserialize, Serialize};

/// Default cap on logical volumes per group.
pub const DEFAULT_MAX_LV: u32 = 255;

/// Default prefix for automatically named volumes (`lvol0`, `lvol1`, ...).
pub const DEFAULT_LV_NAME_PREFIX: &str = "lvol";

/// Settings fixed when a volume group is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VgConfig {
    pub name: String,
    /// Extent size in bytes, shared by every member physical volume.
    pub extent_size: u64,
    /// Maximum number of logical volumes.
    pub max_lv: u32,
    /// Automatic names are `<lv_name_prefix><N>`.
    pub lv_name_prefix: String,
}

impl Default for VgConfig {
    fn default() -> Self {
        Self {
            name: "vg0".to_owned(),
            extent_size: DEFAULT_EXTENT_SIZE,
            max_lv: DEFAULT_MAX_LV,
            lv_name_prefix: DEFAULT_LV_NAME_PREFIX.to_owned(),
        }
    }
}

impl VgConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Check every field, returning the validated extent size.
    pub fn validate(&self) -> Result<ExtentSize> {
        validate_name(&self.name)
            .map_err(|e| LvmError::Configuration(format!("volume group name: {e}")))?;
        let extent_size = ExtentSize::new(self.extent_size)
            .map_err(|e| LvmError::Configuration(e.to_string()))?;
        if self.max_lv == 0 {
            return Err(LvmError::Configuration(
                "max_lv must be at least 1".into(),
            ));
        }
        // The prefix must itself form a valid name once a number is appended.
        validate_name(&format!("{}0", self.lv_name_prefix))
            .map_err(|e| LvmError::Configuration(format!("lv_name_prefix: {e}")))?;
        Ok(extent_size)
    }
}
