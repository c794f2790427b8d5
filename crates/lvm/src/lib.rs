#![forbid(unsafe_code)]
//! Logical volume extent allocation: public API facade.
//!
//! Re-exports `lvm-core` through a stable external interface. The
//! lower-level crates stay reachable for callers that need the free-space
//! map or placement policies directly.

pub use lvm_core::*;

pub mod alloc {
    pub use lvm_alloc::*;
}

pub mod types {
    pub use lvm_types::*;
}
