//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - System V argument classification
//! - The iced-x86 assembled call trampoline

pub mod calling_convention;
#[cfg(all(unix, target_arch = "x86_64"))]
pub mod trampoline;

pub use calling_convention::{RegBank, Slot, SysVAssigner, SysVConvention};
#[cfg(all(unix, target_arch = "x86_64"))]
pub use trampoline::{Trampoline, TrampolineError};
