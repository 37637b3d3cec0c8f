//! Argument classification and invocation strategies.
//!
//! A [`CallConvention`] turns the ordered raw arguments of one call into
//! [`ClassifiedCallBuffers`] and performs the control transfer. Two strategies
//! exist:
//!
//! - [`SysVConvention`] - register/stack classification for 64-bit POSIX
//!   targets, invoked through a run-time assembled trampoline
//! - [`FixedSlotConvention`] - one positional machine word per argument, the
//!   stdcall family on Windows
//!
//! [`native`] picks the strategy for the compilation target.

pub mod fixed_slot;

pub use self::fixed_slot::FixedSlotConvention;
pub use crate::x64::calling_convention::SysVConvention;

use crate::core::error::CallResult;
use crate::core::marshal::{CallScope, RawArgument, StringEncoding};
use bumpalo::collections::Vec as BumpVec;

/// Classified argument words for exactly one call.
///
/// Allocated in the call's [`CallScope`] and gone with it.
#[derive(Debug)]
pub struct ClassifiedCallBuffers<'s> {
    /// Integer register words, or the positional slots of the fixed-slot strategy.
    pub integers: BumpVec<'s, u64>,
    /// Floating-point register words.
    pub floats: BumpVec<'s, u64>,
    /// Stack words in push order.
    pub stack: BumpVec<'s, u64>,
    /// Read the result from the floating-point return register.
    pub float_result: bool,
}

impl<'s> ClassifiedCallBuffers<'s> {
    pub fn new_in(scope: &'s CallScope, float_result: bool) -> Self {
        Self {
            integers: BumpVec::new_in(scope.arena()),
            floats: BumpVec::new_in(scope.arena()),
            stack: BumpVec::new_in(scope.arena()),
            float_result,
        }
    }
}

/// A calling convention: classification plus invocation.
pub trait CallConvention: Send + Sync {
    fn name(&self) -> &'static str;

    /// String layout native routines expect under this convention.
    fn string_encoding(&self) -> StringEncoding;

    /// Bucket `args` (in declaration order) into call buffers.
    fn classify<'s>(
        &self,
        scope: &'s CallScope,
        args: &[RawArgument],
        float_result: bool,
    ) -> CallResult<ClassifiedCallBuffers<'s>>;

    /// Transfer control to `address` and return the raw result word.
    ///
    /// # Safety
    ///
    /// `address` must be a live function whose signature matches what the
    /// buffers were classified from, and every address inside the buffers
    /// must stay valid for the duration of the call. A fault inside the
    /// callee terminates the process.
    unsafe fn invoke(&self, address: usize, buffers: &ClassifiedCallBuffers<'_>)
        -> CallResult<u64>;
}

/// The convention for the compilation target.
pub fn native() -> &'static dyn CallConvention {
    #[cfg(windows)]
    {
        &FixedSlotConvention
    }
    #[cfg(not(windows))]
    {
        &SysVConvention
    }
}
