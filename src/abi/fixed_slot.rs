// This module implements the fixed-slot strategy used for stdcall-family routines on Windows.
// Every encoded argument becomes one positional machine word, whatever its register class, and
// at most MAX_FIXED_SLOTS words are accepted. Invocation dispatches on the slot count to one of
// sixteen `extern "system"` function pointer shapes generated by fixed_arity!, clearing the
// thread's last-error code beforehand and reporting a non-zero code afterwards as a call
// failure. Floating-point words travel as integer slots and floating-point results are not read
// from XMM0, so routines taking or returning floats are not expressible with this strategy.

//! Positional fixed-slot calls.

use crate::abi::{CallConvention, ClassifiedCallBuffers};
use crate::core::error::{CallError, CallResult};
use crate::core::marshal::{CallScope, RawArgument, StringEncoding};

/// One machine word per argument, in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSlotConvention;

impl FixedSlotConvention {
    pub const MAX_FIXED_SLOTS: usize = 15;
}

impl CallConvention for FixedSlotConvention {
    fn name(&self) -> &'static str {
        "fixed-slot"
    }

    fn string_encoding(&self) -> StringEncoding {
        StringEncoding::Utf16
    }

    fn classify<'s>(
        &self,
        scope: &'s CallScope,
        args: &[RawArgument],
        float_result: bool,
    ) -> CallResult<ClassifiedCallBuffers<'s>> {
        if args.len() > Self::MAX_FIXED_SLOTS {
            return Err(CallError::TooManyArguments {
                limit: Self::MAX_FIXED_SLOTS,
                actual: args.len(),
            });
        }
        let mut buffers = ClassifiedCallBuffers::new_in(scope, float_result);
        buffers.integers.extend(args.iter().map(|arg| arg.bits));
        Ok(buffers)
    }

    #[cfg(windows)]
    unsafe fn invoke(
        &self,
        address: usize,
        buffers: &ClassifiedCallBuffers<'_>,
    ) -> CallResult<u64> {
        let failure = |message: String| CallError::NativeCallFailure {
            routine: String::new(),
            message,
        };

        win::SetLastError(0);
        let result = call_slots(address, &buffers.integers)
            .ok_or_else(|| failure(format!("{} slots", buffers.integers.len())))?;
        let code = win::GetLastError();
        if code != 0 {
            let message = std::io::Error::from_raw_os_error(code as i32).to_string();
            return Err(failure(message));
        }
        Ok(result as u64)
    }

    #[cfg(not(windows))]
    unsafe fn invoke(
        &self,
        _address: usize,
        _buffers: &ClassifiedCallBuffers<'_>,
    ) -> CallResult<u64> {
        Err(CallError::NativeCallFailure {
            routine: String::new(),
            message: "fixed-slot calls are only available on Windows".into(),
        })
    }
}

#[cfg(windows)]
mod win {
    #[link(name = "kernel32")]
    extern "system" {
        pub fn SetLastError(code: u32);
        pub fn GetLastError() -> u32;
    }
}

#[cfg(windows)]
macro_rules! fixed_arity {
    (@word $i:tt) => { usize };
    ($address:expr, $slots:expr; $($n:literal => [$($i:tt)*]),* $(,)?) => {
        match $slots.len() {
            $(
                $n => {
                    let f = std::mem::transmute::<
                        usize,
                        unsafe extern "system" fn($(fixed_arity!(@word $i)),*) -> usize,
                    >($address);
                    Some(f($($slots[$i] as usize),*))
                }
            )*
            _ => None,
        }
    };
}

/// Call `address` with `slots` as positional word arguments.
///
/// # Safety
///
/// `address` must be an `extern "system"` routine taking `slots.len()` words.
#[cfg(windows)]
unsafe fn call_slots(address: usize, slots: &[u64]) -> Option<usize> {
    fixed_arity!(address, slots;
        0 => [],
        1 => [0],
        2 => [0 1],
        3 => [0 1 2],
        4 => [0 1 2 3],
        5 => [0 1 2 3 4],
        6 => [0 1 2 3 4 5],
        7 => [0 1 2 3 4 5 6],
        8 => [0 1 2 3 4 5 6 7],
        9 => [0 1 2 3 4 5 6 7 8],
        10 => [0 1 2 3 4 5 6 7 8 9],
        11 => [0 1 2 3 4 5 6 7 8 9 10],
        12 => [0 1 2 3 4 5 6 7 8 9 10 11],
        13 => [0 1 2 3 4 5 6 7 8 9 10 11 12],
        14 => [0 1 2 3 4 5 6 7 8 9 10 11 12 13],
        15 => [0 1 2 3 4 5 6 7 8 9 10 11 12 13 14],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Width;

    fn words(n: u64) -> Vec<RawArgument> {
        (0..n)
            .map(|i| RawArgument::integer(i, Width::W64))
            .collect()
    }

    #[test]
    fn test_every_argument_gets_a_slot() {
        let scope = CallScope::new();
        let mut args = words(3);
        args.push(RawArgument::float(1.5f64.to_bits(), Width::W64));
        let buffers = FixedSlotConvention.classify(&scope, &args, false).unwrap();

        assert_eq!(&buffers.integers[..], &[0, 1, 2, 1.5f64.to_bits()]);
        assert!(buffers.floats.is_empty());
        assert!(buffers.stack.is_empty());
    }

    #[test]
    fn test_slot_limit() {
        let scope = CallScope::new();
        let buffers = FixedSlotConvention
            .classify(&scope, &words(15), false)
            .unwrap();
        assert_eq!(buffers.integers.len(), 15);

        assert_eq!(
            FixedSlotConvention.classify(&scope, &words(16), false).unwrap_err(),
            CallError::TooManyArguments {
                limit: 15,
                actual: 16
            }
        );
    }

    #[test]
    fn test_utf16_strings() {
        assert_eq!(FixedSlotConvention.string_encoding(), StringEncoding::Utf16);
    }
}
