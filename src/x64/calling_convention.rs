// This module implements argument classification for the System V AMD64 ABI used by 64-bit
// Linux, macOS and the BSDs. SysVAssigner walks the encoded arguments in declaration order and
// hands out slots: integer-class words go to RDI, RSI, RDX, RCX, R8, R9 (first 6),
// floating-point words to XMM0-XMM7 (first 8), and the rest to 8-byte stack slots in order.
// Stack slots are capped at MAX_STACK_SLOTS; the next one is an error, never a silent drop.
// SysVConvention packs the slots into ClassifiedCallBuffers, pads the stack area to an even
// number of words so the callee sees a 16-byte aligned stack, and reverses it into push order.
// The control transfer itself lives in the trampoline module.

//! System V x86-64 argument classification.

use crate::abi::{CallConvention, ClassifiedCallBuffers};
use crate::core::error::{CallError, CallResult};
use crate::core::marshal::{CallScope, RawArgument, StringEncoding};

/// Register banks for different register types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegBank {
    GeneralPurpose = 0,
    Xmm = 1,
}

impl RegBank {
    pub fn of(arg: &RawArgument) -> Self {
        if arg.is_float {
            RegBank::Xmm
        } else {
            RegBank::GeneralPurpose
        }
    }
}

/// Where one argument word ends up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Register { bank: RegBank, index: usize },
    /// Index in declaration order among stack-passed words.
    Stack(usize),
}

/// Hands out argument slots in declaration order.
#[derive(Debug, Default)]
pub struct SysVAssigner {
    /// Current GP argument register index.
    gp_cnt: usize,
    /// Current XMM argument register index.
    xmm_cnt: usize,
    /// Stack slots used so far.
    stack_cnt: usize,
}

impl SysVAssigner {
    /// System V x86-64 GP argument registers.
    pub const GP_ARG_REGS: [&'static str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];

    /// System V x86-64 XMM argument registers.
    pub const XMM_ARG_REGS: [&'static str; 8] =
        ["xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7"];

    pub fn new() -> Self {
        Self::default()
    }

    /// Number of GP argument registers used so far.
    pub fn gp_used(&self) -> usize {
        self.gp_cnt
    }

    /// Number of XMM argument registers used so far.
    pub fn xmm_used(&self) -> usize {
        self.xmm_cnt
    }

    /// Number of stack slots used so far.
    pub fn stack_used(&self) -> usize {
        self.stack_cnt
    }

    pub fn assign_arg(&mut self, bank: RegBank) -> CallResult<Slot> {
        match bank {
            RegBank::GeneralPurpose if self.gp_cnt < Self::GP_ARG_REGS.len() => {
                self.gp_cnt += 1;
                return Ok(Slot::Register {
                    bank,
                    index: self.gp_cnt - 1,
                });
            }
            RegBank::Xmm if self.xmm_cnt < Self::XMM_ARG_REGS.len() => {
                self.xmm_cnt += 1;
                return Ok(Slot::Register {
                    bank,
                    index: self.xmm_cnt - 1,
                });
            }
            _ => {}
        }

        if self.stack_cnt >= SysVConvention::MAX_STACK_SLOTS {
            return Err(CallError::TooManyStackArguments {
                limit: SysVConvention::MAX_STACK_SLOTS,
            });
        }
        self.stack_cnt += 1;
        Ok(Slot::Stack(self.stack_cnt - 1))
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Register/stack classification for 64-bit POSIX targets.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysVConvention;

impl SysVConvention {
    pub const INTEGER_REGISTERS: usize = SysVAssigner::GP_ARG_REGS.len();
    pub const FLOAT_REGISTERS: usize = SysVAssigner::XMM_ARG_REGS.len();
    pub const MAX_STACK_SLOTS: usize = 100;
}

impl CallConvention for SysVConvention {
    fn name(&self) -> &'static str {
        "sysv64"
    }

    fn string_encoding(&self) -> StringEncoding {
        StringEncoding::Utf8
    }

    fn classify<'s>(
        &self,
        scope: &'s CallScope,
        args: &[RawArgument],
        float_result: bool,
    ) -> CallResult<ClassifiedCallBuffers<'s>> {
        let mut buffers = ClassifiedCallBuffers::new_in(scope, float_result);
        let mut assigner = SysVAssigner::new();

        for arg in args {
            match assigner.assign_arg(RegBank::of(arg))? {
                Slot::Register {
                    bank: RegBank::Xmm,
                    index,
                } => {
                    log::trace!("sysv: {:#x} -> {}", arg.bits, SysVAssigner::XMM_ARG_REGS[index]);
                    buffers.floats.push(arg.bits);
                }
                Slot::Register { index, .. } => {
                    log::trace!("sysv: {:#x} -> {}", arg.bits, SysVAssigner::GP_ARG_REGS[index]);
                    buffers.integers.push(arg.bits);
                }
                Slot::Stack(index) => {
                    log::trace!("sysv: {:#x} -> stack[{index}]", arg.bits);
                    buffers.stack.push(arg.bits);
                }
            }
        }

        // Keep rsp 16-byte aligned at the call.
        if buffers.stack.len() % 2 == 1 {
            buffers.stack.push(0);
        }
        // Highest slot is pushed first so the first stack argument ends up lowest.
        buffers.stack.reverse();

        Ok(buffers)
    }

    #[cfg(all(unix, target_arch = "x86_64"))]
    unsafe fn invoke(
        &self,
        address: usize,
        buffers: &ClassifiedCallBuffers<'_>,
    ) -> CallResult<u64> {
        let trampoline = crate::x64::trampoline::Trampoline::global()?;
        trampoline.call(address, buffers)
    }

    #[cfg(not(all(unix, target_arch = "x86_64")))]
    unsafe fn invoke(
        &self,
        _address: usize,
        _buffers: &ClassifiedCallBuffers<'_>,
    ) -> CallResult<u64> {
        Err(CallError::NativeCallFailure {
            routine: String::new(),
            message: "no trampoline for target".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Width;

    fn int(bits: u64) -> RawArgument {
        RawArgument::integer(bits, Width::W64)
    }

    fn float(value: f64) -> RawArgument {
        RawArgument::float(value.to_bits(), Width::W64)
    }

    #[test]
    fn test_sysv_gp_argument_assignment() {
        let mut assigner = SysVAssigner::new();

        for i in 0..6 {
            let slot = assigner.assign_arg(RegBank::GeneralPurpose).unwrap();
            assert_eq!(
                slot,
                Slot::Register {
                    bank: RegBank::GeneralPurpose,
                    index: i
                }
            );
        }

        // 7th argument should go to stack
        let slot = assigner.assign_arg(RegBank::GeneralPurpose).unwrap();
        assert_eq!(slot, Slot::Stack(0));
        assert_eq!(assigner.gp_used(), 6);
    }

    #[test]
    fn test_sysv_xmm_argument_assignment() {
        let mut assigner = SysVAssigner::new();

        for i in 0..8 {
            let slot = assigner.assign_arg(RegBank::Xmm).unwrap();
            assert_eq!(
                slot,
                Slot::Register {
                    bank: RegBank::Xmm,
                    index: i
                }
            );
        }

        let slot = assigner.assign_arg(RegBank::Xmm).unwrap();
        assert_eq!(slot, Slot::Stack(0));
        assert_eq!(assigner.xmm_used(), 8);
        assert_eq!(assigner.gp_used(), 0);
    }

    #[test]
    fn test_stack_limit() {
        let mut assigner = SysVAssigner::new();
        for _ in 0..6 + SysVConvention::MAX_STACK_SLOTS {
            assigner.assign_arg(RegBank::GeneralPurpose).unwrap();
        }
        assert_eq!(assigner.stack_used(), SysVConvention::MAX_STACK_SLOTS);
        assert_eq!(
            assigner.assign_arg(RegBank::GeneralPurpose),
            Err(CallError::TooManyStackArguments {
                limit: SysVConvention::MAX_STACK_SLOTS
            })
        );

        assigner.reset();
        assert_eq!(assigner.stack_used(), 0);
    }

    #[test]
    fn test_classify_register_order() {
        let scope = CallScope::new();
        let args = [int(1), float(2.0), int(3), float(4.0)];
        let buffers = SysVConvention.classify(&scope, &args, true).unwrap();

        assert_eq!(&buffers.integers[..], &[1, 3]);
        assert_eq!(&buffers.floats[..], &[2.0f64.to_bits(), 4.0f64.to_bits()]);
        assert!(buffers.stack.is_empty());
        assert!(buffers.float_result);
    }

    #[test]
    fn test_classify_odd_stack_is_padded_and_reversed() {
        let scope = CallScope::new();
        let args: Vec<_> = (1..=9).map(int).collect();
        let buffers = SysVConvention.classify(&scope, &args, false).unwrap();

        assert_eq!(&buffers.integers[..], &[1, 2, 3, 4, 5, 6]);
        // 7, 8, 9 on the stack plus one padding word, in push order
        assert_eq!(&buffers.stack[..], &[0, 9, 8, 7]);
    }

    #[test]
    fn test_classify_even_stack_is_not_padded() {
        let scope = CallScope::new();
        let args: Vec<_> = (0..10).map(|i| float(i as f64)).collect();
        let buffers = SysVConvention.classify(&scope, &args, false).unwrap();

        assert_eq!(buffers.floats.len(), 8);
        assert_eq!(&buffers.stack[..], &[9.0f64.to_bits(), 8.0f64.to_bits()]);
        assert!(buffers.integers.is_empty());
    }

    #[test]
    fn test_classify_too_many_stack_arguments() {
        let scope = CallScope::new();
        let args: Vec<_> = (0..6 + SysVConvention::MAX_STACK_SLOTS as u64 + 1)
            .map(int)
            .collect();
        assert!(matches!(
            SysVConvention.classify(&scope, &args, false),
            Err(CallError::TooManyStackArguments { limit: 100 })
        ));

        // Exactly at the limit still classifies.
        let buffers = SysVConvention
            .classify(&scope, &args[..args.len() - 1], false)
            .unwrap();
        assert_eq!(buffers.stack.len(), 100);

        // Padding past an odd limit-minus-one count does not count as a slot.
        let buffers = SysVConvention
            .classify(&scope, &args[..args.len() - 2], false)
            .unwrap();
        assert_eq!(buffers.stack.len(), 100);
        assert_eq!(buffers.stack[0], 0);
    }
}
