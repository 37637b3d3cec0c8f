// This module owns the one piece of machine code the engine runs: a small System V x86-64
// routine, assembled once per process with iced-x86's CodeAssembler into an anonymous memmap2
// mapping that is then flipped to read+execute. The trampoline receives the classified buffers
// and the target address, pushes the stack words (already padded to an even count and reversed
// into push order), loads XMM0-XMM7 and RDI, RSI, RDX, RCX, R8, R9 from the register buffers,
// sets AL to the vector register count for variadic callees, calls the target, and returns
// either RAX or the bits of XMM0. RSP is restored from the frame pointer, so the callee's stack
// usage and the pushed words never leak into the caller's frame.

//! Run-time assembled call trampoline.

use crate::abi::ClassifiedCallBuffers;
use crate::core::error::{CallError, CallResult};
use crate::x64::calling_convention::SysVConvention;
use iced_x86::code_asm::*;
use iced_x86::IcedError;
use memmap2::{Mmap, MmapMut};
use std::sync::OnceLock;

/// Error types for trampoline construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrampolineError {
    /// Assembly error from iced-x86.
    AssemblyError(String),
    /// The executable mapping could not be created.
    MappingError(String),
    /// Assembled code does not fit in the mapping.
    CodeTooLarge(usize),
}

impl std::fmt::Display for TrampolineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrampolineError::AssemblyError(msg) => write!(f, "Assembly error: {msg}"),
            TrampolineError::MappingError(msg) => write!(f, "Mapping error: {msg}"),
            TrampolineError::CodeTooLarge(len) => {
                write!(f, "Trampoline of {len} bytes exceeds its mapping")
            }
        }
    }
}

impl std::error::Error for TrampolineError {}

impl From<IcedError> for TrampolineError {
    fn from(e: IcedError) -> Self {
        TrampolineError::AssemblyError(e.to_string())
    }
}

impl From<std::io::Error> for TrampolineError {
    fn from(e: std::io::Error) -> Self {
        TrampolineError::MappingError(e.to_string())
    }
}

type TrampolineFn = unsafe extern "sysv64" fn(
    target: u64,
    ints: *const u64,
    floats: *const u64,
    stack_len: u64,
    stack: *const u64,
    float_result: u64,
) -> u64;

const MAPPING_SIZE: usize = 4096;

/// Executable call trampoline.
pub struct Trampoline {
    /// Keeps the code mapped for as long as `entry` may be called.
    _code: Mmap,
    entry: TrampolineFn,
}

impl std::fmt::Debug for Trampoline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trampoline")
            .field("entry", &(self.entry as usize as *const u8))
            .finish()
    }
}

impl Trampoline {
    /// The process-wide trampoline, built on first use.
    pub fn global() -> CallResult<&'static Trampoline> {
        static TRAMPOLINE: OnceLock<Result<Trampoline, TrampolineError>> = OnceLock::new();
        TRAMPOLINE
            .get_or_init(|| {
                let built = Trampoline::build();
                match &built {
                    Ok(t) => log::debug!("trampoline ready at {:p}", t.entry as usize as *const u8),
                    Err(e) => log::error!("trampoline construction failed: {e}"),
                }
                built
            })
            .as_ref()
            .map_err(|e| CallError::NativeCallFailure {
                routine: String::new(),
                message: e.to_string(),
            })
    }

    /// Assemble a fresh trampoline into its own mapping.
    pub fn build() -> Result<Self, TrampolineError> {
        let mut map = MmapMut::map_anon(MAPPING_SIZE)?;
        let base = map.as_ptr() as u64;
        let code = assemble(base)?;
        if code.len() > map.len() {
            return Err(TrampolineError::CodeTooLarge(code.len()));
        }
        map[..code.len()].copy_from_slice(&code);
        let code_map = map.make_exec()?;

        // SAFETY: the mapping now holds the routine assembled above at its
        // start, with the signature of `TrampolineFn`.
        let entry = unsafe { std::mem::transmute::<*const u8, TrampolineFn>(code_map.as_ptr()) };
        Ok(Self {
            _code: code_map,
            entry,
        })
    }

    /// Call `target` with the classified buffers.
    ///
    /// Buffers that do not fit the System V register and stack layout are
    /// rejected before anything is called.
    ///
    /// # Safety
    ///
    /// See [`crate::abi::CallConvention::invoke`].
    pub unsafe fn call(
        &self,
        target: usize,
        buffers: &ClassifiedCallBuffers<'_>,
    ) -> CallResult<u64> {
        let layout_error = |message: String| CallError::NativeCallFailure {
            routine: String::new(),
            message,
        };
        if buffers.integers.len() > SysVConvention::INTEGER_REGISTERS
            || buffers.floats.len() > SysVConvention::FLOAT_REGISTERS
        {
            return Err(layout_error(format!(
                "{} integer and {} float register words exceed {} and {}",
                buffers.integers.len(),
                buffers.floats.len(),
                SysVConvention::INTEGER_REGISTERS,
                SysVConvention::FLOAT_REGISTERS
            )));
        }
        if buffers.stack.len() % 2 != 0 {
            return Err(layout_error(format!("odd stack area of {} words", buffers.stack.len())));
        }

        let mut ints = [0u64; SysVConvention::INTEGER_REGISTERS];
        ints[..buffers.integers.len()].copy_from_slice(&buffers.integers);
        let mut floats = [0u64; SysVConvention::FLOAT_REGISTERS];
        floats[..buffers.floats.len()].copy_from_slice(&buffers.floats);

        Ok((self.entry)(
            target as u64,
            ints.as_ptr(),
            floats.as_ptr(),
            buffers.stack.len() as u64,
            buffers.stack.as_ptr(),
            buffers.float_result as u64,
        ))
    }
}

/// Emit the trampoline for load address `base`.
///
/// Incoming: rdi = target, rsi = ints, rdx = floats, rcx = stack_len,
/// r8 = stack, r9 = float_result.
pub fn assemble(base: u64) -> Result<Vec<u8>, TrampolineError> {
    let mut a = CodeAssembler::new(64)?;
    let mut push_loop = a.create_label();
    let mut pushed = a.create_label();
    let mut int_result = a.create_label();

    // Three pushes from an 8-mod-16 entry rsp leave it 16-byte aligned.
    a.push(rbp)?;
    a.mov(rbp, rsp)?;
    a.push(rbx)?;
    a.push(r12)?;

    a.mov(r11, rdi)?;
    a.mov(r10, rsi)?;
    a.mov(rbx, r9)?;

    a.xor(eax, eax)?;
    a.test(rcx, rcx)?;
    a.jz(pushed)?;
    a.set_label(&mut push_loop)?;
    a.push(qword_ptr(r8 + rax * 8))?;
    a.inc(rax)?;
    a.cmp(rax, rcx)?;
    a.jb(push_loop)?;
    a.set_label(&mut pushed)?;

    const XMM_ARGS: [AsmRegisterXmm; 8] = [xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7];
    for (i, &reg) in XMM_ARGS.iter().enumerate() {
        a.movq(reg, qword_ptr(rdx + (i as i32) * 8))?;
    }

    // rdx, rcx, r8 and r9 are sources above, so they are loaded last.
    const GP_ARGS: [AsmRegister64; 6] = [rdi, rsi, rdx, rcx, r8, r9];
    for (i, &reg) in GP_ARGS.iter().enumerate() {
        a.mov(reg, qword_ptr(r10 + (i as i32) * 8))?;
    }

    a.mov(eax, XMM_ARGS.len() as i32)?;
    a.call(r11)?;

    a.test(rbx, rbx)?;
    a.jz(int_result)?;
    a.movq(rax, xmm0)?;
    a.set_label(&mut int_result)?;

    a.lea(rsp, qword_ptr(rbp - 16))?;
    a.pop(r12)?;
    a.pop(rbx)?;
    a.pop(rbp)?;
    a.ret()?;

    Ok(a.assemble(base)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{CallConvention, FixedSlotConvention};
    use crate::core::marshal::{CallScope, RawArgument};
    use crate::core::types::Width;

    extern "C" fn add3(a: i64, b: i64, c: i64) -> i64 {
        a + b + c
    }

    extern "C" fn scale(x: f64, factor: i32) -> f64 {
        x * factor as f64
    }

    #[allow(clippy::too_many_arguments)]
    extern "C" fn weighted(
        a: i64,
        b: i64,
        c: i64,
        d: i64,
        e: i64,
        f: i64,
        g: i64,
        h: i64,
        i: i64,
    ) -> i64 {
        a + 2 * b + 3 * c + 4 * d + 5 * e + 6 * f + 7 * g + 8 * h + 9 * i
    }

    #[allow(clippy::too_many_arguments)]
    extern "C" fn mixed(
        x0: f64,
        x1: f64,
        x2: f64,
        x3: f64,
        x4: f64,
        x5: f64,
        x6: f64,
        x7: f64,
        x8: f64,
        n: i64,
    ) -> f64 {
        (x0 + x1 + x2 + x3 + x4 + x5 + x6 + x7) * 10.0 + x8 + n as f64
    }

    fn int(value: i64) -> RawArgument {
        RawArgument::integer(value as u64, Width::W64)
    }

    fn float(value: f64) -> RawArgument {
        RawArgument::float(value.to_bits(), Width::W64)
    }

    fn call(target: usize, args: &[RawArgument], float_result: bool) -> u64 {
        let _ = env_logger::builder().is_test(true).try_init();
        let scope = CallScope::new();
        let buffers = SysVConvention
            .classify(&scope, args, float_result)
            .unwrap();
        unsafe { SysVConvention.invoke(target, &buffers).unwrap() }
    }

    #[test]
    fn test_assembled_code_is_position_independent() {
        let a = assemble(0x1000).unwrap();
        let b = assemble(0x7000_0000).unwrap();
        assert!(!a.is_empty());
        assert!(a.len() < MAPPING_SIZE);
        // Only relative branches: the bytes do not depend on the base.
        assert_eq!(a, b);
    }

    #[test]
    fn test_integer_call() {
        let result = call(add3 as usize, &[int(1), int(2), int(39)], false);
        assert_eq!(result as i64, 42);
    }

    #[test]
    fn test_float_result_and_mixed_registers() {
        let result = call(scale as usize, &[float(1.25), int(4)], true);
        assert_eq!(f64::from_bits(result), 5.0);
    }

    #[test]
    fn test_stack_arguments_keep_declaration_order() {
        let args: Vec<_> = (1..=9).map(int).collect();
        let result = call(weighted as usize, &args, false);
        // sum of k * k for k in 1..=9
        assert_eq!(result as i64, 285);
    }

    #[test]
    fn test_float_overflow_to_stack() {
        let mut args: Vec<_> = (0..9).map(|i| float(i as f64)).collect();
        args.push(int(3));
        let result = call(mixed as usize, &args, true);
        // (0 + 1 + ... + 7) * 10 + 8 + 3
        assert_eq!(f64::from_bits(result), 291.0);
    }

    #[test]
    fn test_foreign_layout_is_rejected() {
        let scope = CallScope::new();
        let args: Vec<_> = (0..15).map(int).collect();
        let buffers = FixedSlotConvention.classify(&scope, &args, false).unwrap();
        let trampoline = Trampoline::global().unwrap();
        let err = unsafe { trampoline.call(add3 as usize, &buffers) }.unwrap_err();
        assert!(matches!(err, CallError::NativeCallFailure { .. }));
    }

    #[test]
    fn test_global_is_shared() {
        let a = Trampoline::global().unwrap() as *const Trampoline;
        let b = Trampoline::global().unwrap() as *const Trampoline;
        assert_eq!(a, b);
    }
}
