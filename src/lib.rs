//! dlcall - call native library routines described at run time.
//!
//! Open a shared library, describe a routine with a C-like declaration, and
//! call it with ordinary values. No per-routine bindings are generated: each
//! argument is placed by the platform's calling convention and the raw result
//! word is decoded as the declared result type.
//!
//! # Primary Usage
//!
//! ```no_run
//! use dlcall::{args, Out, Value};
//!
//! let libc = dlcall::open("libc.so")?;
//! libc.define_signature("uint strlen(string s)")?;
//! let len = libc.call("strlen", &mut args!["this"])?;
//! assert_eq!(len, Some(Value::UInt(4)));
//!
//! let mut end = 0usize;
//! libc.define_signature("int64 strtol(string s, pointer *end, int32 base)")?;
//! let n = libc.call("strtol", &mut args!["42xyz", Out::Pointer(&mut end), 10])?;
//! assert_eq!(n, Some(Value::Int64(42)));
//! assert_ne!(end, 0);
//! # Ok::<(), dlcall::CallError>(())
//! ```
//!
//! # Architecture
//!
//! - [`core`] - types, values, marshalling, signatures, loader, libraries
//! - [`abi`] - argument classification strategies behind [`abi::CallConvention`]
//! - [`x64`] - System V classification and the iced-x86 call trampoline

pub mod abi;
pub mod core;
pub mod x64;

pub use crate::core::{
    parse_signature, Arg, ArgumentDescriptor, CallError, CallResult, Library, OpenFlags, Out,
    Routine, RoutineDescriptor, RoutineHandle, StringEncoding, TypeKind, Value,
};

/// Open a library with default flags.
///
/// See [`Library::open_with_flags`] for path handling.
pub fn open(path: &str) -> CallResult<Library> {
    Library::open(path)
}
