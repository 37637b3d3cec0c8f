// This module is the hub of the call engine's platform-independent parts. types and value
// describe what crosses the boundary (type kinds, argument descriptors, caller values and
// decoded results), marshal converts between the two and owns the per-call arena, signature
// and routine turn C-like declarations into typed routine descriptors, loader serialises access
// to the OS dynamic loader, and library ties them together into open libraries whose routines
// can be defined, looked up and called. Calling conventions live in crate::abi.

//! Core call engine infrastructure.
//!
//! # Key Components
//!
//! ## Types (`types`, `value`)
//! - The closed set of [`TypeKind`]s and [`ArgumentDescriptor`]s
//! - Caller-side [`Arg`]uments and decoded [`Value`]s
//!
//! ## Marshalling (`marshal`)
//! - Per-call [`CallScope`] arena
//! - Encoding into raw argument words and decoding of result words
//!
//! ## Libraries (`loader`, `library`, `routine`, `signature`)
//! - Process-wide loader lock
//! - Per-library routine registry and call orchestration

pub mod error;
pub mod library;
pub mod loader;
pub mod marshal;
pub mod routine;
pub mod signature;
pub mod types;
pub mod value;

pub use error::{CallError, CallResult};
pub use library::{Library, RoutineHandle};
pub use loader::{LoaderLock, OpenFlags, LIB_EXT};
pub use marshal::{CallScope, RawArgument, StringEncoding};
pub use routine::{Routine, RoutineDescriptor};
pub use signature::parse_signature;
pub use types::{ArgumentDescriptor, TypeKind, Width};
pub use value::{Arg, Out, Value};
