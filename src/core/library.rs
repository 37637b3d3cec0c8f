// This module implements the per-library routine registry and the call path built on it. A
// Library is a clonable handle to shared state: the loader handle (None once closed), the map
// of defined routines, the string encoding used for this library, and an in-flight call counter.
// The state sits behind one Mutex that is only held for short bookkeeping steps (open check,
// lookup with copy-out of the Arc<Routine>, counting the call in) and never across native
// code, so a callee may re-enter the engine. Loader work (resolve, close) takes the process-wide
// loader lock while the library lock is held, always in that order. A call counts down its
// in-flight entry when its guard drops, and close() refuses to unload while any call is counted.
// The call itself encodes each declared argument into a fresh CallScope, classifies the raw
// words with the target's CallConvention, invokes, and decodes the result word.

//! Open libraries, their routine registries, and typed calls.

use crate::abi;
use crate::core::error::{CallError, CallResult};
use crate::core::loader::{LoaderLock, OpenFlags, LIB_EXT};
use crate::core::marshal::{self, CallScope, StringEncoding};
use crate::core::routine::{Routine, RoutineDescriptor};
use crate::core::signature::parse_signature;
use crate::core::types::{ArgumentDescriptor, TypeKind};
use crate::core::value::{Arg, Value};
use bumpalo::collections::Vec as BumpVec;
use hashbrown::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct LibraryState {
    handle: Option<libloading::Library>,
    routines: HashMap<String, Arc<Routine>>,
    encoding: StringEncoding,
}

struct LibraryInner {
    path: String,
    state: Mutex<LibraryState>,
    /// Calls that have passed the open check and not yet returned.
    in_flight: AtomicUsize,
}

impl LibraryInner {
    fn lock(&self) -> MutexGuard<'_, LibraryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check the library is open, copy out what the call needs, and count it in.
    fn enter<T>(
        &self,
        select: impl FnOnce(&LibraryState) -> CallResult<T>,
    ) -> CallResult<(T, StringEncoding, InFlight<'_>)> {
        let state = self.lock();
        if state.handle.is_none() {
            return Err(CallError::LibraryClosed);
        }
        let selected = select(&*state)?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Ok((selected, state.encoding, InFlight(&self.in_flight)))
    }
}

impl Drop for LibraryInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = state.handle.take() {
            let loader = LoaderLock::global().acquire();
            if let Err(e) = loader.close(handle) {
                log::warn!("{}: {e}", self.path);
            }
        }
    }
}

/// In-flight call marker; counts the call out on drop.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Handle to an open dynamic library.
///
/// Clones share the same loader handle and routine registry.
#[derive(Clone)]
pub struct Library {
    inner: Arc<LibraryInner>,
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("path", &self.inner.path)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Append the platform extension to a path that has none. The empty path
/// is kept as is.
pub fn with_platform_extension(path: &str) -> String {
    if path.is_empty() || Path::new(path).extension().is_some() {
        path.to_string()
    } else {
        format!("{path}.{LIB_EXT}")
    }
}

impl Library {
    /// Open a library with default flags.
    pub fn open(path: &str) -> CallResult<Self> {
        Self::open_with_flags(path, OpenFlags::EMPTY)
    }

    /// Open a library.
    ///
    /// A path without an extension gets the platform's one. The empty path
    /// opens the running program, whose symbols include those of every
    /// library it has already loaded. On Linux a failed `libc.so` (usually a
    /// linker script) is retried as `libc.so.6`.
    pub fn open_with_flags(path: &str, flags: OpenFlags) -> CallResult<Self> {
        let mut path = with_platform_extension(path);

        let handle = {
            let loader = LoaderLock::global().acquire();
            match loader.open(&path, flags) {
                Ok(handle) => handle,
                Err(err) if cfg!(target_os = "linux") && path == "libc.so" => {
                    log::warn!("{err}; retrying as libc.so.6");
                    path = "libc.so.6".to_string();
                    loader.open(&path, flags)?
                }
                Err(err) => return Err(err),
            }
        };
        log::debug!("opened {path}");

        Ok(Self {
            inner: Arc::new(LibraryInner {
                path,
                state: Mutex::new(LibraryState {
                    handle: Some(handle),
                    routines: HashMap::new(),
                    encoding: abi::native().string_encoding(),
                }),
                in_flight: AtomicUsize::new(0),
            }),
        })
    }

    /// Open a library and define every routine in `signatures`.
    pub fn open_with_signatures(path: &str, signatures: &[&str]) -> CallResult<Self> {
        let library = Self::open(path)?;
        for signature in signatures {
            library.define_signature(signature)?;
        }
        Ok(library)
    }

    /// Path the library was opened from.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().handle.is_some()
    }

    pub fn string_encoding(&self) -> StringEncoding {
        self.inner.lock().encoding
    }

    /// Change how strings are passed to and read from this library's routines.
    pub fn set_string_encoding(&self, encoding: StringEncoding) {
        self.inner.lock().encoding = encoding;
    }

    /// Resolve `descriptor.name` and register it. A later definition of the
    /// same name replaces the earlier one.
    pub fn define(&self, descriptor: RoutineDescriptor) -> CallResult<()> {
        let mut state = self.inner.lock();
        let handle = state.handle.as_ref().ok_or(CallError::LibraryClosed)?;
        let address = LoaderLock::global()
            .acquire()
            .resolve(handle, &descriptor.name)?;

        log::debug!("define {descriptor} at {address:#x}");
        let name = descriptor.name.clone();
        state
            .routines
            .insert(name, Arc::new(Routine { descriptor, address }));
        Ok(())
    }

    /// Parse a C-like declaration and define it.
    pub fn define_signature(&self, signature: &str) -> CallResult<()> {
        self.define(parse_signature(signature)?)
    }

    pub fn find(&self, name: &str) -> CallResult<Arc<Routine>> {
        self.inner
            .lock()
            .routines
            .get(name)
            .cloned()
            .ok_or_else(|| CallError::RoutineNotFound {
                name: name.to_string(),
            })
    }

    /// A callable handle to a defined routine.
    pub fn routine(&self, name: &str) -> CallResult<RoutineHandle> {
        Ok(RoutineHandle {
            library: self.clone(),
            routine: self.find(name)?,
        })
    }

    /// Names of all defined routines, sorted.
    pub fn routines(&self) -> Vec<String> {
        let mut names: Vec<_> = self.inner.lock().routines.keys().cloned().collect();
        names.sort();
        names
    }

    /// Call a defined routine.
    ///
    /// Values beyond the declared parameters are ignored. Out-parameter
    /// storage in `args` is written by the callee.
    pub fn call(&self, name: &str, args: &mut [Arg<'_>]) -> CallResult<Option<Value>> {
        let (routine, encoding, _in_flight) = self.inner.enter(|state| {
            state
                .routines
                .get(name)
                .cloned()
                .ok_or_else(|| CallError::RoutineNotFound {
                    name: name.to_string(),
                })
        })?;
        call_routine(&routine, args, encoding)
    }

    /// Address of an exported symbol.
    pub fn symbol_address(&self, name: &str) -> CallResult<usize> {
        let state = self.inner.lock();
        let handle = state.handle.as_ref().ok_or(CallError::LibraryClosed)?;
        LoaderLock::global().acquire().resolve(handle, name)
    }

    /// Read an exported data symbol as `descriptor`.
    ///
    /// An indirect descriptor yields the symbol's address.
    pub fn symbol(&self, name: &str, descriptor: ArgumentDescriptor) -> CallResult<Value> {
        let state = self.inner.lock();
        let handle = state.handle.as_ref().ok_or(CallError::LibraryClosed)?;
        let address = LoaderLock::global().acquire().resolve(handle, name)?;

        if descriptor.indirect {
            return Ok(Value::Pointer(address));
        }
        match descriptor.kind {
            TypeKind::Void => Err(CallError::UnsupportedKind {
                kind: descriptor.kind.to_string(),
            }),
            // SAFETY: `address` is a live export of a loaded library, which
            // stays loaded while the state lock is held.
            kind => Ok(unsafe { marshal::read_value(kind, address, state.encoding) }),
        }
    }

    /// Unload the library. Closing twice is a no-op.
    pub fn close(&self) -> CallResult<()> {
        let mut state = self.inner.lock();
        let in_flight = self.inner.in_flight.load(Ordering::Acquire);
        if in_flight > 0 {
            return Err(CallError::LibraryBusy { in_flight });
        }
        let Some(handle) = state.handle.take() else {
            return Ok(());
        };
        state.routines.clear();
        LoaderLock::global().acquire().close(handle)?;
        log::debug!("closed {}", self.inner.path);
        Ok(())
    }
}

/// A defined routine bound to its library.
///
/// Calls fail with [`CallError::LibraryClosed`] once the library is closed.
#[derive(Clone, Debug)]
pub struct RoutineHandle {
    library: Library,
    routine: Arc<Routine>,
}

impl RoutineHandle {
    pub fn routine(&self) -> &Routine {
        &self.routine
    }

    pub fn library(&self) -> &Library {
        &self.library
    }

    pub fn call(&self, args: &mut [Arg<'_>]) -> CallResult<Option<Value>> {
        let ((), encoding, _in_flight) = self.library.inner.enter(|_| Ok(()))?;
        call_routine(&self.routine, args, encoding)
    }
}

/// Encode, classify, invoke, decode.
fn call_routine(
    routine: &Routine,
    args: &mut [Arg<'_>],
    encoding: StringEncoding,
) -> CallResult<Option<Value>> {
    let params = routine.args();
    if args.len() < params.len() {
        return Err(CallError::TooFewArguments {
            routine: routine.name().to_string(),
            expected: params.len(),
            actual: args.len(),
        });
    }

    let convention = abi::native();
    let scope = CallScope::new();
    let mut raw = BumpVec::with_capacity_in(params.len(), scope.arena());
    for (index, (descriptor, arg)) in params.iter().zip(args.iter_mut()).enumerate() {
        let encoded = marshal::encode(&scope, descriptor, index, arg, encoding)
            .map_err(|e| e.in_routine(routine.name()))?;
        raw.push(encoded);
    }

    let buffers = convention.classify(&scope, &raw, routine.descriptor.float_result())?;
    log::trace!(
        "{}: call {} at {:#x} ({} int, {} float, {} stack)",
        convention.name(),
        routine.name(),
        routine.address,
        buffers.integers.len(),
        buffers.floats.len(),
        buffers.stack.len()
    );

    // SAFETY: the address was resolved from a library the caller holds open
    // (counted in flight), and the buffers only reference the call scope and
    // caller-owned storage borrowed by `args`.
    let word = unsafe { convention.invoke(routine.address, &buffers) }
        .map_err(|e| e.in_routine(routine.name()))?;

    // SAFETY: the callee's result is described by the routine's declaration.
    unsafe { marshal::decode(routine.result(), word, encoding) }
}
