// This module wraps the operating system's dynamic loader through libloading. The loader's
// entry points (open, symbol resolution, close) and its "last error" state are process-global,
// and on some targets the error state is not scoped to the failing call. LoaderLock is the one
// process-wide synchronisation handle for them: every loader operation is a method on the
// LoaderGuard obtained from LoaderLock::acquire(), so the lock is held for the call and for the
// reading of its error text. Per-library state has its own lock, always taken before this one.

//! Serialized access to the native dynamic loader.

use crate::core::error::{CallError, CallResult};
use std::ffi::c_void;
use std::ops::BitOr;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Platform library file extension appended to bare names.
#[cfg(target_os = "windows")]
pub const LIB_EXT: &str = "dll";
#[cfg(target_os = "macos")]
pub const LIB_EXT: &str = "dylib";
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const LIB_EXT: &str = "so";

/// Flags for opening a library. Ignored on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags(i32);

impl OpenFlags {
    pub const EMPTY: OpenFlags = OpenFlags(0);

    #[cfg(unix)]
    pub const LAZY: OpenFlags = OpenFlags(libloading::os::unix::RTLD_LAZY);
    #[cfg(unix)]
    pub const NOW: OpenFlags = OpenFlags(libloading::os::unix::RTLD_NOW);
    #[cfg(unix)]
    pub const GLOBAL: OpenFlags = OpenFlags(libloading::os::unix::RTLD_GLOBAL);
    #[cfg(unix)]
    pub const LOCAL: OpenFlags = OpenFlags(libloading::os::unix::RTLD_LOCAL);

    #[cfg(not(unix))]
    pub const LAZY: OpenFlags = OpenFlags(0x1);
    #[cfg(not(unix))]
    pub const NOW: OpenFlags = OpenFlags(0x2);
    #[cfg(not(unix))]
    pub const GLOBAL: OpenFlags = OpenFlags(0x100);
    #[cfg(not(unix))]
    pub const LOCAL: OpenFlags = OpenFlags(0);

    pub fn bits(self) -> i32 {
        self.0
    }

    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Binding mode defaults to `NOW` when neither `LAZY` nor `NOW` is set.
    pub fn normalized(self) -> OpenFlags {
        if self.0 & (Self::LAZY.0 | Self::NOW.0) == 0 {
            self | Self::NOW
        } else {
            self
        }
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

/// The process-wide loader lock.
pub struct LoaderLock {
    mutex: Mutex<()>,
}

static GLOBAL_LOADER: LoaderLock = LoaderLock {
    mutex: Mutex::new(()),
};

impl LoaderLock {
    pub fn global() -> &'static LoaderLock {
        &GLOBAL_LOADER
    }

    /// Block until the loader is free. A poisoned lock is taken over: the
    /// guarded state lives in the OS loader, not in the mutex.
    pub fn acquire(&self) -> LoaderGuard<'_> {
        LoaderGuard {
            _guard: self.mutex.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }
}

/// Proof that the loader lock is held; loader operations hang off it.
pub struct LoaderGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl LoaderGuard<'_> {
    /// Open the library at `path`.
    pub fn open(&self, path: &str, flags: OpenFlags) -> CallResult<libloading::Library> {
        log::debug!("loader: open {path:?} flags={:#x}", flags.bits());
        open_native(path, flags).map_err(|e| CallError::LoaderError {
            operation: "open",
            message: e.to_string(),
        })
    }

    /// Resolve `name` to its address in `library`.
    pub fn resolve(&self, library: &libloading::Library, name: &str) -> CallResult<usize> {
        let not_found = |reason: String| CallError::SymbolNotFound {
            name: name.to_string(),
            reason,
        };
        if name.as_bytes().contains(&0) {
            return Err(not_found("name contains a NUL byte".into()));
        }
        // SAFETY: the symbol is only read as an address, never called through this type.
        let symbol = unsafe { library.get::<*mut c_void>(name.as_bytes()) }
            .map_err(|e| not_found(e.to_string()))?;
        let address = *symbol as usize;
        if address == 0 {
            return Err(not_found("symbol resolved to a null address".into()));
        }
        log::trace!("loader: {name} -> {address:#x}");
        Ok(address)
    }

    /// Unload `library`.
    pub fn close(&self, library: libloading::Library) -> CallResult<()> {
        library.close().map_err(|e| CallError::LoaderError {
            operation: "close",
            message: e.to_string(),
        })
    }
}

/// An empty path names the running program and the libraries it has loaded.
#[cfg(unix)]
fn open_native(path: &str, flags: OpenFlags) -> Result<libloading::Library, libloading::Error> {
    let file = (!path.is_empty()).then_some(path);
    // SAFETY: running a library's initialisers is the caller's explicit request.
    unsafe { libloading::os::unix::Library::open(file, flags.normalized().bits()) }
        .map(libloading::Library::from)
}

#[cfg(windows)]
fn open_native(path: &str, _flags: OpenFlags) -> Result<libloading::Library, libloading::Error> {
    if path.is_empty() {
        return libloading::os::windows::Library::this().map(libloading::Library::from);
    }
    // SAFETY: running a library's initialisers is the caller's explicit request.
    unsafe { libloading::Library::new(path) }
}
