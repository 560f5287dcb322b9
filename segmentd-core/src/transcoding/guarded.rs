//! Read/write guarded state for the coordinator's shared maps
//!
//! Each piece of coordinator state owns one of these so that unrelated readers
//! never serialize behind a single struct-level lock. Guards are released on
//! drop, so every exit path (early return, `?`, panic unwinding) releases them.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Shared/exclusive access wrapper around a value.
///
/// Any number of readers may hold the value concurrently. A writer excludes
/// both readers and other writers. The underlying `parking_lot` lock is
/// task-fair and does not poison, so a panicking holder leaves the value
/// reachable for the next caller.
///
/// Critical sections are expected to be short map operations. The closure
/// helpers `read_with` and `write_with` take synchronous closures, which keeps
/// `.await` points (and therefore I/O) outside the lock.
#[derive(Debug, Default)]
pub struct Guarded<T> {
    inner: RwLock<T>,
}

impl<T> Guarded<T> {
    /// Wraps a value.
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(value),
        }
    }

    /// Acquires shared access. Released when the guard drops.
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Acquires exclusive access. Released when the guard drops.
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    /// Runs `f` with shared access and returns its result.
    pub fn read_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let guard = self.inner.read();
        f(&guard)
    }

    /// Runs `f` with exclusive access and returns its result.
    pub fn write_with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.write();
        f(&mut guard)
    }
}
