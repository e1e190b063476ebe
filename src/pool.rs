//! Fixed-capacity object pool
//!
//! All `N` values are allocated up front; the hot path only flips atomic
//! occupancy flags. A successful `acquire` hands out a `Pooled` handle that
//! owns the slot until it is released (explicitly or on drop). Handles are
//! `Send`, so a slot filled on the receive thread can travel through a ring
//! buffer and be released on the processing thread.

use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Slot<T> {
    in_use: AtomicBool,
    value: UnsafeCell<T>,
}

pub struct ObjectPool<T, const N: usize> {
    slots: Box<[Slot<T>]>,
    cursor: AtomicUsize,
}

// A slot's value is only reachable through the single `Pooled` that won the CAS.
unsafe impl<T: Send, const N: usize> Send for ObjectPool<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for ObjectPool<T, N> {}

impl<T, const N: usize> ObjectPool<T, N> {
    /// Pre-allocate `N` values built by `factory`.
    pub fn new<F>(mut factory: F) -> Arc<Self>
    where
        F: FnMut() -> T,
    {
        let slots = (0..N)
            .map(|_| Slot {
                in_use: AtomicBool::new(false),
                value: UnsafeCell::new(factory()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Arc::new(ObjectPool {
            slots,
            cursor: AtomicUsize::new(0),
        })
    }

    /// Claim a free slot, or `None` if all `N` are in use.
    pub fn acquire(self: &Arc<Self>) -> Option<Pooled<T, N>> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..N {
            let index = start.wrapping_add(offset) % N;
            let slot = &self.slots[index];
            if slot
                .in_use
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(Pooled {
                    pool: Arc::clone(self),
                    index,
                    _value: PhantomData,
                });
            }
        }
        None
    }

    /// Number of slots currently free. Racy by nature; diagnostics only.
    pub fn available(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| !slot.in_use.load(Ordering::Relaxed))
            .count()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    fn release_index(&self, index: usize) {
        self.slots[index].in_use.store(false, Ordering::Release);
    }
}

/// Exclusive handle to one pool slot.
///
/// Shared references hand out `&T`, so the handle is only `Sync` when `T` is.
///
/// ```compile_fail
/// fn assert_sync<S: Sync>() {}
/// assert_sync::<feed_pipeline::Pooled<std::cell::Cell<u32>, 1>>();
/// ```
pub struct Pooled<T, const N: usize> {
    pool: Arc<ObjectPool<T, N>>,
    index: usize,
    _value: PhantomData<T>,
}

impl<T, const N: usize> Pooled<T, N> {
    /// Slot index inside the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Return the slot to the pool. Same as dropping the handle.
    pub fn release(self) {
        drop(self)
    }
}

impl<T, const N: usize> Deref for Pooled<T, N> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.pool.slots[self.index].value.get() }
    }
}

impl<T, const N: usize> DerefMut for Pooled<T, N> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.pool.slots[self.index].value.get() }
    }
}

impl<T, const N: usize> Drop for Pooled<T, N> {
    fn drop(&mut self) {
        self.pool.release_index(self.index);
    }
}

impl<T: fmt::Debug, const N: usize> fmt::Debug for Pooled<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("index", &self.index)
            .field("value", &**self)
            .finish()
    }
}
