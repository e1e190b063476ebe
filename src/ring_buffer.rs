//! Lock-free single-producer/single-consumer ring buffer
//!
//! Fixed capacity `N` (a power of two) so slot indices wrap with a mask.
//! The write and read cursors increase monotonically and live on separate
//! cache lines. One slot is always left free, so the buffer reports full
//! once `N - 1` elements are outstanding.
//!
//! `channel()` hands out exactly one `Producer` and one `Consumer`; neither is
//! `Clone`, which is what makes the single-producer/single-consumer contract
//! hold without any locking.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[repr(align(64))]
struct CachePadded<T>(T);

struct Shared<T, const N: usize> {
    write: CachePadded<AtomicUsize>,
    read: CachePadded<AtomicUsize>,
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Slots are only touched by the side that currently owns them, as decided by
// the acquire/release handoff on the cursors.
unsafe impl<T: Send, const N: usize> Send for Shared<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for Shared<T, N> {}

impl<T, const N: usize> Shared<T, N> {
    const MASK: usize = N - 1;
    const VALID_CAPACITY: () = assert!(
        N >= 2 && N.is_power_of_two(),
        "ring buffer capacity must be a power of two >= 2"
    );

    fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        let slots = (0..N)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Shared {
            write: CachePadded(AtomicUsize::new(0)),
            read: CachePadded(AtomicUsize::new(0)),
            slots,
        }
    }

    fn len(&self) -> usize {
        let write = self.write.0.load(Ordering::Acquire);
        let read = self.read.0.load(Ordering::Acquire);
        write.wrapping_sub(read)
    }
}

impl<T, const N: usize> Drop for Shared<T, N> {
    fn drop(&mut self) {
        let write = *self.write.0.get_mut();
        let mut read = *self.read.0.get_mut();
        while read != write {
            let slot = &mut self.slots[read & Self::MASK];
            unsafe { slot.get_mut().assume_init_drop() };
            read = read.wrapping_add(1);
        }
    }
}

/// Create a ring buffer of capacity `N` and split it into its two halves.
pub fn channel<T: Send, const N: usize>() -> (Producer<T, N>, Consumer<T, N>) {
    let shared = Arc::new(Shared::<T, N>::new());
    (
        Producer {
            shared: Arc::clone(&shared),
            write: 0,
            cached_read: 0,
        },
        Consumer {
            shared,
            read: 0,
            cached_write: 0,
        },
    )
}

/// Writing half. Owned by exactly one thread at a time.
pub struct Producer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
    write: usize,
    cached_read: usize,
}

impl<T, const N: usize> Producer<T, N> {
    /// Push without blocking. A full buffer hands the item back.
    #[inline]
    pub fn try_push(&mut self, item: T) -> Result<(), T> {
        if self.write.wrapping_sub(self.cached_read) >= N - 1 {
            self.cached_read = self.shared.read.0.load(Ordering::Acquire);
            if self.write.wrapping_sub(self.cached_read) >= N - 1 {
                return Err(item);
            }
        }

        let slot = &self.shared.slots[self.write & Shared::<T, N>::MASK];
        unsafe { (*slot.get()).write(item) };
        self.write = self.write.wrapping_add(1);
        self.shared.write.0.store(self.write, Ordering::Release);
        Ok(())
    }

    /// Outstanding (pushed, not yet popped) element count.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= N - 1
    }

    /// Usable capacity, one less than `N`.
    pub const fn capacity(&self) -> usize {
        N - 1
    }
}

/// Reading half. Owned by exactly one thread at a time.
pub struct Consumer<T, const N: usize> {
    shared: Arc<Shared<T, N>>,
    read: usize,
    cached_write: usize,
}

impl<T, const N: usize> Consumer<T, N> {
    /// Pop without blocking. `None` when the buffer is empty.
    #[inline]
    pub fn try_pop(&mut self) -> Option<T> {
        if self.read == self.cached_write {
            self.cached_write = self.shared.write.0.load(Ordering::Acquire);
            if self.read == self.cached_write {
                return None;
            }
        }

        let slot = &self.shared.slots[self.read & Shared::<T, N>::MASK];
        let item = unsafe { (*slot.get()).assume_init_read() };
        self.read = self.read.wrapping_add(1);
        self.shared.read.0.store(self.read, Ordering::Release);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn capacity(&self) -> usize {
        N - 1
    }
}
