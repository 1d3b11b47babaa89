//! Optimistic-read sequence lock.

use std::cell::UnsafeCell;
use std::mem::{self, MaybeUninit};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{fence, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A sequence lock protecting a small `Copy` value.
///
/// Writers serialize through an internal mutex and bump the sequence counter to an odd value for
/// the duration of the critical section. Readers copy the value without taking the mutex and then
/// validate that the sequence was even and unchanged across the copy; if validation fails, they
/// fall back to a blocking read under the writer mutex, which is bounded by the writer's O(1)
/// critical section.
///
/// This is the portable re-expression of a stamped-lock `tryOptimisticRead`/`validate` protocol:
/// readers add no overhead to writers in the common uncontended case and can never observe a torn
/// value.
pub(crate) struct SeqLock<T> {
    seq: AtomicU64,
    lock: Mutex<()>,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is either serialized through `lock` (writers and fallback readers) or
// performed as a validated volatile copy (optimistic readers), which is discarded on a torn read.
unsafe impl<T: Copy + Send> Sync for SeqLock<T> {}

impl<T: Copy> SeqLock<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            seq: AtomicU64::new(0),
            lock: Mutex::new(()),
            data: UnsafeCell::new(value),
        }
    }

    /// Returns a consistent copy of the protected value without blocking writers.
    pub(crate) fn read(&self) -> T {
        if let Some(value) = self.try_optimistic_read() {
            return value;
        }

        // A writer raced us. Take the writer mutex and re-read.
        let _guard = self.lock_writer();
        // SAFETY: holding the writer mutex excludes all mutation.
        unsafe { *self.data.get() }
    }

    fn try_optimistic_read(&self) -> Option<T> {
        let start = self.seq.load(Ordering::Acquire);
        if start & 1 != 0 {
            // A write is in progress.
            return None;
        }

        // SAFETY: the copy may race a writer, so it goes through per-word atomic loads rather
        // than a plain read. A racing write makes the copied bytes garbage, but they are
        // discarded by the validation failure and never interpreted before it.
        let value = unsafe { atomic_copy(self.data.get()) };

        // Order the data copy before the validating load of the sequence.
        fence(Ordering::Acquire);

        (self.seq.load(Ordering::Relaxed) == start).then_some(value)
    }

    /// Acquires exclusive write access, bumping the sequence to odd until the guard drops.
    pub(crate) fn write(&self) -> WriteGuard<'_, T> {
        let guard = self.lock_writer();
        let seq = self.seq.load(Ordering::Relaxed);
        self.seq.store(seq.wrapping_add(1), Ordering::Relaxed);

        // Order the sequence bump before any mutation of the data.
        fence(Ordering::Release);

        WriteGuard { lock: self, _mutex: guard }
    }

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        // A poisoned mutex only means a writer panicked mid-update; the accumulators are plain
        // numbers, so the value is still usable.
        self.lock.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Copies `*src` one word at a time through relaxed atomic loads, with a byte-sized tail for
/// whatever the word loop does not cover.
///
/// A concurrent writer tears the result rather than racing it; callers must validate before
/// interpreting the copy.
///
/// # Safety
///
/// `src` must be valid for reads of `T`, and every bit pattern of the right size must be a valid
/// `T` (true for the plain-number accumulator structs stored here).
unsafe fn atomic_copy<T>(src: *const T) -> T {
    let bytes = mem::size_of::<T>();
    let words = if mem::align_of::<T>() >= mem::align_of::<usize>() {
        bytes / mem::size_of::<usize>()
    } else {
        0
    };

    let mut value = MaybeUninit::<T>::uninit();

    let src_words = src as *const AtomicUsize;
    let dst_words = value.as_mut_ptr() as *mut usize;
    for i in 0..words {
        let word = (*src_words.add(i)).load(Ordering::Relaxed);
        dst_words.add(i).write(word);
    }

    let src_bytes = src as *const AtomicU8;
    let dst_bytes = value.as_mut_ptr() as *mut u8;
    for i in words * mem::size_of::<usize>()..bytes {
        let byte = (*src_bytes.add(i)).load(Ordering::Relaxed);
        dst_bytes.add(i).write(byte);
    }

    value.assume_init()
}

impl<T: Copy + std::fmt::Debug> std::fmt::Debug for SeqLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeqLock").field("data", &self.read()).finish()
    }
}

pub(crate) struct WriteGuard<'a, T: Copy> {
    lock: &'a SeqLock<T>,
    _mutex: MutexGuard<'a, ()>,
}

impl<T: Copy> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the writer mutex is held for the lifetime of the guard.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: Copy> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: the writer mutex is held for the lifetime of the guard.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: Copy> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        // Publish the mutation and return the sequence to even.
        let seq = self.lock.seq.load(Ordering::Relaxed);
        self.lock.seq.store(seq.wrapping_add(1), Ordering::Release);
    }
}
