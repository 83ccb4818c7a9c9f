//! A [`GlobalAlloc`] wrapper over [`Heap`].

use crate::allocators::Heap;
use crate::config::Config;
use crate::error::HeapError;
use crate::growers::Grower;
use crate::stats::{Statistics, StatisticsSource};
use crate::util::raw_ptr;

use core::alloc::{GlobalAlloc, Layout};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use tracing::error;

/// A global memory allocator.
///
/// The [`Heap`] itself is single-threaded; this wrapper puts it behind a `Mutex`
/// so that it can be installed with `#[global_allocator]`. Layouts asking for more
/// alignment than the configured alignment unit are refused.
///
/// Installing a `tracing` subscriber that allocates while this is the global
/// allocator would re-enter the heap from its own log events, so keep logging
/// off (the default) in that setup.
pub struct FitMalloc<G: Grower> {
    inner: Mutex<Heap<G>>,
}

impl<G: Grower> FitMalloc<G> {
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying memory for the lifetime of the returned allocator.
    pub const unsafe fn with_grower(config: Config, grower: G) -> Self {
        FitMalloc {
            inner: Mutex::new(Heap::with_grower(config, grower)),
        }
    }

    /// Locks the inner heap. A panic while holding the lock can only come from a
    /// contract violation that already got reported, so poisoning is ignored.
    pub fn lock(&self) -> MutexGuard<'_, Heap<G>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fits(&self, heap: &Heap<G>, layout: Layout) -> bool {
        let fits = layout.align() <= heap.config().alignment();
        if !fits {
            error!(?layout, "Alignment exceeds the heap's alignment unit.");
        }
        fits
    }
}

impl<G: Grower + Send> StatisticsSource for FitMalloc<G> {
    fn statistics(&self) -> Statistics {
        self.lock().statistics()
    }

    fn try_statistics(&self) -> Option<Statistics> {
        match self.inner.try_lock() {
            Ok(heap) => Some(heap.statistics()),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner().statistics()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}

/// Unwinding out of a global allocator is not allowed, so contract violations abort.
fn abort_on(err: HeapError) -> ! {
    error!(%err, "Aborting.");
    std::process::abort()
}

unsafe impl<G: Grower + Send> GlobalAlloc for FitMalloc<G> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();
        if !self.fits(&heap, layout) {
            return core::ptr::null_mut();
        }
        heap.allocate(layout.size())
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let mut heap = self.lock();
        if !self.fits(&heap, layout) {
            return core::ptr::null_mut();
        }
        heap.allocate_zeroed(1, layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Err(err) = self.lock().try_deallocate(ptr) {
            abort_on(err);
        }
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let mut heap = self.lock();
        if !self.fits(&heap, layout) {
            return core::ptr::null_mut();
        }
        match heap.try_reallocate(ptr, new_size) {
            Ok(p) => raw_ptr(p),
            Err(err @ HeapError::InvalidFree { .. }) => abort_on(err),
            Err(_) => core::ptr::null_mut(),
        }
    }
}
