//! A single-threaded memory allocator.
//!
// For a general view of the allocator's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Size alignment
// Every block size is a multiple of the configured alignment unit and every header
// occupies `Config::header_size()` bytes, itself a multiple of that unit. Since the
// grower hands out aligned regions, every header and every data region is aligned.
//
// ## The next-fit cursor
// The cursor is the offset of the block following the last block handed out by the
// fit search. It has to be kept pointing at a live header: whenever the coalescer
// absorbs the cursor block, the cursor moves to the surviving block.

use self::util::fatal;
use crate::block_list::{BlockInfo, BlockList};
use crate::config::Config;
use crate::error::HeapError;
use crate::fit::FitStrategy;
use crate::growers::{GrowError, Grower};
use crate::header::Link;
use crate::stats::Statistics;
use crate::util::{align_up, raw_ptr};

use core::fmt::Debug;
use core::ptr::{copy_nonoverlapping, null_mut, NonNull};

use tracing::{debug, error, instrument, Level};

mod util;

/// A single threaded memory allocator.
///
/// All state lives in the value itself, so independent heaps can coexist as long as
/// their growers manage distinct memory.
pub struct Heap<G: Grower> {
    grower: G,
    config: Config,
    list: BlockList,
    cursor: Link,
    stats: Statistics,
}

// The heap exclusively owns the memory its block list points into.
unsafe impl<G: Grower + Send> Send for Heap<G> {}

impl<G: Grower> Debug for Heap<G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("config", &self.config)
            .field("cursor", &self.cursor)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<G: Grower> Heap<G> {
    /// Creates a heap with the specified configuration and grower.
    ///
    /// # Safety
    /// Callers must make sure that the provided grower will be the only object
    /// managing it's underlying memory for the lifetime of the returned heap.
    pub const unsafe fn with_grower(config: Config, grower: G) -> Self {
        Heap {
            grower,
            config,
            list: BlockList::new(config.header_size()),
            cursor: Link::NONE,
            stats: Statistics {
                mallocs: 0,
                frees: 0,
                reuses: 0,
                grows: 0,
                splits: 0,
                coalesces: 0,
                blocks: 0,
                requested: 0,
                max_heap: 0,
            },
        }
    }

    #[inline]
    pub fn config(&self) -> Config {
        self.config
    }

    #[inline]
    pub fn strategy(&self) -> FitStrategy {
        self.config.strategy()
    }

    #[inline]
    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// Walks the block list in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.list.iter()
    }

    /// Allocates a block with at least `size` usable bytes, aligned to the configured
    /// alignment. Returns null if `size` is 0 or if the heap can not grow.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO))]
    pub fn allocate(&mut self, size: usize) -> *mut u8 {
        if size == 0 {
            return null_mut();
        }
        raw_ptr(self.__allocate(size).ok())
    }

    /// Allocates `count * size` bytes and zeroes the whole usable region.
    /// Returns null if the product is 0, overflows, or if the heap can not grow.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO))]
    pub fn allocate_zeroed(&mut self, count: usize, size: usize) -> *mut u8 {
        let Some(total) = count.checked_mul(size) else {
            error!(err = %HeapError::SizeOverflow, "Zeroed allocation failed.");
            return null_mut();
        };
        if total == 0 {
            return null_mut();
        }
        let Ok(data) = self.__allocate(total) else {
            return null_mut();
        };
        let at = unsafe { self.list.block_of(data) };
        let usable = self.list.header(at).size;
        unsafe { data.as_ptr().write_bytes(0, usable) };
        data.as_ptr()
    }

    /// Frees the block whose data region starts at `ptr`. Null pointers are ignored.
    ///
    /// # Panics
    /// Panics if the block is already free.
    ///
    /// # Safety
    /// `ptr` must be null or have been returned by this heap.
    pub unsafe fn deallocate(&mut self, ptr: *mut u8) {
        if let Err(err) = self.try_deallocate(ptr) {
            fatal(err);
        }
    }

    /// Like [`deallocate`](Heap::deallocate) but reports a double free as
    /// [`HeapError::InvalidFree`] instead of panicking. Nothing is modified on error.
    ///
    /// # Safety
    /// `ptr` must be null or have been returned by this heap.
    #[instrument(level = "info", skip(self), err(Debug, level = Level::ERROR))]
    pub unsafe fn try_deallocate(&mut self, ptr: *mut u8) -> Result<(), HeapError> {
        let Some(data) = NonNull::new(ptr) else {
            return Ok(());
        };
        let at = self.list.block_of(data);
        if self.list.header(at).free {
            return Err(HeapError::InvalidFree { offset: at });
        }
        self.list.set_free(at, true);
        self.stats.frees += 1;
        self.coalesce(at);
        Ok(())
    }

    /// Moves the contents of the block at `ptr` to a new block of `new_size` bytes
    /// and frees the old block.
    ///
    /// A null `ptr` makes this an [`allocate`](Heap::allocate); a zero `new_size`
    /// frees the block and returns null. If the new block can not be allocated,
    /// null is returned and the old block is left untouched.
    ///
    /// # Panics
    /// Panics if the block at `ptr` is free.
    ///
    /// # Safety
    /// `ptr` must be null or have been returned by this heap.
    pub unsafe fn reallocate(&mut self, ptr: *mut u8, new_size: usize) -> *mut u8 {
        match self.try_reallocate(ptr, new_size) {
            Ok(p) => raw_ptr(p),
            Err(err @ HeapError::InvalidFree { .. }) => fatal(err),
            Err(_) => null_mut(),
        }
    }

    /// Like [`reallocate`](Heap::reallocate) but reports failures as errors.
    /// `Ok(None)` is returned when `new_size` is 0, after freeing the block.
    ///
    /// # Safety
    /// `ptr` must be null or have been returned by this heap.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub unsafe fn try_reallocate(
        &mut self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<Option<NonNull<u8>>, HeapError> {
        let Some(old_data) = NonNull::new(ptr) else {
            if new_size == 0 {
                return Ok(None);
            }
            return self.__allocate(new_size).map(Some);
        };
        if new_size == 0 {
            self.try_deallocate(ptr)?;
            return Ok(None);
        }

        let old_at = self.list.block_of(old_data);
        let old = self.list.header(old_at);
        if old.free {
            return Err(HeapError::InvalidFree { offset: old_at });
        }

        let new_data = self.__allocate(new_size)?;
        copy_nonoverlapping(old_data.as_ptr(), new_data.as_ptr(), old.size.min(new_size));
        debug!(copied = old.size.min(new_size), "Moved object to the new block.");
        self.try_deallocate(ptr)?;
        Ok(Some(new_data))
    }

    /// Returns the usable size of the block at `ptr`.
    ///
    /// # Safety
    /// `ptr` must have been returned by this heap and must not be freed.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        self.list.header(self.list.block_of(ptr)).size
    }

    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    fn __allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        debug_assert_ne!(size, 0);
        let aligned_size = align_up(size, self.config.alignment()).ok_or(HeapError::SizeOverflow)?;
        debug!(aligned_size, "Size aligned.");

        let at = match self.strategy().select(&self.list, self.cursor, aligned_size) {
            Some(block) => {
                debug!(?block, "Found free block to accomodate object.");
                self.place(block.offset, aligned_size);
                self.stats.reuses += 1;
                block.offset
            }
            None => {
                debug!("Couldn't find free block to accomodate object, requesting heap growth.");
                self.grow(aligned_size)?
            }
        };

        self.stats.mallocs += 1;
        self.stats.requested += size;
        Ok(self.list.data_ptr(at))
    }

    /// Takes the free block at `at` for an object of `size` bytes, splitting off
    /// the tail of the block if it is large enough to form a block of its own.
    #[instrument(level = "debug", skip(self))]
    fn place(&mut self, at: usize, size: usize) {
        if let Some(residual) = self.list.split(at, size) {
            self.stats.splits += 1;
            self.stats.blocks += 1;
            debug!(residual = ?self.list.info(residual), "Split free block.");
        }
        self.list.set_free(at, false);
        let next = self.list.header(at).next;
        self.cursor = if next.is_none() { self.list.head() } else { next };
    }

    /// Grows the heap by a header and `size` bytes of data and appends the new,
    /// occupied block to the block list. Returns the offset of the new block.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    fn grow(&mut self, size: usize) -> Result<usize, HeapError> {
        let growth_amount = self
            .list
            .header_size()
            .checked_add(size)
            .ok_or(HeapError::SizeOverflow)?;
        let out_of_memory = |source: GrowError| {
            error!(%source, growth_amount, "Growth failure.");
            HeapError::OutOfMemory {
                requested: size,
                source,
            }
        };

        let start = unsafe { self.grower.grow(growth_amount, self.config.alignment()) }
            .map_err(out_of_memory)?;
        let at = unsafe { self.list.append(start, size) }.map_err(out_of_memory)?;

        self.stats.grows += 1;
        self.stats.blocks += 1;
        self.stats.max_heap += size;
        debug!(at, growth_amount, "Heap growth successful.");
        Ok(at)
    }

    /// Merges the freshly freed block at `at` with its free, physically adjacent
    /// neighbours: first the predecessor, then the successor.
    #[instrument(level = "debug", skip(self))]
    fn coalesce(&mut self, mut at: usize) {
        debug_assert!(self.list.header(at).free);

        if let Some(prev) = self.list.header(at).prev.get() {
            if self.list.header(prev).free && self.list.is_adjacent(prev, at) {
                self.merge_next(prev);
                at = prev;
            }
        }

        if let Some(next) = self.list.header(at).next.get() {
            if self.list.header(next).free && self.list.is_adjacent(at, next) {
                self.merge_next(at);
            }
        }
    }

    fn merge_next(&mut self, at: usize) {
        if let Some(absorbed) = self.list.absorb_next(at) {
            self.stats.coalesces += 1;
            self.stats.blocks -= 1;
            if self.cursor == Link::to(absorbed) {
                self.cursor = Link::to(at);
            }
            debug!(absorbed, merged = ?self.list.info(at), "Merged adjacent free blocks.");
        }
    }
}

#[cfg(test)]
mod tests;
