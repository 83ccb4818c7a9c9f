//! Defines the [`BlockList`] struct, the address-ordered list of every block
//! (free or occupied) of the managed region.
//!
//! Blocks are identified by the offset of their header from the heap base, the
//! address of the first region handed out by the grower. Growers only ever
//! extend upwards, so offsets grow with addresses and the list stays sorted by
//! simply appending new regions at the tail.

use core::ptr::NonNull;

use crate::growers::GrowError;
use crate::header::{Header, Link, HEADER_SIZE};

/// A copy of the state of a single block, as seen while walking the list.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header from the start of the heap.
    pub offset: usize,
    /// Usable size of the block, excluding its header.
    pub size: usize,
    pub free: bool,
}

#[derive(Debug)]
pub(crate) struct BlockList {
    base: NonNull<u8>,
    head: Link,
    tail: Link,
    /// Offset one past the last byte of the managed region.
    end: usize,
    header_size: usize,
}

impl BlockList {
    /// Creates an empty list whose headers occupy `header_size` bytes each.
    pub const fn new(header_size: usize) -> Self {
        debug_assert!(header_size >= HEADER_SIZE);
        BlockList {
            base: NonNull::dangling(),
            head: Link::NONE,
            tail: Link::NONE,
            end: 0,
            header_size,
        }
    }

    #[inline(always)]
    pub fn head(&self) -> Link {
        self.head
    }

    #[inline(always)]
    pub fn header_size(&self) -> usize {
        self.header_size
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    #[inline(always)]
    fn block_ptr(&self, at: usize) -> *mut u8 {
        debug_assert!(at + self.header_size <= self.end, "offset {at} outside of the heap");
        // SAFETY: offsets handed to the list always lie inside the managed region.
        unsafe { self.base.as_ptr().add(at) }
    }

    /// Reads the header of the block at offset `at`.
    #[inline]
    pub fn header(&self, at: usize) -> Header {
        // SAFETY: every offset reachable from the list points at a header written by
        // `write`. Blocks are only aligned to the heap's alignment unit, hence the
        // unaligned read.
        unsafe { self.block_ptr(at).cast::<Header>().read_unaligned() }
    }

    #[inline]
    fn write(&mut self, at: usize, header: Header) {
        // SAFETY: see `header`.
        unsafe { self.block_ptr(at).cast::<Header>().write_unaligned(header) }
    }

    #[inline]
    fn update(&mut self, at: usize, f: impl FnOnce(&mut Header)) {
        let mut header = self.header(at);
        f(&mut header);
        self.write(at, header);
    }

    #[inline]
    pub fn info(&self, at: usize) -> BlockInfo {
        let header = self.header(at);
        BlockInfo {
            offset: at,
            size: header.size,
            free: header.free,
        }
    }

    /// Offset one past the data region of the block at `at`.
    #[inline]
    pub fn data_end(&self, at: usize) -> usize {
        at + self.header_size + self.header(at).size
    }

    /// Returns whether the block at `next` starts right where the data of the block at `at` ends.
    #[inline]
    pub fn is_adjacent(&self, at: usize, next: usize) -> bool {
        self.data_end(at) == next
    }

    /// Returns a pointer to the data region of the block at `at`.
    #[inline]
    pub fn data_ptr(&self, at: usize) -> NonNull<u8> {
        // SAFETY: the data region follows the header inside the managed region.
        unsafe { NonNull::new_unchecked(self.block_ptr(at).add(self.header_size)) }
    }

    /// Resolves the block owning the data region starting at `data`.
    ///
    /// This is the one place where a caller-provided pointer is turned back into
    /// a block offset; everything else works on offsets produced by the list.
    ///
    /// # Safety
    /// `data` must have been obtained from [`data_ptr`](BlockList::data_ptr) of this
    /// list and its block must not have been absorbed by a neighbour since.
    #[inline]
    pub unsafe fn block_of(&self, data: NonNull<u8>) -> usize {
        let address = data.as_ptr() as usize;
        debug_assert!(
            address >= self.base.as_ptr() as usize + self.header_size,
            "pointer {data:?} does not belong to the heap"
        );
        let at = address - self.base.as_ptr() as usize - self.header_size;
        debug_assert!(at < self.end, "pointer {data:?} does not belong to the heap");
        at
    }

    pub fn set_free(&mut self, at: usize, free: bool) {
        self.update(at, |h| h.free = free);
    }

    /// Appends an occupied block with `size` bytes of data in the region
    /// starting at `start`, which must be at least `header_size + size` bytes long.
    /// Returns the offset of the new block.
    ///
    /// # Safety
    /// The region must be valid for writes and must not be used by anything else.
    pub unsafe fn append(&mut self, start: NonNull<u8>, size: usize) -> Result<usize, GrowError> {
        if self.is_empty() && self.end == 0 {
            self.base = start;
        }
        let address = start.as_ptr() as usize;
        let heap_end = self.base.as_ptr() as usize + self.end;
        if address < heap_end {
            return Err(GrowError::NonMonotonic);
        }

        let at = address - self.base.as_ptr() as usize;
        let end = at
            .checked_add(self.header_size)
            .and_then(|e| e.checked_add(size))
            .ok_or(GrowError::Overflow)?;
        self.end = end;

        let tail = self.tail;
        self.write(at, Header::new(size, false).linked(tail, Link::NONE));
        match tail.get() {
            Some(tail) => self.update(tail, |h| h.next = Link::to(at)),
            None => self.head = Link::to(at),
        }
        self.tail = Link::to(at);
        Ok(at)
    }

    /// Shrinks the block at `at` to `size` bytes and turns the rest of its data
    /// region into a new free block linked right after it, provided that the
    /// rest is larger than a header. Returns the offset of the new block.
    pub fn split(&mut self, at: usize, size: usize) -> Option<usize> {
        let header = self.header(at);
        debug_assert!(header.size >= size);
        let rest = header.size - size;
        if rest <= self.header_size {
            return None;
        }

        let residual_at = at + self.header_size + size;
        let residual = Header::new(rest - self.header_size, true).linked(Link::to(at), header.next);
        self.write(residual_at, residual);
        self.write(
            at,
            Header {
                size,
                next: Link::to(residual_at),
                ..header
            },
        );
        match header.next.get() {
            Some(next) => self.update(next, |h| h.prev = Link::to(residual_at)),
            None => self.tail = Link::to(residual_at),
        }
        Some(residual_at)
    }

    /// Merges the block following `at` into `at`, unlinking the follower's header.
    /// Returns the offset of the absorbed block or `None` if `at` is the tail.
    ///
    /// Callers are responsible for checking that both blocks are free and adjacent.
    pub fn absorb_next(&mut self, at: usize) -> Option<usize> {
        let header = self.header(at);
        let next_at = header.next.get()?;
        debug_assert!(self.is_adjacent(at, next_at));
        let next = self.header(next_at);

        self.write(
            at,
            Header {
                size: header.size + self.header_size + next.size,
                next: next.next,
                ..header
            },
        );
        match next.next.get() {
            Some(after) => self.update(after, |h| h.prev = Link::to(at)),
            None => self.tail = Link::to(at),
        }
        Some(next_at)
    }

    /// Iterates over all blocks from the head.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            next: self.head,
        }
    }

    /// Iterates from the block at `at` to the tail.
    pub fn iter_from(&self, at: usize) -> Iter<'_> {
        Iter {
            list: self,
            next: Link::to(at),
        }
    }

    /// Iterates from the head up to, but excluding, the block at `at`.
    pub fn iter_until(&self, at: usize) -> impl Iterator<Item = BlockInfo> + '_ {
        self.iter().take_while(move |b| b.offset != at)
    }
}

pub(crate) struct Iter<'a> {
    list: &'a BlockList,
    next: Link,
}

impl Iterator for Iter<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        let at = self.next.get()?;
        let header = self.list.header(at);
        self.next = header.next;
        Some(BlockInfo {
            offset: at,
            size: header.size,
            free: header.free,
        })
    }
}
