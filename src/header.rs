//! Defines the [`Header`] struct and associated constants and functions.

use core::mem::size_of;

use static_assertions::const_assert;

pub const HEADER_SIZE: usize = size_of::<Header>();

// Block sizes are multiples of the alignment unit and headers sit between
// blocks, so the raw header must at least fit the minimum unit.
const_assert!(HEADER_SIZE >= 4);

/// A link to another block of the block list, stored as the offset of that
/// block's header from the heap base.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(transparent)]
pub struct Link(usize);

impl Link {
    pub const NONE: Link = Link(usize::MAX);

    #[inline(always)]
    pub const fn to(offset: usize) -> Link {
        debug_assert!(offset != usize::MAX);
        Link(offset)
    }

    #[inline(always)]
    pub const fn get(self) -> Option<usize> {
        match self.0 {
            usize::MAX => None,
            offset => Some(offset),
        }
    }

    #[inline(always)]
    pub const fn is_none(self) -> bool {
        self.0 == usize::MAX
    }
}

impl From<Option<usize>> for Link {
    #[inline(always)]
    fn from(offset: Option<usize>) -> Self {
        offset.map_or(Link::NONE, Link::to)
    }
}

/// Stores information about a block: the size of its data region
/// (excluding the header itself), whether it is free, and the links to its
/// neighbours in the address-ordered block list.
///
/// Headers are embedded in the managed region right before the data they
/// describe. Since blocks are only aligned to the allocator's alignment unit,
/// which may be smaller than `align_of::<Header>()`, headers are always read and
/// written unaligned (see [`BlockList`](crate::block_list::BlockList)).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Header {
    pub size: usize,
    pub prev: Link,
    pub next: Link,
    pub free: bool,
}

impl Header {
    /// Creates a new unlinked header for a block with the specified data size and free status.
    #[inline(always)]
    pub const fn new(size: usize, free: bool) -> Header {
        Header {
            size,
            prev: Link::NONE,
            next: Link::NONE,
            free,
        }
    }

    /// Returns a copy of the header linked between `prev` and `next`.
    #[inline(always)]
    pub const fn linked(self, prev: Link, next: Link) -> Header {
        Header { prev, next, ..self }
    }
}
