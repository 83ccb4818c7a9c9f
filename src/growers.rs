//! [`Grower`] trait and structures that implement it.
//!
//! The [`Grower`] trait is the narrow interface between the heap and whatever
//! hands out raw memory: the program break for [`BrkGrower`] or a borrowed
//! buffer for [`ArenaGrower`].

use super::util::{checked_add, find_aligned};

use core::fmt;
use core::marker::PhantomData;
use core::ptr::NonNull;

use libc::{intptr_t, sbrk};

/// Reasons a [`Grower`] can fail to extend its buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GrowError {
    /// The underlying memory source has no more memory to give.
    Exhausted,
    /// The requested size does not fit in the address space.
    Overflow,
    /// The grower handed out memory below the current end of the heap.
    NonMonotonic,
}

impl fmt::Display for GrowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrowError::Exhausted => f.write_str("memory source exhausted"),
            GrowError::Overflow => f.write_str("growth size overflows the address space"),
            GrowError::NonMonotonic => f.write_str("grower returned memory below the heap end"),
        }
    }
}

impl std::error::Error for GrowError {}

/// A trait for types that act as a one-way growable memory source.
///
/// # Safety
/// * every region returned by [`grow`](Grower::grow) must be valid for reads and writes
///   for as long as the grower lives and must not overlap any previously returned region.
/// * copying, cloning, or moving the grower must not invalidate any pointers to the buffer
///   managed by the grower. This generally means that growers should not own but
///   reference their underlying buffers.
pub unsafe trait Grower {
    /// Extends the buffer with a fresh region of exactly `size` bytes starting at an
    /// `align`-aligned address and returns the start of that region.
    ///
    /// # Safety
    /// Callers must make sure that the grower is the only object managing its
    /// underlying memory source and that `align` is a power of two.
    unsafe fn grow(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, GrowError>;
}

/// A grower that internally uses [`libc::sbrk`] to move
/// the end of the process's data segment.
///
/// The program break never moves backwards through this grower.
#[derive(Debug, Default)]
pub struct BrkGrower {
    _private: (),
}

impl BrkGrower {
    #[inline(always)]
    pub const fn new() -> Self {
        BrkGrower { _private: () }
    }
}

unsafe impl Grower for BrkGrower {
    unsafe fn grow(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, GrowError> {
        let current = unsafe { sbrk(0) };
        if current as isize == -1 {
            return Err(GrowError::Exhausted);
        }
        let start = find_aligned(current as *const u8, align).ok_or(GrowError::Overflow)?;
        let padding = start as usize - current as usize;
        let increment = padding.checked_add(size).ok_or(GrowError::Overflow)?;
        let increment = intptr_t::try_from(increment).map_err(|_| GrowError::Overflow)?;

        let old_break = unsafe { sbrk(increment) };
        if old_break as isize == -1 {
            return Err(GrowError::Exhausted);
        }
        let old_break = old_break as *const u8;

        // Someone else may have moved the break since `sbrk(0)`.
        let start = find_aligned(old_break, align).ok_or(GrowError::Overflow)?;
        let end = checked_add(start, size).ok_or(GrowError::Overflow)?;
        if end as usize > old_break as usize + increment as usize {
            return Err(GrowError::Exhausted);
        }
        NonNull::new(start as *mut u8).ok_or(GrowError::Exhausted)
    }
}

/// A grower that carves its regions out of a borrowed buffer.
///
/// Once the buffer is used up every growth fails with [`GrowError::Exhausted`],
/// which makes it handy for exercising out-of-memory paths deterministically.
#[derive(Debug)]
pub struct ArenaGrower<'a> {
    heap_end: *mut u8,
    arena_end: *mut u8,
    _buf: PhantomData<&'a mut [u8]>,
}

impl<'a> ArenaGrower<'a> {
    /// Creates a new grower that operates on the provided buffer.
    pub fn new(buf: &'a mut [u8]) -> Self {
        let range = buf.as_mut_ptr_range();
        ArenaGrower {
            heap_end: range.start,
            arena_end: range.end,
            _buf: PhantomData,
        }
    }

    /// Returns how many bytes of the buffer are still available.
    pub fn remaining(&self) -> usize {
        self.arena_end as usize - self.heap_end as usize
    }
}

// SAFETY: the grower stands for the exclusive `&'a mut [u8]` it was created from,
// which is `Send`; the raw pointers only bound the unused part of that buffer.
unsafe impl Send for ArenaGrower<'_> {}

unsafe impl Grower for ArenaGrower<'_> {
    unsafe fn grow(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, GrowError> {
        let start = find_aligned(self.heap_end, align).ok_or(GrowError::Overflow)?;
        let end = checked_add(start, size).ok_or(GrowError::Overflow)?;
        if end > self.arena_end as *const u8 {
            return Err(GrowError::Exhausted);
        }
        self.heap_end = end as *mut u8;
        NonNull::new(start as *mut u8).ok_or(GrowError::Exhausted)
    }
}

unsafe impl<T: Grower + ?Sized> Grower for &mut T {
    unsafe fn grow(&mut self, size: usize, align: usize) -> Result<NonNull<u8>, GrowError> {
        (**self).grow(size, align)
    }
}
