//! Errors reported by the heap.

use core::fmt;

use crate::growers::GrowError;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HeapError {
    /// The grower could not extend the heap for a block with `requested` bytes of data.
    OutOfMemory { requested: usize, source: GrowError },
    /// The block at `offset` was deallocated while already free.
    InvalidFree { offset: usize },
    /// The request size overflows once aligned or multiplied.
    SizeOverflow,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeapError::OutOfMemory { requested, source } => {
                write!(f, "out of memory: cannot grow the heap by {requested} bytes ({source})")
            }
            HeapError::InvalidFree { offset } => {
                write!(f, "invalid free: block at offset {offset} is already free")
            }
            HeapError::SizeOverflow => f.write_str("requested size overflows"),
        }
    }
}

impl std::error::Error for HeapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HeapError::OutOfMemory { source, .. } => Some(source),
            _ => None,
        }
    }
}
