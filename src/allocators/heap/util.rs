//! Utility functions specific to the [`Heap`](super::Heap) allocator.

use crate::error::HeapError;

use tracing::error;

/// Reports a violation of the heap's contract by the caller, such as freeing a
/// block twice, and panics with the error's message.
#[cold]
#[inline(never)]
pub(super) fn fatal(err: HeapError) -> ! {
    error!(%err, "Heap contract violated.");
    panic!("{err}")
}
