//! The [`Heap`] allocator and its global-allocator wrapper [`FitMalloc`].

pub mod fit_malloc;
pub mod heap;

pub use fit_malloc::FitMalloc;
pub use heap::Heap;
