//! A simple `sbrk`-backed memory allocator with pluggable fit strategies.
//!
//! # Usage
//! ```toml
//! [dependencies]
//! fit_malloc = "0.1"
//! ```
//!
//! A [`Heap`] is an explicit allocator object: create as many as you like, each over
//! its own [`Grower`].
//! ```
//! use fit_malloc::{Config, FitStrategy, Heap};
//! use fit_malloc::growers::ArenaGrower;
//!
//! let mut buf = vec![0_u64; 512];
//! let bytes = unsafe { std::slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<u8>(), 4096) };
//! let mut heap = unsafe { Heap::with_grower(Config::new(FitStrategy::BestFit), ArenaGrower::new(bytes)) };
//!
//! let p = heap.allocate(16);
//! assert!(!p.is_null());
//! unsafe { heap.deallocate(p) };
//! assert_eq!(heap.allocate(8), p);
//! assert_eq!(heap.statistics().reuses, 1);
//! ```
//!
//! [`FitMalloc`] wraps a heap so that it can serve as the global allocator. Rust types
//! may ask for up to 16 bytes of alignment, so configure the heap accordingly.
//! ```no_run
//! use fit_malloc::{Config, FitMalloc, FitStrategy};
//! use fit_malloc::growers::BrkGrower;
//!
//! #[global_allocator]
//! static ALLOCATOR: FitMalloc<BrkGrower> = unsafe {
//!     FitMalloc::with_grower(Config::new(FitStrategy::NextFit).with_alignment(16), BrkGrower::new())
//! };
//!
//! fn main() {
//!     fit_malloc::report_at_exit(&ALLOCATOR).unwrap();
//!     let v: Vec<u32> = vec![1, 2, 3];
//!     println!("Brk is cool {:?}", v);
//! }
//! ```
//!
//! # Mode of operation
//! The heap is a single region of memory extended on demand by a [grower](#growers)
//! and divided into [blocks](#blocks), all of which are chained in the
//! [block list](#block-list):
//! - When an allocation is requested its size is rounded up to the alignment unit and
//!   the configured [fit strategy](#fit-strategies) looks for a free block that is large
//!   enough. A block that is larger than needed by more than a header is
//!   [split](#splitting).
//! - If no block is found the heap grows by a header plus the requested size and the
//!   new block is appended to the block list.
//! - On deallocation the block is marked free and [coalesced](#coalescing) with its
//!   free neighbours.
//!
//! Memory is never given back to the operating system.
//!
//! ## Blocks
//! Each block is a header followed by the data region handed out to the user.
//! The header holds the size of the data region, whether the block is free,
//! and the links to the neighbouring blocks.
//!
//! ## Block list
//! A doubly linked list of *all* blocks, free or occupied, sorted by address.
//! Links are stored as offsets from the start of the heap. Keeping occupied blocks
//! in the list is what lets the coalescer find the physical neighbours of a block.
//!
//! ## Fit strategies
//! See [`FitStrategy`]: first fit takes the first free block that is large enough,
//! best fit the smallest one, worst fit the largest one, and next fit is first fit
//! resuming from where the previous search left off and wrapping around once.
//!
//! ## Splitting
//! A free block of `S` bytes chosen for `s` bytes is split when `S - s` exceeds the
//! header size: the block keeps `s` bytes and a new free block of
//! `S - s - header_size` bytes is linked right after it.
//!
//! ## Coalescing
//! A freed block is merged with the previous block and then with the next block,
//! when those are free and physically adjacent. Since this happens on every free,
//! no two adjacent free blocks ever exist.
//!
//! ## Growers
//! A grower is the heap's memory source. [`BrkGrower`](growers::BrkGrower) moves the
//! program break, [`ArenaGrower`](growers::ArenaGrower) carves a borrowed buffer.
//! Anything implementing [`Grower`] can be used.
//!
//! ## Statistics
//! Every heap keeps [`Statistics`] about what it did. [`report_at_exit`] prints them
//! when the process exits.
//!
//! # Threads
//! A [`Heap`] is single-threaded and takes `&mut self` everywhere. [`FitMalloc`]
//! serialises access with a `Mutex`, which is enough for a global allocator but
//! makes no attempt at scaling.
//!
//! [`Grower`]: growers::Grower

pub use crate::allocators::{FitMalloc, Heap};
pub use crate::block_list::BlockInfo;
pub use crate::config::{Config, MIN_ALIGNMENT};
pub use crate::error::HeapError;
pub use crate::fit::FitStrategy;
pub use crate::stats::{report_at_exit, ReportError, Statistics, StatisticsSource};

pub mod allocators;
mod block_list;
mod config;
mod error;
pub mod fit;
pub mod growers;
mod header;
mod stats;
mod util;
