//! Free block selection.
//!
//! Every strategy only considers free blocks that are at least as large as the
//! request and reports `None` when there is no such block. The strategies are
//! plain functions over [`BlockInfo`] sequences (in block list order), so they
//! know nothing about the memory the blocks live in.

use crate::block_list::{BlockInfo, BlockList};
use crate::header::Link;

/// The policy used to choose among eligible free blocks.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FitStrategy {
    /// The first eligible block from the head of the list.
    #[default]
    FirstFit,
    /// The smallest eligible block, the earliest one on ties.
    BestFit,
    /// The largest eligible block, the earliest one on ties.
    WorstFit,
    /// Like first fit, but resuming from where the previous search succeeded.
    NextFit,
}

impl FitStrategy {
    /// Selects a free block of at least `size` bytes from `list`.
    ///
    /// `cursor` is only consulted by [`FitStrategy::NextFit`]; with no cursor
    /// next fit behaves like first fit.
    pub(crate) fn select(self, list: &BlockList, cursor: Link, size: usize) -> Option<BlockInfo> {
        match (self, cursor.get()) {
            (FitStrategy::FirstFit, _) | (FitStrategy::NextFit, None) => first_fit(list.iter(), size),
            (FitStrategy::BestFit, _) => best_fit(list.iter(), size),
            (FitStrategy::WorstFit, _) => worst_fit(list.iter(), size),
            (FitStrategy::NextFit, Some(at)) => {
                next_fit(list.iter_from(at), list.iter_until(at), size)
            }
        }
    }
}

#[inline(always)]
fn eligible(block: &BlockInfo, size: usize) -> bool {
    block.free && block.size >= size
}

pub fn first_fit<I>(blocks: I, size: usize) -> Option<BlockInfo>
where
    I: IntoIterator<Item = BlockInfo>,
{
    blocks.into_iter().find(|b| eligible(b, size))
}

pub fn best_fit<I>(blocks: I, size: usize) -> Option<BlockInfo>
where
    I: IntoIterator<Item = BlockInfo>,
{
    blocks
        .into_iter()
        .filter(|b| eligible(b, size))
        .reduce(|best, b| if b.size < best.size { b } else { best })
}

pub fn worst_fit<I>(blocks: I, size: usize) -> Option<BlockInfo>
where
    I: IntoIterator<Item = BlockInfo>,
{
    blocks
        .into_iter()
        .filter(|b| eligible(b, size))
        .reduce(|worst, b| if b.size > worst.size { b } else { worst })
}

/// Scans `from_cursor` (the cursor block up to the tail) and then wraps once
/// over `before_cursor` (the head up to, but excluding, the cursor block).
pub fn next_fit<I, J>(from_cursor: I, before_cursor: J, size: usize) -> Option<BlockInfo>
where
    I: IntoIterator<Item = BlockInfo>,
    J: IntoIterator<Item = BlockInfo>,
{
    first_fit(from_cursor.into_iter().chain(before_cursor), size)
}
