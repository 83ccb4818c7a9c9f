//! Construction-time configuration of a [`Heap`](crate::Heap).

use crate::fit::FitStrategy;
use crate::header::HEADER_SIZE;

/// The smallest supported alignment unit.
pub const MIN_ALIGNMENT: usize = 4;

/// Selects the fit strategy and the alignment unit of a heap.
///
/// The configuration is fixed for the lifetime of the heap it is passed to.
///
/// ```
/// use fit_malloc::{Config, FitStrategy};
///
/// const CONFIG: Config = Config::new(FitStrategy::BestFit).with_alignment(16);
/// assert_eq!(CONFIG.alignment(), 16);
/// assert_eq!(CONFIG.header_size() % 16, 0);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    strategy: FitStrategy,
    alignment: usize,
}

impl Config {
    /// Creates a configuration using `strategy` and the default 4-byte alignment.
    pub const fn new(strategy: FitStrategy) -> Self {
        Config {
            strategy,
            alignment: MIN_ALIGNMENT,
        }
    }

    /// Returns the configuration with a different alignment unit.
    ///
    /// # Panics
    /// Panics if `alignment` is not a power of two or is smaller than [`MIN_ALIGNMENT`].
    pub const fn with_alignment(self, alignment: usize) -> Self {
        assert!(
            alignment.is_power_of_two() && alignment >= MIN_ALIGNMENT,
            "alignment should be a power of two of at least 4 bytes."
        );
        Config { alignment, ..self }
    }

    #[inline(always)]
    pub const fn strategy(&self) -> FitStrategy {
        self.strategy
    }

    #[inline(always)]
    pub const fn alignment(&self) -> usize {
        self.alignment
    }

    /// The number of bytes a block header occupies in the managed region.
    /// This is the raw header size rounded up to the alignment unit, so that
    /// data regions stay aligned.
    #[inline(always)]
    pub const fn header_size(&self) -> usize {
        (HEADER_SIZE + self.alignment - 1) & !(self.alignment - 1)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new(FitStrategy::FirstFit)
    }
}
