//! Usage counters of a heap and their end-of-process report.

use core::fmt::{self, Write};
use std::sync::OnceLock;

use tracing::{debug, error};

/// Counters describing everything a heap did so far.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Successful allocations, including the ones served from reused blocks.
    pub mallocs: usize,
    pub frees: usize,
    /// Allocations served from an existing free block.
    pub reuses: usize,
    pub grows: usize,
    pub splits: usize,
    pub coalesces: usize,
    /// Block headers currently live in the block list.
    pub blocks: usize,
    /// Sum of the sizes passed to successful allocations, before alignment.
    pub requested: usize,
    /// Cumulative data bytes requested from the grower.
    pub max_heap: usize,
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "heap management statistics")?;
        writeln!(f, "mallocs:\t{}", self.mallocs)?;
        writeln!(f, "frees:\t\t{}", self.frees)?;
        writeln!(f, "reuses:\t\t{}", self.reuses)?;
        writeln!(f, "grows:\t\t{}", self.grows)?;
        writeln!(f, "splits:\t\t{}", self.splits)?;
        writeln!(f, "coalesces:\t{}", self.coalesces)?;
        writeln!(f, "blocks:\t\t{}", self.blocks)?;
        writeln!(f, "requested:\t{}", self.requested)?;
        writeln!(f, "max heap:\t{}", self.max_heap)
    }
}

/// Anything that can hand out a snapshot of heap statistics from any thread.
pub trait StatisticsSource: Sync {
    fn statistics(&self) -> Statistics;

    /// Like [`statistics`](StatisticsSource::statistics) but never blocks.
    /// Returns `None` if the statistics can not be read right now.
    fn try_statistics(&self) -> Option<Statistics> {
        Some(self.statistics())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReportError {
    /// A report was already registered for this process.
    AlreadyRegistered,
    /// `atexit` refused the handler.
    RegistrationFailed,
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::AlreadyRegistered => f.write_str("an exit report is already registered"),
            ReportError::RegistrationFailed => f.write_str("atexit() failed"),
        }
    }
}

impl std::error::Error for ReportError {}

static EXIT_REPORT: OnceLock<&'static dyn StatisticsSource> = OnceLock::new();

/// Prints the statistics of `source` to standard output once, when the process exits.
///
/// Only one source can be registered per process. The report is formatted on the
/// stack and written with a raw `write(2)`, so it never allocates and can safely
/// report on the global allocator itself.
pub fn report_at_exit(source: &'static dyn StatisticsSource) -> Result<(), ReportError> {
    EXIT_REPORT
        .set(source)
        .map_err(|_| ReportError::AlreadyRegistered)?;
    if unsafe { libc::atexit(print_report) } != 0 {
        error!("Couldn't register the exit report.");
        return Err(ReportError::RegistrationFailed);
    }
    debug!("Registered exit report.");
    Ok(())
}

extern "C" fn print_report() {
    let Some(source) = EXIT_REPORT.get() else {
        return;
    };
    // Another thread may still be inside the allocator while the process exits.
    let Some(stats) = source.try_statistics() else {
        return;
    };
    let mut out = StackWriter::<512>::new();
    // A truncated report is still worth printing.
    let _ = write!(out, "\n{stats}");
    let bytes = out.as_bytes();
    unsafe {
        libc::write(libc::STDOUT_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}

/// A fixed-capacity text buffer.
struct StackWriter<const N: usize> {
    buf: [u8; N],
    len: usize,
}

impl<const N: usize> StackWriter<N> {
    const fn new() -> Self {
        StackWriter { buf: [0; N], len: 0 }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

impl<const N: usize> Write for StackWriter<N> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let available = N - self.len;
        let n = s.len().min(available);
        self.buf[self.len..self.len + n].copy_from_slice(&s.as_bytes()[..n]);
        self.len += n;
        if n < s.len() {
            return Err(fmt::Error);
        }
        Ok(())
    }
}
