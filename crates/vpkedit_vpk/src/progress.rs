//! Progress reporting and cancellation for long running archive operations.
//!
//! Saving, verifying and extracting walk every entry of the archive. They report each processed
//! entry to a [`ProgressReporter`], which may stop the operation by returning `false`.
//!
//! ```
//! use vpkedit_vpk::progress::ProgressReporter;
//!
//! let mut seen = Vec::new();
//! let mut reporter = |path: &str, _done: usize| {
//!     seen.push(path.to_owned());
//!     seen.len() < 10
//! };
//! assert!(reporter.on_entry("materials/foo.vmt", 1));
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives progress of an archive operation
pub trait ProgressReporter {
    /// Called once before the first entry with the number of entries to process
    fn on_total(&mut self, entries: usize) {
        let _ = entries;
    }

    /// Called after each entry
    ///
    /// Returns `true` to continue or `false` to cancel the operation.
    fn on_entry(&mut self, path: &str, done: usize) -> bool;
}

/// Reporter that ignores progress and never cancels
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn on_entry(&mut self, _path: &str, _done: usize) -> bool {
        true
    }
}

impl<F> ProgressReporter for F
where
    F: FnMut(&str, usize) -> bool,
{
    fn on_entry(&mut self, path: &str, done: usize) -> bool {
        self(path, done)
    }
}

/// Shared flag requesting cancellation of an operation running elsewhere
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the operation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Checks if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::{CancellationToken, NoProgress, ProgressReporter};

    #[test]
    fn closures_can_cancel() {
        let mut reporter = |_: &str, done: usize| done < 2;
        assert!(reporter.on_entry("a", 1));
        assert!(!reporter.on_entry("b", 2));
        assert!(NoProgress.on_entry("c", 3));
    }

    #[test]
    fn token_clones_share_state() {
        let token = CancellationToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
