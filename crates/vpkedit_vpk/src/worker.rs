//! Running archive operations on a background thread.
//!
//! A [`Task`] owns the [`Archive`] for the duration of one operation and hands it back together
//! with the result. Progress arrives over a channel and the operation can be cancelled at any
//! entry boundary.
//!
//! ```no_run
//! # fn doit() -> vpkedit_vpk::error::Result<()> {
//! use vpkedit_vpk::worker::{spawn_open, spawn_verify, ProgressEvent};
//!
//! let archive = spawn_open("pak01_dir.vpk".into())?.wait()??;
//! let task = spawn_verify(archive)?;
//! for event in task.events() {
//!     if let ProgressEvent::Entry { path, done } = event {
//!         println!("{done}: {path}");
//!     }
//! }
//! let (_archive, report) = task.wait()?;
//! println!("passed: {}", report?.passed());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::extract::{ExtractOptions, ExtractReport};
use crate::progress::{CancellationToken, ProgressReporter};
use crate::verify::VerificationReport;

/// Progress of a background operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Number of entries the operation will process
    Total(usize),
    /// An entry was processed
    Entry {
        /// Path of the entry
        path: String,
        /// Entries processed so far
        done: usize,
    },
}

struct ChannelReporter {
    sender: Sender<ProgressEvent>,
    token: CancellationToken,
}

impl ProgressReporter for ChannelReporter {
    fn on_total(&mut self, entries: usize) {
        let _ = self.sender.send(ProgressEvent::Total(entries));
    }

    fn on_entry(&mut self, path: &str, done: usize) -> bool {
        let _ = self.sender.send(ProgressEvent::Entry {
            path: path.to_owned(),
            done,
        });
        !self.token.is_cancelled()
    }
}

/// An operation running on its own thread
pub struct Task<T> {
    handle: JoinHandle<T>,
    token: CancellationToken,
    events: Receiver<ProgressEvent>,
}

impl<T: Send + 'static> Task<T> {
    /// Run `job` on a new thread named `name`
    pub fn spawn<F>(name: &str, job: F) -> Result<Self>
    where
        F: FnOnce(&mut dyn ProgressReporter) -> T + Send + 'static,
    {
        let token = CancellationToken::new();
        let (sender, events) = mpsc::channel();
        let mut reporter = ChannelReporter {
            sender,
            token: token.clone(),
        };

        let handle = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || job(&mut reporter))?;
        debug!(name, "spawned worker");

        Ok(Self {
            handle,
            token,
            events,
        })
    }

    /// Request cancellation at the next entry boundary
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token cancelling this task, for handing to other threads
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Progress received so far, without blocking
    pub fn progress(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        self.events.try_iter()
    }

    /// Progress events, blocking until the operation ends
    pub fn events(&self) -> impl Iterator<Item = ProgressEvent> + '_ {
        self.events.iter()
    }

    /// Whether the operation has ended
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the operation ends and return its result
    pub fn wait(self) -> Result<T> {
        self.handle
            .join()
            .map_err(|_| Error::CustomError("worker thread panicked".into()))
    }
}

/// Open an archive in the background
pub fn spawn_open(path: PathBuf) -> Result<Task<Result<Archive>>> {
    Task::spawn("vpk-open", move |progress| {
        let archive = Archive::open(&path)?;
        progress.on_total(archive.len());
        Ok(archive)
    })
}

/// Save an archive in the background, handing it back afterwards
pub fn spawn_save(mut archive: Archive, path: PathBuf) -> Result<Task<(Archive, Result<()>)>> {
    Task::spawn("vpk-save", move |progress| {
        let result = archive.save_with_progress(&path, progress);
        (archive, result)
    })
}

/// Verify an archive in the background, handing it back afterwards
pub fn spawn_verify(archive: Archive) -> Result<Task<(Archive, Result<VerificationReport>)>> {
    Task::spawn("vpk-verify", move |progress| {
        let result = archive.verify_with_progress(progress);
        (archive, result)
    })
}

/// Extract an archive in the background, handing it back afterwards
pub fn spawn_extract(
    archive: Archive,
    destination: PathBuf,
    options: ExtractOptions,
) -> Result<Task<(Archive, Result<ExtractReport>)>> {
    Task::spawn("vpk-extract", move |progress| {
        let result = archive.extract_all_with_progress(&destination, options, progress);
        (archive, result)
    })
}
