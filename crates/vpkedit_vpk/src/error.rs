//! Error types that can be emitted from this library

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// unable to access {path}
    #[error("unable to access {}", path.display())]
    FileAccess {
        /// The directory or chunk file that failed
        path: PathBuf,
        /// The underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// file is an invalid vpk archive
    #[error("invalid vpk archive at offset {offset:#x}: {reason}")]
    #[diagnostic(code(vpk::invalid_archive))]
    InvalidArchive {
        /// Position in the directory file where the problem was found
        offset: u64,
        /// What was wrong
        reason: String,
    },

    /// the archive layout does not fit the format limits
    #[error("archive data of {size} bytes exceeds the limit of {limit} bytes")]
    #[diagnostic(
        code(vpk::chunk_size_exceeded),
        help("disable single-file mode or split the content across more chunks")
    )]
    ChunkSizeExceeded {
        /// Requested size
        size: u64,
        /// Format limit that was hit
        limit: u64,
    },

    /// unable to find requested entry
    #[error("unable to find requested entry")]
    EntryNotFound(#[from] EntryNotFoundError),

    /// path {0} is already occupied
    #[error("path {0} is already occupied")]
    PathConflict(String),

    /// invalid entry path {0:?}
    #[error("invalid entry path {0:?}")]
    InvalidPath(String),

    /// invalid entry options: {0}
    #[error("invalid entry options: {0}")]
    InvalidEntryOptions(String),

    /// stored payload could not be decoded
    #[error("stored payload could not be decoded: {0}")]
    CorruptPayload(String),

    /// {failures} entries failed checksum verification
    #[error("{failures} entries failed checksum verification")]
    #[diagnostic(code(vpk::checksum_mismatch))]
    ChecksumMismatch {
        /// Number of failing entries
        failures: usize,
    },

    /// operation was cancelled
    #[error("operation was cancelled")]
    Cancelled,

    /// {0}
    #[error("{0}")]
    CustomError(String),
}

impl Error {
    pub(crate) fn invalid(offset: u64, reason: impl Into<String>) -> Self {
        Error::InvalidArchive {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn file_access(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Error::FileAccess { path, source }
    }
}

/// Error type to provide further information when an entry has not been found
#[derive(Error, Diagnostic, Debug)]
#[error("unable to find requested entry")]
pub enum EntryNotFoundError {
    /// at path {0}
    #[error("at path {0}")]
    Path(String),

    /// {0} is not a folder
    #[error("{0} is not a folder")]
    Folder(String),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
