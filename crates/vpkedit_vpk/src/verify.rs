//! Checksum verification of entries and of the archive as a whole.

use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use md5::{Digest, Md5};
use tracing::{info, instrument, warn};

use crate::archive::{chunk_path, Archive, Version};
use crate::checksum::{self, archive_checksums, to_hex};
use crate::compression::decode_payload;
use crate::directory::{read_directory, DirectoryFile};
use crate::entry::{Entry, EntryData};
use crate::error::{Error, Result};
use crate::progress::{NoProgress, ProgressReporter};
use crate::types::DIR_INDEX;

/// A checksum value of one of the supported kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    /// CRC32 of the uncompressed entry
    Crc32(u32),
    /// MD5 of the stored payload
    Md5([u8; 16]),
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checksum::Crc32(crc) => write!(f, "crc32:{crc:08x}"),
            Checksum::Md5(digest) => write!(f, "md5:{}", to_hex(digest)),
        }
    }
}

/// An entry whose bytes do not match its recorded checksum
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMismatch {
    /// Path of the entry
    pub path: String,
    /// Checksum recorded in the directory
    pub expected: Checksum,
    /// Checksum of the bytes found, `None` when they could not be read
    pub actual: Option<Checksum>,
}

impl fmt::Display for EntryMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.actual {
            Some(actual) => write!(f, "{}: expected {}, found {actual}", self.path, self.expected),
            None => write!(f, "{}: expected {}, data unreadable", self.path, self.expected),
        }
    }
}

/// Result of [`Archive::verify`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// Whether the archive level checksums match
    ///
    /// `None` for archives without checksum sections: version 1 files and archives never saved.
    pub archive_checksum: Option<bool>,
    /// Failing entries, ordered by path
    pub failures: Vec<EntryMismatch>,
}

impl VerificationReport {
    /// Whether every check passed
    pub fn passed(&self) -> bool {
        self.archive_checksum != Some(false) && self.failures.is_empty()
    }

    /// Turn a failed report into [`Error::ChecksumMismatch`]
    pub fn into_result(self) -> Result<Self> {
        if self.passed() {
            Ok(self)
        } else {
            Err(Error::ChecksumMismatch {
                failures: self.failures.len(),
            })
        }
    }
}

fn hash_range(path: &Path, start: u64, length: Option<u64>) -> Result<[u8; 16]> {
    let mut file = BufReader::new(File::open(path).map_err(Error::file_access(path))?);
    file.seek(SeekFrom::Start(start))
        .map_err(Error::file_access(path))?;

    let mut hasher = Md5::new();
    let copied = match length {
        Some(length) => io::copy(&mut file.take(length), &mut hasher),
        None => io::copy(&mut file, &mut hasher),
    }
    .map_err(Error::file_access(path))?;

    if length.is_some_and(|length| copied != length) {
        return Err(Error::CorruptPayload(format!(
            "{} ends before the end of its data",
            path.display()
        )));
    }
    Ok(hasher.finalize().into())
}

impl Archive {
    /// Check every entry against its recorded CRC32 and MD5, and the archive level checksums
    ///
    /// Nothing is modified. Entries that fail are listed in the report, they never abort the run.
    pub fn verify(&self) -> VerificationReport {
        let mut report = VerificationReport::default();
        self.verify_entries(&mut report, &mut NoProgress);
        report.archive_checksum = self.verify_archive_checksum();
        report
    }

    /// [`Archive::verify`] reporting every checked entry
    ///
    /// Returns [`Error::Cancelled`] when the reporter cancels.
    pub fn verify_with_progress(
        &self,
        progress: &mut dyn ProgressReporter,
    ) -> Result<VerificationReport> {
        let mut report = VerificationReport::default();
        if !self.verify_entries(&mut report, progress) {
            return Err(Error::Cancelled);
        }
        report.archive_checksum = self.verify_archive_checksum();
        Ok(report)
    }

    /// Returns `false` if cancelled
    #[instrument(skip_all)]
    fn verify_entries(
        &self,
        report: &mut VerificationReport,
        progress: &mut dyn ProgressReporter,
    ) -> bool {
        progress.on_total(self.len());

        for (done, (path, entry)) in self.files().enumerate() {
            if let Some(mismatch) = self.verify_entry(path, entry) {
                warn!(%mismatch, "entry failed verification");
                report.failures.push(mismatch);
            }
            if !progress.on_entry(path, done + 1) {
                return false;
            }
        }

        info!(
            entries = self.len(),
            failures = report.failures.len(),
            "verified entries"
        );
        true
    }

    fn verify_entry(&self, path: &str, entry: &Entry) -> Option<EntryMismatch> {
        let mismatch = |expected, actual| {
            Some(EntryMismatch {
                path: path.to_owned(),
                expected,
                actual,
            })
        };
        let expected_crc = Checksum::Crc32(entry.crc32);

        let (data, stored) = match &entry.data {
            EntryData::Staged(bytes) => (Ok(bytes.clone()), None),
            EntryData::Stored { preload, location } => match self.read_stored(location) {
                Ok(stored) => {
                    let data = decode_payload(&stored, location.compression).map(|rest| {
                        let mut data = preload.clone();
                        data.extend(rest);
                        data
                    });
                    (data, Some(stored))
                }
                Err(e) => (Err(e), None),
            },
        };

        let data = match data {
            Ok(data) => data,
            Err(e) => {
                warn!(path, error = %e, "unable to read entry");
                return mismatch(expected_crc, None);
            }
        };

        let crc = checksum::crc32(&data);
        if crc != entry.crc32 {
            return mismatch(expected_crc, Some(Checksum::Crc32(crc)));
        }

        if let (Some(expected), Some(stored)) = (entry.md5, stored) {
            let actual = checksum::md5(&stored);
            if actual != expected {
                return mismatch(Checksum::Md5(expected), Some(Checksum::Md5(actual)));
            }
        }

        None
    }

    /// Recompute the checksum sections from the files on disk
    fn verify_archive_checksum(&self) -> Option<bool> {
        if self.options.version == Version::V1 {
            return None;
        }
        let source = self.source.as_ref()?;
        source.other_md5?;

        let result = File::open(&source.path)
            .map_err(Error::file_access(&source.path))
            .and_then(|file| read_directory(&mut BufReader::new(file)))
            .and_then(|directory| {
                let stored = directory.other_md5;
                let computed = recompute_checksums(&source.path, &directory)?;
                Ok(stored == Some(computed))
            });

        match result {
            Ok(passed) => {
                if !passed {
                    warn!(path = %source.path.display(), "archive checksum mismatch");
                }
                Some(passed)
            }
            Err(e) => {
                warn!(path = %source.path.display(), error = %e, "unable to verify archive checksum");
                Some(false)
            }
        }
    }
}

fn recompute_checksums(
    path: &Path,
    directory: &DirectoryFile,
) -> Result<crate::types::OtherMd5Section> {
    let chunks: BTreeSet<u16> = directory
        .entries
        .iter()
        .filter(|e| e.record.entry_length > 0)
        .map(|e| e.record.chunk_index())
        .collect();

    let mut chunk_checksums = Vec::with_capacity(chunks.len());
    for index in chunks {
        let checksum = if index == DIR_INDEX {
            hash_range(path, directory.data_offset, Some(directory.embedded_size))?
        } else {
            hash_range(&chunk_path(path, index), 0, None)?
        };
        chunk_checksums.push(checksum);
    }

    Ok(archive_checksums(
        &directory.tree,
        &directory.archive_md5_section,
        chunk_checksums,
    ))
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::{Checksum, EntryMismatch, VerificationReport};
    use crate::archive::{Archive, VpkOptions};
    use crate::entry::EntryOptions;
    use crate::error::{Error, Result};

    #[test]
    fn unsaved_archive_has_no_archive_checksum() -> Result<()> {
        let mut archive = Archive::create(VpkOptions::default());
        archive.add_file("a.txt", b"abc".to_vec(), EntryOptions::default())?;

        let report = archive.verify();
        assert_eq!(report.archive_checksum, None);
        assert!(report.failures.is_empty());
        assert!(report.passed());

        Ok(())
    }

    #[test]
    fn failed_report_converts_to_error() {
        let report = VerificationReport {
            archive_checksum: Some(true),
            failures: vec![EntryMismatch {
                path: "a.txt".into(),
                expected: Checksum::Crc32(1),
                actual: Some(Checksum::Crc32(2)),
            }],
        };
        assert!(!report.passed());
        assert!(matches!(
            report.into_result(),
            Err(Error::ChecksumMismatch { failures: 1 })
        ));

        let report = VerificationReport {
            archive_checksum: Some(false),
            failures: Vec::new(),
        };
        assert!(!report.passed());
    }

    #[test]
    fn checksum_display() {
        assert_eq!(Checksum::Crc32(0xCBF43926).to_string(), "crc32:cbf43926");
        assert_eq!(
            Checksum::Md5([0xAB; 16]).to_string(),
            format!("md5:{}", "ab".repeat(16))
        );

        let mismatch = EntryMismatch {
            path: "a.txt".into(),
            expected: Checksum::Crc32(1),
            actual: None,
        };
        assert_eq!(mismatch.to_string(), "a.txt: expected crc32:00000001, data unreadable");
    }

    #[test]
    fn cancelled_verification() -> Result<()> {
        let mut archive = Archive::create(VpkOptions::default());
        archive.add_file("a.txt", b"abc".to_vec(), EntryOptions::default())?;
        archive.add_file("b.txt", b"def".to_vec(), EntryOptions::default())?;

        let result = archive.verify_with_progress(&mut |_: &str, _: usize| false);
        assert!(matches!(result, Err(Error::Cancelled)));

        Ok(())
    }
}
