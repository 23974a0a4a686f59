//! Extraction of archive contents onto the filesystem.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use bon::Builder;
use tracing::{info, instrument, warn};

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::progress::{NoProgress, ProgressReporter};

/// Options for how entries are written out
#[derive(Debug, Clone, Copy, Default, Builder)]
pub struct ExtractOptions {
    /// Replace files that already exist at the destination
    #[builder(default)]
    pub overwrite: bool,
}

/// Outcome of an extraction
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Number of files written
    pub extracted: usize,
    /// Entries that could not be written, with the reason
    pub failures: Vec<(String, Error)>,
}

impl ExtractReport {
    /// Whether every entry was written
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Join an archive path onto `destination`, refusing anything that would leave it
fn enclosed_path(destination: &Path, path: &str) -> Result<PathBuf> {
    let relative = Path::new(path);
    if path.is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(destination.join(relative))
}

impl Archive {
    /// Write every file below `destination`, creating folders as needed
    ///
    /// A failing entry is recorded in the report and the remaining entries are still written.
    pub fn extract_all(
        &self,
        destination: impl AsRef<Path>,
        options: ExtractOptions,
    ) -> Result<ExtractReport> {
        self.extract_all_with_progress(destination, options, &mut NoProgress)
    }

    /// [`Archive::extract_all`] reporting every written entry
    ///
    /// Returns [`Error::Cancelled`] when the reporter cancels. Files written so far are kept.
    #[instrument(skip_all, fields(destination = %destination.as_ref().display()), err)]
    pub fn extract_all_with_progress(
        &self,
        destination: impl AsRef<Path>,
        options: ExtractOptions,
        progress: &mut dyn ProgressReporter,
    ) -> Result<ExtractReport> {
        let destination = destination.as_ref();
        fs::create_dir_all(destination).map_err(Error::file_access(destination))?;

        for folder in self.tree.folders() {
            let target = enclosed_path(destination, folder)?;
            fs::create_dir_all(&target).map_err(Error::file_access(&target))?;
        }

        let mut report = ExtractReport::default();
        progress.on_total(self.len());

        for (done, (path, entry)) in self.files().enumerate() {
            let result = enclosed_path(destination, path).and_then(|target| {
                let data = self.entry_bytes(entry)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(Error::file_access(parent))?;
                }
                let mut file = if options.overwrite {
                    File::create(&target)
                } else {
                    File::create_new(&target)
                }
                .map_err(Error::file_access(&target))?;
                file.write_all(&data).map_err(Error::file_access(&target))?;
                Ok(())
            });

            match result {
                Ok(()) => report.extracted += 1,
                Err(e) => {
                    warn!(path, error = %e, "unable to extract entry");
                    report.failures.push((path.to_owned(), e));
                }
            }

            if !progress.on_entry(path, done + 1) {
                return Err(Error::Cancelled);
            }
        }

        info!(
            extracted = report.extracted,
            failures = report.failures.len(),
            "extracted archive"
        );
        Ok(report)
    }
}
