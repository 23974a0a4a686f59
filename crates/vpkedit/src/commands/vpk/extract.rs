use std::path::PathBuf;

use clap::Args;
use miette::{miette, Context, Result};
use tracing::{debug, error, info};
use vpkedit_vpk::ExtractOptions;

#[derive(Args)]
pub struct ExtractArgs {
    /// An input VPK directory file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// A target directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// Allow overwriting files in the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

impl ExtractArgs {
    pub fn handle(&self) -> Result<()> {
        let archive = super::open(&self.file)?;
        info!("extracting {} entries", archive.len());

        let options = ExtractOptions::builder().overwrite(self.overwrite).build();
        let mut progress = |path: &str, done: usize| {
            debug!(done, "writing {path}");
            true
        };
        let report = archive
            .extract_all_with_progress(&self.directory, options, &mut progress)
            .context(format!("extracting into {}", self.directory.display()))?;

        for (path, err) in &report.failures {
            error!("{path}: {err}");
        }
        if !report.is_success() {
            return Err(miette!(
                "{} of {} entries failed to extract",
                report.failures.len(),
                archive.len()
            ));
        }

        info!("extracted {} entries", report.extracted);
        Ok(())
    }
}
