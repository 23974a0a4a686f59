use std::fs;
use std::path::PathBuf;

use clap::Args;
use miette::{Context, IntoDiagnostic, Result};
use tracing::info;
use vpkedit_vpk::EntryOptions;

fn pair<T: From<String>>(value: &str) -> std::result::Result<(String, T), String> {
    match value.split_once('=') {
        Some((left, right)) if !left.is_empty() && !right.is_empty() => {
            Ok((left.to_owned(), T::from(right.to_owned())))
        }
        _ => Err(format!("expected LEFT=RIGHT, found {value:?}")),
    }
}

#[derive(Args)]
pub struct EditArgs {
    /// An input VPK directory file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Where to save the result, defaults to the input
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Add a local file at an archive path
    #[arg(long, value_name = "ARCHIVE_PATH=LOCAL_FILE", value_parser = pair::<PathBuf>)]
    add: Vec<(String, PathBuf)>,

    /// Remove a file or folder
    #[arg(long, value_name = "PATH")]
    remove: Vec<String>,

    /// Move a file or folder to a new path
    #[arg(long, value_name = "OLD=NEW", value_parser = pair::<String>)]
    rename: Vec<(String, String)>,
}

impl EditArgs {
    pub fn handle(&self) -> Result<()> {
        let mut archive = super::open(&self.file)?;

        for path in &self.remove {
            info!("removing {path}");
            archive
                .remove_entry(path)
                .context(format!("removing {path}"))?;
        }
        for (from, to) in &self.rename {
            info!("renaming {from} to {to}");
            archive
                .rename_entry(from, to)
                .context(format!("renaming {from}"))?;
        }
        for (path, local) in &self.add {
            info!("adding {path}");
            let data = fs::read(local)
                .into_diagnostic()
                .context(format!("reading {}", local.display()))?;
            archive
                .add_file(path, data, EntryOptions::default())
                .context(format!("adding {path}"))?;
        }

        if !archive.is_dirty() {
            info!("nothing to do");
            return Ok(());
        }

        let output = self.output.as_ref().unwrap_or(&self.file);
        archive
            .save(output)
            .context(format!("saving {}", output.display()))?;
        info!("saved {} entries to {}", archive.len(), output.display());

        Ok(())
    }
}
