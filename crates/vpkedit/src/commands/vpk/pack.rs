use std::fs;
use std::path::PathBuf;

use clap::Args;
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::info;
use vpkedit_vpk::{Archive, CompressionMethod, EntryOptions, Version, VpkOptions};
use walkdir::WalkDir;

#[derive(Args)]
pub struct PackArgs {
    /// An input directory
    #[arg(short, long, value_name = "DIR")]
    directory: PathBuf,

    /// A target VPK directory file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Allow overwriting the target
    #[arg(long, default_value_t = false)]
    overwrite: bool,

    /// Directory file layout version
    #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=2))]
    version: u32,

    /// Embed all data in the directory file
    #[arg(long, default_value_t = false)]
    single_file: bool,

    /// Size at which a new chunk file is started
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<u64>,

    /// Compress payloads with zlib (version 2 only)
    #[arg(long, default_value_t = false)]
    compress: bool,

    /// Record MD5 checksums of every payload (version 2 only)
    #[arg(long, default_value_t = false)]
    md5: bool,

    /// Number of leading bytes of every file stored in the directory
    #[arg(long, value_name = "N", default_value_t = 0)]
    preload: u16,
}

impl PackArgs {
    fn options(&self) -> Result<VpkOptions> {
        let options = VpkOptions::builder()
            .version(Version::try_from(self.version)?)
            .single_file(self.single_file)
            .compression(if self.compress {
                CompressionMethod::Zlib
            } else {
                CompressionMethod::None
            })
            .generate_md5(self.md5)
            .maybe_chunk_size(self.chunk_size)
            .build();
        Ok(options)
    }

    pub fn handle(&self) -> Result<()> {
        if self.file.exists() && !self.overwrite {
            return Err(miette!(
                "{} already exists, pass --overwrite to replace it",
                self.file.display()
            ));
        }
        info!("creating {}", &self.file.display());

        let files = WalkDir::new(&self.directory)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .collect::<Vec<_>>();

        if files.is_empty() {
            return Err(miette!("directory is empty"));
        }

        let mut archive = Archive::create(self.options()?);
        let entry_options = EntryOptions::builder().preload_length(self.preload).build();

        for file in files {
            let name = file
                .path()
                .strip_prefix(&self.directory)
                .into_diagnostic()?;
            let name = name
                .to_str()
                .ok_or(miette!("unable to convert {} to a string", name.display()))?;
            info!("packing {name}");

            let data = fs::read(file.path())
                .into_diagnostic()
                .context(format!("reading {}", file.path().display()))?;
            archive
                .add_file(name, data, entry_options)
                .context(format!("adding {name}"))?;
        }

        archive
            .save(&self.file)
            .context(format!("saving {}", self.file.display()))?;
        info!(
            "packed {} entries, {} bytes",
            archive.len(),
            archive.total_size()
        );

        Ok(())
    }
}
