use std::path::PathBuf;

use clap::Args;
use itertools::Itertools;
use miette::{Context, Result};
use owo_colors::OwoColorize;
use vpkedit_vpk::tree::Child;
use vpkedit_vpk::types::DIR_INDEX;
use vpkedit_vpk::Entry;

#[derive(Args)]
pub struct ListArgs {
    /// An input VPK directory file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,

    /// Only list the direct children of this folder
    #[arg(long, value_name = "PATH")]
    folder: Option<String>,
}

fn location(entry: &Entry) -> String {
    match entry.location() {
        Some(l) if l.archive_index == DIR_INDEX => format!("dir+{:#x}", l.offset),
        Some(l) => format!("{:03}+{:#x}", l.archive_index, l.offset),
        None => "preload".to_owned(),
    }
}

impl ListArgs {
    pub fn handle(&self) -> Result<()> {
        let archive = super::open(&self.file)?;

        if let Some(folder) = &self.folder {
            let children = archive
                .list_children(folder)
                .context(format!("listing {folder}"))?;
            for child in children {
                match child {
                    Child::Folder(name) => println!("{}/", name.blue()),
                    Child::File(name, entry) => println!("{name} {}", entry.length()),
                }
            }
            return Ok(());
        }

        for (path, entry) in archive.files() {
            println!(
                "{:>10} {:08x} {:<12} {}{}",
                entry.length(),
                entry.crc32(),
                location(entry),
                path,
                if entry.is_compressed() {
                    " (zlib)".dimmed().to_string()
                } else {
                    String::new()
                }
            );
        }

        let chunks = archive
            .chunk_sizes()
            .iter()
            .map(|(index, size)| match *index {
                DIR_INDEX => format!("dir: {size}"),
                index => format!("{index:03}: {size}"),
            })
            .join(", ");
        println!(
            "{} entries, {} bytes, version {} [{}]",
            archive.len(),
            archive.total_size(),
            archive.options().version,
            chunks
        );

        Ok(())
    }
}
