use std::path::Path;

use miette::{Context, Result};
use vpkedit_vpk::Archive;

pub mod edit;
pub mod extract;
pub mod list;
pub mod pack;
pub mod verify;

#[derive(clap::Subcommand)]
pub enum VpkCommands {
    /// Extract a VPK archive into a directory
    Extract(extract::ExtractArgs),
    /// Pack a directory into a VPK archive
    Pack(pack::PackArgs),
    /// Check every entry of a VPK archive against its checksums
    Verify(verify::VerifyArgs),
    /// List the contents of a VPK archive
    List(list::ListArgs),
    /// Add, remove or rename entries of a VPK archive
    Edit(edit::EditArgs),
}

impl VpkCommands {
    pub fn handle(&self) -> Result<()> {
        match self {
            VpkCommands::Extract(extract) => extract.handle(),
            VpkCommands::Pack(pack) => pack.handle(),
            VpkCommands::Verify(verify) => verify.handle(),
            VpkCommands::List(list) => list.handle(),
            VpkCommands::Edit(edit) => edit.handle(),
        }
    }
}

fn open(path: &Path) -> Result<Archive> {
    Archive::open(path).context(format!("opening {}", path.display()))
}
