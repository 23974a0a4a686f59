pub mod vpk;

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Handle VPK archives
    Vpk {
        #[command(subcommand)]
        command: vpk::VpkCommands,
    },
}

impl Commands {
    pub fn handle(&self) -> miette::Result<()> {
        match self {
            Commands::Vpk { command } => command.handle(),
        }
    }
}
