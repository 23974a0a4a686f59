use std::path::PathBuf;

use clap::Args;
use miette::{miette, Result};
use owo_colors::OwoColorize;
use tracing::{debug, info};
use vpkedit_vpk::worker::{spawn_verify, ProgressEvent};

#[derive(Args)]
pub struct VerifyArgs {
    /// An input VPK directory file
    #[arg(short, long, value_name = "FILE")]
    file: PathBuf,
}

impl VerifyArgs {
    pub fn handle(&self) -> Result<()> {
        let archive = super::open(&self.file)?;

        let task = spawn_verify(archive)?;
        for event in task.events() {
            match event {
                ProgressEvent::Total(total) => info!("verifying {total} entries"),
                ProgressEvent::Entry { path, done } => debug!(done, "checked {path}"),
            }
        }
        let (_, report) = task.wait()?;
        let report = report?;

        for failure in &report.failures {
            println!("❌ {}", failure.red());
        }
        match report.archive_checksum {
            Some(true) => println!("✅ {}", "archive checksum".green()),
            Some(false) => println!("❌ {}", "archive checksum".red()),
            None => println!("➖ {}", "no archive checksum".dimmed()),
        }

        if report.passed() {
            println!("{}", "passed".green().bold());
            Ok(())
        } else {
            Err(miette!(
                "{} failed verification with {} bad entries",
                self.file.display(),
                report.failures.len()
            ))
        }
    }
}
