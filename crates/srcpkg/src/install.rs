use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct InstallArgs {
    /// Path to the project (defaults to current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub fn execute(args: InstallArgs) -> Result<()> {
    let hosts = crate::hosts()?;
    println!("{}", "Installing packages...".cyan());
    let report = srcpkg_core::ops::install(&hosts, &args.path, &crate::options(false))
        .with_context(|| format!("Failed to install packages in {}", args.path.display()))?;
    crate::print_report(&report);
    Ok(())
}
