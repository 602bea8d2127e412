use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct RemoveArgs {
    /// Repository URL or alias of a declared package
    pub package: String,

    /// Path to the project (defaults to current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,
}

pub fn execute(args: RemoveArgs) -> Result<()> {
    let hosts = crate::hosts()?;
    println!("{} {}", "Removing".cyan(), args.package.bold());
    let report =
        srcpkg_core::ops::remove(&hosts, &args.path, &args.package, &crate::options(false))?;
    crate::print_report(&report);
    Ok(())
}
