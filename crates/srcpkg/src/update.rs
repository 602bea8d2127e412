//! Update a declared package.
//!
//! Without a constraint the package moves to its newest release in the current
//! major version. Moving to another major version needs `--force`.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Repository URL or alias of a declared package
    pub package: String,

    /// New version constraint
    pub constraint: Option<String>,

    /// Path to the project (defaults to current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Allow breaking (major version) updates
    #[arg(long)]
    pub force: bool,
}

pub fn execute(args: UpdateArgs) -> Result<()> {
    let hosts = crate::hosts()?;
    println!("{} {}", "Updating".cyan(), args.package.bold());
    let report = srcpkg_core::ops::update(
        &hosts,
        &args.path,
        &args.package,
        args.constraint.as_deref(),
        &crate::options(args.force),
    )?;
    crate::print_report(&report);
    Ok(())
}
